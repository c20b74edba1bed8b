//! Signature-only outline of a Java source file.
//!
//! Lists type declarations and method/constructor signatures so the impact
//! analyzer can rank files without seeing their bodies. This is a line-level
//! scan, not a parser: it never looks inside method bodies or resolves types.

use std::sync::OnceLock;

use regex::Regex;

fn type_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:public|protected|private|abstract|final|static|sealed|non-sealed)\s+)*(class|interface|enum|record|@interface)\s+([A-Za-z_][A-Za-z0-9_]*)",
        )
        .expect("static pattern")
    })
}

fn method_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^\s*(?:(?:public|protected|private|abstract|final|static|synchronized|native|default)\s+)*(?:<[^>]+>\s+)?([A-Za-z_][A-Za-z0-9_<>\[\], .?]*\s+)?([a-zA-Z_][A-Za-z0-9_]*)\s*\(([^)]*)\)\s*(?:throws\s+[A-Za-z0-9_., ]+)?\s*[{;]",
        )
        .expect("static pattern")
    })
}

const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "return", "new", "else", "do", "try", "synchronized",
    "throw",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaOutline {
    /// e.g. `class OrderService`
    pub types: Vec<String>,
    /// e.g. `createOrder(OrderRequest request)`
    pub methods: Vec<String>,
}

impl JavaOutline {
    pub fn is_empty(&self) -> bool {
        self.types.is_empty() && self.methods.is_empty()
    }

    /// One line: `class A; interface B | m1(..), m2(..)`.
    pub fn summary(&self) -> String {
        let types = self.types.join("; ");
        if self.methods.is_empty() {
            types
        } else {
            format!("{types} | {}", self.methods.join(", "))
        }
    }
}

/// Extract declarations from Java source text.
pub fn outline(source: &str) -> JavaOutline {
    let mut types = Vec::new();
    let mut methods = Vec::new();
    let mut in_block_comment = false;

    for raw in source.lines() {
        let line = raw.trim();
        if in_block_comment {
            if line.contains("*/") {
                in_block_comment = false;
            }
            continue;
        }
        if line.starts_with("/*") {
            in_block_comment = !line.contains("*/");
            continue;
        }
        if line.starts_with("//") || (line.starts_with('@') && !line.starts_with("@interface")) {
            continue;
        }

        if let Some(c) = type_re().captures(line) {
            types.push(format!("{} {}", &c[1], &c[2]));
            continue;
        }
        if let Some(c) = method_re().captures(line) {
            let name = &c[2];
            let return_type = c.get(1).map(|m| m.as_str()).unwrap_or("");
            if CONTROL_KEYWORDS.contains(&name)
                || return_type
                    .split_whitespace()
                    .any(|w| CONTROL_KEYWORDS.contains(&w))
            {
                continue;
            }
            let params = c[3].split_whitespace().collect::<Vec<_>>().join(" ");
            methods.push(format!("{name}({params})"));
        }
    }

    JavaOutline { types, methods }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOURCE: &str = r#"
package com.acme.auth;

/**
 * Handles login.
 * public void notAMethod() {
 */
@RestController
public class AuthController {
    private final AuthService service;

    public AuthController(AuthService service) {
        this.service = service;
    }

    @PostMapping("/login")
    public ResponseEntity<Token> login(@RequestBody LoginRequest req) throws AuthException {
        if (req == null) {
            return ResponseEntity.badRequest().build();
        }
        return ResponseEntity.ok(service.login(req));
    }
}

interface TokenStore {
    void save(Token token);
}
"#;

    #[test]
    fn finds_types_and_methods() {
        let o = outline(SOURCE);
        assert_eq!(o.types, vec!["class AuthController", "interface TokenStore"]);
        assert!(o.methods.contains(&"AuthController(AuthService service)".to_string()));
        assert!(o
            .methods
            .contains(&"login(@RequestBody LoginRequest req)".to_string()));
        assert!(o.methods.contains(&"save(Token token)".to_string()));
    }

    #[test]
    fn skips_control_flow_and_comments() {
        let o = outline(SOURCE);
        assert!(!o.methods.iter().any(|m| m.starts_with("if(")));
        assert!(!o.methods.iter().any(|m| m.starts_with("notAMethod")));
    }

    #[test]
    fn summary_format() {
        let o = JavaOutline {
            types: vec!["class A".into()],
            methods: vec!["run()".into()],
        };
        assert_eq!(o.summary(), "class A | run()");
    }
}
