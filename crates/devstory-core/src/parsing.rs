//! Structural contracts for model responses.
//!
//! Responses are validated as soon as they arrive; anything that does not
//! match its contract is a validation error, never a best-effort scrape.

use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{StageError, StoryPair, VerdictStatus};

pub const DEVELOPER_DELIMITER: &str = "=== DEVELOPER STORIES ===";
pub const TESTER_DELIMITER: &str = "=== TESTER STORIES ===";

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```[A-Za-z0-9_+\-]*[ \t]*\r?\n(.*?)```").expect("static pattern")
    })
}

fn verdict_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[\s*#>]*VERDICT[\s*]*:[\s*]*(APPROVED|NEEDS[_ ]REVISION)\b")
            .expect("static pattern")
    })
}

/// Path selection: a JSON array of strings, optionally fenced.
///
/// Returns `None` when no array can be decoded.
pub fn parse_path_selection(text: &str) -> Option<Vec<String>> {
    let body = fence_re()
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text);
    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str::<Vec<String>>(&body[start..=end]).ok()
}

/// Split a story response into its developer and tester sections.
///
/// Each delimiter must appear exactly once, developer first, and each
/// section must contain non-blank text.
pub fn split_stories(text: &str) -> Result<StoryPair, StageError> {
    let dev_count = text.matches(DEVELOPER_DELIMITER).count();
    let test_count = text.matches(TESTER_DELIMITER).count();
    if dev_count != 1 || test_count != 1 {
        return Err(StageError::StoryParse {
            reason: format!(
                "expected one of each delimiter, found {dev_count} developer and {test_count} tester"
            ),
        });
    }

    let dev_at = text.find(DEVELOPER_DELIMITER).unwrap_or_default();
    let test_at = text.find(TESTER_DELIMITER).unwrap_or_default();
    if test_at < dev_at {
        return Err(StageError::StoryParse {
            reason: "tester section precedes developer section".into(),
        });
    }

    let developer = text[dev_at + DEVELOPER_DELIMITER.len()..test_at].trim();
    let tester = text[test_at + TESTER_DELIMITER.len()..].trim();
    if developer.is_empty() || tester.is_empty() {
        return Err(StageError::StoryParse {
            reason: "a story section is empty".into(),
        });
    }

    Ok(StoryPair {
        developer_story: developer.to_string(),
        tester_story: tester.to_string(),
    })
}

/// Concatenate every non-empty fenced code block; `None` if there is none.
pub fn extract_code(text: &str) -> Option<String> {
    let blocks: Vec<&str> = fence_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().trim_end())
        .filter(|b| !b.trim().is_empty())
        .collect();
    if blocks.is_empty() {
        None
    } else {
        Some(blocks.join("\n\n"))
    }
}

/// Parse a review reply: one `VERDICT:` line plus optional `COMMENTS:` items.
pub fn parse_verdict(text: &str) -> Result<(VerdictStatus, Vec<String>), StageError> {
    let statuses: Vec<VerdictStatus> = verdict_re()
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .map(|m| {
            if m.as_str().eq_ignore_ascii_case("APPROVED") {
                VerdictStatus::Approved
            } else {
                VerdictStatus::NeedsRevision
            }
        })
        .collect();

    let status = match statuses.as_slice() {
        [] => {
            return Err(StageError::VerdictParse {
                reason: "no VERDICT line".into(),
            })
        }
        [first, rest @ ..] if rest.iter().all(|s| s == first) => *first,
        _ => {
            return Err(StageError::VerdictParse {
                reason: "conflicting VERDICT lines".into(),
            })
        }
    };

    let mut comments = Vec::new();
    let mut in_comments = false;
    for line in text.lines() {
        let trimmed = line.trim();
        let bare = trimmed.trim_matches('*').trim();
        if bare.to_ascii_uppercase().starts_with("COMMENTS") && bare.contains(':') {
            in_comments = true;
            continue;
        }
        if !in_comments {
            continue;
        }
        if let Some(item) = trimmed
            .strip_prefix("- ")
            .or_else(|| trimmed.strip_prefix("* "))
        {
            let item = item.trim();
            if !item.is_empty() {
                comments.push(item.to_string());
            }
        }
    }

    Ok((status, comments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_selection_plain_and_fenced() {
        assert_eq!(
            parse_path_selection(r#"["a/A.java", "b/B.java"]"#).unwrap(),
            vec!["a/A.java", "b/B.java"]
        );
        let fenced = "Here you go:\n```json\n[\"src/Auth.java\"]\n```\nDone.";
        assert_eq!(parse_path_selection(fenced).unwrap(), vec!["src/Auth.java"]);
    }

    #[test]
    fn path_selection_rejects_prose() {
        assert!(parse_path_selection("AuthController.java seems relevant").is_none());
        assert!(parse_path_selection("[1, 2]").is_none());
    }

    #[test]
    fn split_stories_happy_path() {
        let text = format!(
            "Intro\n{DEVELOPER_DELIMITER}\nAs a user I can log in.\n{TESTER_DELIMITER}\nVerify login works.\n"
        );
        let pair = split_stories(&text).unwrap();
        assert_eq!(pair.developer_story, "As a user I can log in.");
        assert_eq!(pair.tester_story, "Verify login works.");
    }

    #[test]
    fn split_stories_rejects_missing_duplicate_or_reordered() {
        assert!(split_stories("no delimiters").is_err());
        let dup = format!("{DEVELOPER_DELIMITER}\na\n{DEVELOPER_DELIMITER}\nb\n{TESTER_DELIMITER}\nc");
        assert!(split_stories(&dup).is_err());
        let reordered = format!("{TESTER_DELIMITER}\na\n{DEVELOPER_DELIMITER}\nb");
        assert!(split_stories(&reordered).is_err());
        let empty = format!("{DEVELOPER_DELIMITER}\n  \n{TESTER_DELIMITER}\nc");
        assert!(matches!(split_stories(&empty), Err(StageError::StoryParse { .. })));
    }

    #[test]
    fn extract_code_joins_blocks() {
        let text = "```java\nclass A {}\n```\nand\n```\nclass B {}\n```";
        assert_eq!(extract_code(text).unwrap(), "class A {}\n\nclass B {}");
        assert!(extract_code("no code here").is_none());
        assert!(extract_code("```java\n   \n```").is_none());
    }

    #[test]
    fn verdict_with_comments() {
        let text = "VERDICT: NEEDS_REVISION\nCOMMENTS:\n- missing null check\n- rename method\n";
        let (status, comments) = parse_verdict(text).unwrap();
        assert_eq!(status, VerdictStatus::NeedsRevision);
        assert_eq!(comments, vec!["missing null check", "rename method"]);
    }

    #[test]
    fn verdict_markdown_bold_approved() {
        let (status, comments) = parse_verdict("**VERDICT:** APPROVED").unwrap();
        assert_eq!(status, VerdictStatus::Approved);
        assert!(comments.is_empty());
    }

    #[test]
    fn verdict_missing_or_conflicting() {
        assert!(matches!(
            parse_verdict("Looks good to me"),
            Err(StageError::VerdictParse { .. })
        ));
        assert!(parse_verdict("VERDICT: APPROVED\nVERDICT: NEEDS_REVISION").is_err());
    }
}
