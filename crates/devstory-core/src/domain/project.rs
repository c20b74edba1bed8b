//! Run inputs: the repository being analysed and the feature request.

use serde::{Deserialize, Serialize};

use super::error::InputError;

/// Ref used when the caller does not name one; resolved to the default branch.
pub const DEFAULT_REF: &str = "HEAD";

/// Repository credential. Never serialized and redacted from `Debug`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        AccessToken(token.into().trim().to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Raw token for building request headers.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            f.write_str("AccessToken(<none>)")
        } else {
            f.write_str("AccessToken(<redacted>)")
        }
    }
}

/// GitHub-hosted repository a run operates on. Immutable once a run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub owner: String,
    pub repo_name: String,
    pub branch_or_ref: String,
    #[serde(skip)]
    pub access_token: AccessToken,
}

impl ProjectRef {
    pub fn new(
        owner: impl Into<String>,
        repo_name: impl Into<String>,
        branch_or_ref: impl Into<String>,
        access_token: AccessToken,
    ) -> Self {
        Self {
            owner: owner.into(),
            repo_name: repo_name.into(),
            branch_or_ref: branch_or_ref.into(),
            access_token,
        }
    }

    /// Parse `https://github.com/<owner>/<repo>[.git][/]` (scheme optional).
    pub fn from_url(
        url: &str,
        access_token: AccessToken,
        branch_or_ref: Option<&str>,
    ) -> Result<Self, InputError> {
        let invalid = || InputError::InvalidRepoUrl {
            url: url.to_string(),
        };

        let trimmed = url.trim();
        let without_scheme = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed);
        let path = without_scheme
            .strip_prefix("www.")
            .unwrap_or(without_scheme)
            .strip_prefix("github.com/")
            .ok_or_else(invalid)?;

        let mut parts = path.trim_end_matches('/').split('/');
        let owner = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let repo = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        if parts.next().is_some() {
            return Err(invalid());
        }
        let repo = repo.strip_suffix(".git").unwrap_or(repo);

        let project = Self::new(
            owner,
            repo,
            branch_or_ref.unwrap_or(DEFAULT_REF),
            access_token,
        );
        project.validate()?;
        Ok(project)
    }

    /// Reject references that cannot name a GitHub repository.
    pub fn validate(&self) -> Result<(), InputError> {
        fn valid_segment(s: &str) -> bool {
            !s.is_empty()
                && s != "."
                && s != ".."
                && s
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        }

        if !valid_segment(&self.owner) {
            return Err(InputError::InvalidProjectRef {
                reason: format!("invalid owner '{}'", self.owner),
            });
        }
        if !valid_segment(&self.repo_name) {
            return Err(InputError::InvalidProjectRef {
                reason: format!("invalid repository name '{}'", self.repo_name),
            });
        }
        let r = self.branch_or_ref.trim();
        if r.is_empty() || r.chars().any(char::is_whitespace) {
            return Err(InputError::InvalidProjectRef {
                reason: format!("invalid ref '{}'", self.branch_or_ref),
            });
        }
        Ok(())
    }

    /// Key runs are listed under: `owner/repo`.
    pub fn project_key(&self) -> String {
        format!("{}/{}", self.owner, self.repo_name)
    }

    pub fn with_token(mut self, token: AccessToken) -> Self {
        self.access_token = token;
        self
    }
}

/// Natural-language feature request. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Query(String);

impl Query {
    pub fn new(text: impl Into<String>) -> Result<Self, InputError> {
        let text = text.into().trim().to_string();
        if text.is_empty() {
            return Err(InputError::EmptyQuery);
        }
        Ok(Query(text))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_url_parses_plain_and_dot_git() {
        let p = ProjectRef::from_url(
            "https://github.com/acme/shop.git",
            AccessToken::default(),
            None,
        )
        .unwrap();
        assert_eq!(p.owner, "acme");
        assert_eq!(p.repo_name, "shop");
        assert_eq!(p.branch_or_ref, DEFAULT_REF);
        assert_eq!(p.project_key(), "acme/shop");

        let p = ProjectRef::from_url("github.com/acme/shop/", AccessToken::default(), Some("dev"))
            .unwrap();
        assert_eq!(p.repo_name, "shop");
        assert_eq!(p.branch_or_ref, "dev");
    }

    #[test]
    fn from_url_rejects_non_repo_urls() {
        for url in [
            "https://gitlab.com/acme/shop",
            "https://github.com/acme",
            "https://github.com/acme/shop/tree/main",
            "",
        ] {
            assert!(
                ProjectRef::from_url(url, AccessToken::default(), None).is_err(),
                "{url} should be rejected"
            );
        }
    }

    #[test]
    fn validate_rejects_blank_ref() {
        let p = ProjectRef::new("acme", "shop", "  ", AccessToken::default());
        assert!(matches!(
            p.validate(),
            Err(InputError::InvalidProjectRef { .. })
        ));
    }

    #[test]
    fn token_is_redacted_and_not_serialized() {
        let p = ProjectRef::new("acme", "shop", "main", AccessToken::new("ghp_secret"));
        assert!(!format!("{p:?}").contains("ghp_secret"));
        let json = serde_json::to_string(&p).unwrap();
        assert!(!json.contains("ghp_secret"));

        let back: ProjectRef = serde_json::from_str(&json).unwrap();
        assert!(back.access_token.is_empty());
    }

    #[test]
    fn query_rejects_whitespace() {
        assert!(matches!(Query::new("   \n"), Err(InputError::EmptyQuery)));
        assert_eq!(Query::new("  add login ").unwrap().as_str(), "add login");
    }
}
