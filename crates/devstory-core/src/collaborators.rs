//! Contracts for the external services the stages call.
//!
//! Implementations live in `devstory-integrations`; scripted fakes for tests
//! live in [`crate::fakes`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::ProjectRef;

/// Repository access failures. `NetworkError` is the only transient kind.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RepoError {
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("authentication failed: {0}")]
    AuthError(String),

    #[error("network error: {0}")]
    NetworkError(String),
}

/// Source-code retrieval against a GitHub-like API.
#[async_trait]
pub trait RepositorySource: Send + Sync {
    /// Every file path at `project.branch_or_ref`, in listing order.
    async fn list_files(&self, project: &ProjectRef) -> Result<Vec<String>, RepoError>;

    /// Raw text of one file.
    async fn read_file(&self, project: &ProjectRef, path: &str) -> Result<String, RepoError>;
}

/// Quality/cost class of a completion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelTier {
    Fast,
    Quality,
}

impl std::fmt::Display for ModelTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelTier::Fast => f.write_str("fast"),
            ModelTier::Quality => f.write_str("quality"),
        }
    }
}

/// Completion failures. `RateLimited` and `Timeout` are transient.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum CompletionError {
    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("model error: {0}")]
    ModelError(String),
}

/// Black-box text completion. Responses are untrusted text.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<String, CompletionError>;
}
