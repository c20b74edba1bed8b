//! Error types for devstory-integrations

use thiserror::Error;

/// Errors raised while building a client. Request failures are reported
/// through the collaborator error types instead.
#[derive(Error, Debug)]
pub enum IntegrationError {
    /// Required environment variable missing
    #[error("{0} is not set")]
    MissingConfig(&'static str),

    /// Configuration value present but unusable
    #[error("invalid {var}: {reason}")]
    InvalidConfig { var: &'static str, reason: String },

    /// HTTP client construction failed
    #[error("HTTP client error: {0}")]
    Http(String),
}

impl From<reqwest::Error> for IntegrationError {
    fn from(err: reqwest::Error) -> Self {
        IntegrationError::Http(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, IntegrationError>;
