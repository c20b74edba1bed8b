//! Error types for devstory-state

use thiserror::Error;

/// Errors that can occur in the persistence layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Blob not present in the content-addressed store
    #[error("blob not found: {digest}")]
    NotFound { digest: String },

    /// Digest string is not a valid SHA-256 hex value
    #[error("invalid digest: {digest}")]
    InvalidDigest { digest: String },

    /// No run registered under this ID
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// No artifact stored under this key
    #[error("artifact not found: run {run_id}, slot {slot}, revision {revision:?}")]
    ArtifactNotFound {
        run_id: String,
        slot: String,
        revision: Option<u32>,
    },

    /// A different payload already occupies this key; artifacts are append-only
    #[error("artifact conflict: run {run_id}, slot {slot}, revision {revision} already holds {existing}")]
    ArtifactConflict {
        run_id: String,
        slot: String,
        revision: u32,
        existing: String,
    },

    /// Backend connection could not be established
    #[error("connection failed: {0}")]
    Connection(String),

    /// Backend query or write failed
    #[error("backend error: {0}")]
    Backend(String),

    /// Payload could not be encoded or decoded
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Filesystem error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<surrealdb::Error> for StorageError {
    fn from(err: surrealdb::Error) -> Self {
        StorageError::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_message_names_key_and_existing_digest() {
        let err = StorageError::ArtifactConflict {
            run_id: "run-1".to_string(),
            slot: "code".to_string(),
            revision: 2,
            existing: "abc123".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("run-1"));
        assert!(msg.contains("code"));
        assert!(msg.contains("abc123"));
    }

    #[test]
    fn serde_error_maps_to_serialization() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: StorageError = bad.into();
        assert!(matches!(err, StorageError::Serialization(_)));
    }
}
