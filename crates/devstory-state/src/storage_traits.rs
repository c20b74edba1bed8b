//! Storage trait definitions for DevStory
//!
//! - `CasStore`: blobs addressed by their SHA-256 digest
//! - `ArtifactStore`: run records, state history and stage artifacts
//!
//! Backends: `fakes` (memory), `FsCasStore`, `SurrealArtifactStore`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StorageError;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

// ---------------------------------------------------------------------------
// Blob store
// ---------------------------------------------------------------------------

/// Lowercase SHA-256 hex of an artifact payload. Only constructed by
/// hashing or by validated parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Hash `data`.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for logs.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = StorageError;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        if s.len() != 64 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(StorageError::InvalidDigest { digest: s });
        }
        Ok(ContentDigest(s.to_ascii_lowercase()))
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable blob storage keyed by content digest. Writing the same bytes
/// twice stores them once.
#[async_trait]
pub trait CasStore: Send + Sync {
    /// Store `data`, returning `ContentDigest::from_bytes(data)`.
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest>;

    /// Bytes for `digest`, or `StorageError::NotFound`.
    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>>;

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool>;
}

// ---------------------------------------------------------------------------
// Run records and stage artifacts
// ---------------------------------------------------------------------------

/// Unique identifier for a pipeline run
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random RunId
    pub fn new() -> Self {
        RunId(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RunId {
    fn from(s: &str) -> Self {
        RunId(s.to_string())
    }
}

/// Address of one persisted artifact: `(run_id, slot, revision)`.
///
/// Single-shot stages write revision 0; revisioned slots (generated code,
/// tests, verdicts) write one revision per review cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArtifactKey {
    pub run_id: RunId,
    pub slot: String,
    pub revision: u32,
}

impl ArtifactKey {
    pub fn new(run_id: &RunId, slot: impl Into<String>, revision: u32) -> Self {
        Self {
            run_id: run_id.clone(),
            slot: slot.into(),
            revision,
        }
    }
}

impl std::fmt::Display for ArtifactKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.run_id, self.slot, self.revision)
    }
}

/// A stored artifact together with its content address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub key: ArtifactKey,
    /// Digest of the canonical JSON bytes held in the blob store
    pub digest: ContentDigest,
    /// Write order within the run (1-based, monotonic)
    pub seq: u64,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Full run record (document)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    /// Project the run belongs to (e.g. "owner/repo")
    pub project_key: String,
    /// Immutable run inputs, written once at creation
    pub metadata: serde_json::Value,
    /// Latest recorded state
    pub state: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One entry of a run's state history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateEntry {
    /// Monotonic sequence number within the run (1-based)
    pub seq: u64,
    pub state: serde_json::Value,
    pub recorded_at: DateTime<Utc>,
}

/// Run and artifact persistence.
///
/// Guarantees:
/// - Runs with distinct IDs never observe each other's artifacts or states.
/// - Artifacts are append-only: re-putting identical content under an
///   existing key is a no-op, different content is `ArtifactConflict`.
/// - `record_state` keeps the full history; `get_run` exposes the latest.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Register a new run, returning its unique ID.
    async fn create_run(
        &self,
        project_key: &str,
        metadata: serde_json::Value,
        initial_state: serde_json::Value,
    ) -> StorageResult<RunId>;

    /// Replace the run's current state and append it to the history.
    async fn record_state(&self, run_id: &RunId, state: serde_json::Value) -> StorageResult<()>;

    /// Retrieve a run record by ID.
    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord>;

    /// Retrieve every recorded state of a run, ordered by seq.
    async fn state_history(&self, run_id: &RunId) -> StorageResult<Vec<StateEntry>>;

    /// List run IDs for a project, newest first.
    async fn list_runs(&self, project_key: &str) -> StorageResult<Vec<RunId>>;

    /// Persist an artifact under `key`.
    async fn put(
        &self,
        key: &ArtifactKey,
        payload: &serde_json::Value,
    ) -> StorageResult<ArtifactRecord>;

    /// Fetch the highest revision stored for `(run_id, slot)`.
    async fn get(&self, run_id: &RunId, slot: &str) -> StorageResult<ArtifactRecord>;

    /// Fetch one exact revision.
    async fn get_revision(&self, key: &ArtifactKey) -> StorageResult<ArtifactRecord>;

    /// Keys of every artifact of a run, in write order.
    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactKey>>;
}

/// Canonical bytes for an artifact payload. Both backends hash these bytes,
/// so identical payloads always share a digest.
pub fn payload_bytes(payload: &serde_json::Value) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(payload)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_try_from_rejects_short_strings() {
        let err = ContentDigest::try_from("abc".to_string()).unwrap_err();
        assert!(matches!(err, StorageError::InvalidDigest { .. }));
    }

    #[test]
    fn digest_try_from_lowercases_valid_hex() {
        let upper = ContentDigest::from_bytes(b"x").as_str().to_ascii_uppercase();
        let parsed = ContentDigest::try_from(upper).unwrap();
        assert_eq!(parsed, ContentDigest::from_bytes(b"x"));
    }

    #[test]
    fn artifact_key_display_includes_revision() {
        let key = ArtifactKey::new(&RunId::from("r1"), "code", 3);
        assert_eq!(key.to_string(), "r1/code@3");
    }

    #[test]
    fn payload_bytes_are_stable_for_equal_values() {
        let a = serde_json::json!({"paths": ["A.java", "B.java"]});
        let b = serde_json::json!({"paths": ["A.java", "B.java"]});
        assert_eq!(payload_bytes(&a).unwrap(), payload_bytes(&b).unwrap());
    }
}
