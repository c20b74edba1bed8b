//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryCasStore` and `MemoryArtifactStore` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

fn lock<T>(m: &Mutex<T>) -> StorageResult<MutexGuard<'_, T>> {
    m.lock()
        .map_err(|e| StorageError::Backend(format!("lock poisoned: {e}")))
}

// ---------------------------------------------------------------------------
// MemoryCasStore
// ---------------------------------------------------------------------------

/// In-memory content-addressed store backed by a `HashMap<digest, bytes>`.
#[derive(Debug, Default)]
pub struct MemoryCasStore {
    store: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCasStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held.
    pub fn len(&self) -> usize {
        self.store.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CasStore for MemoryCasStore {
    async fn put(&self, data: &[u8]) -> StorageResult<ContentDigest> {
        let digest = ContentDigest::from_bytes(data);
        let mut store = lock(&self.store)?;
        store
            .entry(digest.as_str().to_string())
            .or_insert_with(|| data.to_vec());
        Ok(digest)
    }

    async fn get(&self, digest: &ContentDigest) -> StorageResult<Vec<u8>> {
        let store = lock(&self.store)?;
        store
            .get(digest.as_str())
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                digest: digest.as_str().to_string(),
            })
    }

    async fn contains(&self, digest: &ContentDigest) -> StorageResult<bool> {
        let store = lock(&self.store)?;
        Ok(store.contains_key(digest.as_str()))
    }
}

// ---------------------------------------------------------------------------
// MemoryArtifactStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct MemRun {
    record: RunRecord,
    history: Vec<StateEntry>,
    artifacts: Vec<ArtifactRecord>,
}

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<String, MemRun>,
    /// Creation order, oldest first
    order: Vec<String>,
}

/// In-memory artifact store backed by a `HashMap<RunId, MemRun>`.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    inner: Mutex<Inner>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn run_not_found(run_id: &RunId) -> StorageError {
    StorageError::RunNotFound {
        run_id: run_id.0.clone(),
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn create_run(
        &self,
        project_key: &str,
        metadata: serde_json::Value,
        initial_state: serde_json::Value,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let now = Utc::now();
        let record = RunRecord {
            run_id: run_id.clone(),
            project_key: project_key.to_string(),
            metadata,
            state: initial_state.clone(),
            created_at: now,
            updated_at: now,
        };
        let mut inner = lock(&self.inner)?;
        inner.runs.insert(
            run_id.0.clone(),
            MemRun {
                record,
                history: vec![StateEntry {
                    seq: 1,
                    state: initial_state,
                    recorded_at: now,
                }],
                artifacts: Vec::new(),
            },
        );
        inner.order.push(run_id.0.clone());
        Ok(run_id)
    }

    async fn record_state(&self, run_id: &RunId, state: serde_json::Value) -> StorageResult<()> {
        let mut inner = lock(&self.inner)?;
        let run = inner
            .runs
            .get_mut(&run_id.0)
            .ok_or_else(|| run_not_found(run_id))?;
        let now = Utc::now();
        let seq = run.history.len() as u64 + 1;
        run.history.push(StateEntry {
            seq,
            state: state.clone(),
            recorded_at: now,
        });
        run.record.state = state;
        run.record.updated_at = now;
        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let inner = lock(&self.inner)?;
        inner
            .runs
            .get(&run_id.0)
            .map(|r| r.record.clone())
            .ok_or_else(|| run_not_found(run_id))
    }

    async fn state_history(&self, run_id: &RunId) -> StorageResult<Vec<StateEntry>> {
        let inner = lock(&self.inner)?;
        inner
            .runs
            .get(&run_id.0)
            .map(|r| r.history.clone())
            .ok_or_else(|| run_not_found(run_id))
    }

    async fn list_runs(&self, project_key: &str) -> StorageResult<Vec<RunId>> {
        let inner = lock(&self.inner)?;
        Ok(inner
            .order
            .iter()
            .rev()
            .filter(|id| {
                inner
                    .runs
                    .get(*id)
                    .is_some_and(|r| r.record.project_key == project_key)
            })
            .map(|id| RunId(id.clone()))
            .collect())
    }

    async fn put(
        &self,
        key: &ArtifactKey,
        payload: &serde_json::Value,
    ) -> StorageResult<ArtifactRecord> {
        let digest = ContentDigest::from_bytes(&payload_bytes(payload)?);
        let mut inner = lock(&self.inner)?;
        let run = inner
            .runs
            .get_mut(&key.run_id.0)
            .ok_or_else(|| run_not_found(&key.run_id))?;

        if let Some(existing) = run.artifacts.iter().find(|a| &a.key == key) {
            if existing.digest == digest {
                return Ok(existing.clone());
            }
            return Err(StorageError::ArtifactConflict {
                run_id: key.run_id.0.clone(),
                slot: key.slot.clone(),
                revision: key.revision,
                existing: existing.digest.to_string(),
            });
        }

        let record = ArtifactRecord {
            key: key.clone(),
            digest,
            seq: run.artifacts.len() as u64 + 1,
            payload: payload.clone(),
            created_at: Utc::now(),
        };
        run.artifacts.push(record.clone());
        Ok(record)
    }

    async fn get(&self, run_id: &RunId, slot: &str) -> StorageResult<ArtifactRecord> {
        let inner = lock(&self.inner)?;
        let run = inner
            .runs
            .get(&run_id.0)
            .ok_or_else(|| run_not_found(run_id))?;
        run.artifacts
            .iter()
            .filter(|a| a.key.slot == slot)
            .max_by_key(|a| a.key.revision)
            .cloned()
            .ok_or_else(|| StorageError::ArtifactNotFound {
                run_id: run_id.0.clone(),
                slot: slot.to_string(),
                revision: None,
            })
    }

    async fn get_revision(&self, key: &ArtifactKey) -> StorageResult<ArtifactRecord> {
        let inner = lock(&self.inner)?;
        let run = inner
            .runs
            .get(&key.run_id.0)
            .ok_or_else(|| run_not_found(&key.run_id))?;
        run.artifacts
            .iter()
            .find(|a| &a.key == key)
            .cloned()
            .ok_or_else(|| StorageError::ArtifactNotFound {
                run_id: key.run_id.0.clone(),
                slot: key.slot.clone(),
                revision: Some(key.revision),
            })
    }

    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactKey>> {
        let inner = lock(&self.inner)?;
        let run = inner
            .runs
            .get(&run_id.0)
            .ok_or_else(|| run_not_found(run_id))?;
        Ok(run.artifacts.iter().map(|a| a.key.clone()).collect())
    }
}
