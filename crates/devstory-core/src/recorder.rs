//! Run recorder: typed artifact and state persistence for one run.
//!
//! Bridges domain artifacts to [`ArtifactStore`] keys. Every write goes
//! through here so each persisted artifact and transition is logged once.

use std::sync::Arc;

use devstory_state::{ArtifactKey, ArtifactRecord, ArtifactStore, RunId, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::domain::{ArtifactRef, ArtifactSlot, RunState};
use crate::obs;

/// Adapter that records one run's artifacts and state changes.
#[derive(Clone)]
pub struct RunRecorder {
    store: Arc<dyn ArtifactStore>,
    run_id: RunId,
}

impl RunRecorder {
    pub fn new(store: Arc<dyn ArtifactStore>, run_id: RunId) -> Self {
        Self { store, run_id }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Serialize and persist `value` under `(run, slot, revision)`.
    pub async fn persist<T: Serialize>(
        &self,
        slot: ArtifactSlot,
        revision: u32,
        value: &T,
    ) -> Result<ArtifactRef, StorageError> {
        let payload = serde_json::to_value(value)?;
        let key = ArtifactKey::new(&self.run_id, slot.as_str(), revision);
        let record = self.store.put(&key, &payload).await?;
        obs::emit_artifact_persisted(slot.as_str(), revision, record.digest.short());
        Ok(ArtifactRef::from(&record))
    }

    /// Load one exact revision; `None` when it was never written.
    pub async fn load<T: DeserializeOwned>(
        &self,
        slot: ArtifactSlot,
        revision: u32,
    ) -> Result<Option<(T, ArtifactRef)>, StorageError> {
        let key = ArtifactKey::new(&self.run_id, slot.as_str(), revision);
        decode(self.store.get_revision(&key).await)
    }

    /// Load the highest revision of `slot`; `None` when the slot is empty.
    pub async fn latest<T: DeserializeOwned>(
        &self,
        slot: ArtifactSlot,
    ) -> Result<Option<(T, ArtifactRef)>, StorageError> {
        decode(self.store.get(&self.run_id, slot.as_str()).await)
    }

    /// Record a state change in the run's history.
    pub async fn transition(&self, state: &RunState) -> Result<(), StorageError> {
        obs::emit_transition(state.phase, state.revision_cycle);
        self.store
            .record_state(&self.run_id, serde_json::to_value(state)?)
            .await
    }
}

fn decode<T: DeserializeOwned>(
    fetched: Result<ArtifactRecord, StorageError>,
) -> Result<Option<(T, ArtifactRef)>, StorageError> {
    match fetched {
        Ok(record) => {
            let value = serde_json::from_value(record.payload.clone())?;
            Ok(Some((value, ArtifactRef::from(&record))))
        }
        Err(StorageError::ArtifactNotFound { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}
