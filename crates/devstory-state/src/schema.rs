//! SurrealDB row types
//!
//! Rows mirror the `storage_traits` types but keep JSON documents as
//! serialized strings and digests as plain hex, converting at the boundary
//! in `surreal_store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Module for serializing chrono DateTime to SurrealDB datetime format
mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let sd = SurrealDatetime::from(*date);
        serde::Serialize::serialize(&sd, serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let sd = SurrealDatetime::deserialize(deserializer)?;
        Ok(DateTime::from(sd))
    }
}

/// Run row - one per pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbRun {
    /// SurrealDB record ID
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    /// "owner/repo"
    pub project_key: String,
    /// Run inputs (JSON text)
    pub metadata_json: String,
    /// Latest state (JSON text)
    pub state_json: String,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "surreal_datetime")]
    pub updated_at: DateTime<Utc>,
}

impl DbRun {
    pub fn new(
        run_id: String,
        project_key: String,
        metadata_json: String,
        state_json: String,
    ) -> Self {
        let now = Utc::now();
        DbRun {
            id: None,
            run_id,
            project_key,
            metadata_json,
            state_json,
            created_at: now,
            updated_at: now,
        }
    }
}

/// State history row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStateEntry {
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    /// 1-based, monotonic within a run
    pub seq: u64,
    pub state_json: String,
    #[serde(with = "surreal_datetime")]
    pub recorded_at: DateTime<Utc>,
}

impl DbStateEntry {
    pub fn new(run_id: String, seq: u64, state_json: String) -> Self {
        DbStateEntry {
            id: None,
            run_id,
            seq,
            state_json,
            recorded_at: Utc::now(),
        }
    }
}

/// Artifact index row; the payload bytes live in the blob store under `digest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbArtifact {
    pub id: Option<surrealdb::sql::Thing>,
    pub run_id: String,
    pub slot: String,
    pub revision: u32,
    pub digest: String,
    pub seq: u64,
    #[serde(with = "surreal_datetime")]
    pub created_at: DateTime<Utc>,
}

impl DbArtifact {
    pub fn new(run_id: String, slot: String, revision: u32, digest: String, seq: u64) -> Self {
        DbArtifact {
            id: None,
            run_id,
            slot,
            revision,
            digest,
            seq,
            created_at: Utc::now(),
        }
    }
}

/// Row shape for `SELECT count() ... GROUP ALL`
#[derive(Debug, Deserialize)]
pub struct CountRow {
    pub count: u64,
}
