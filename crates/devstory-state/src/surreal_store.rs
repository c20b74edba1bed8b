//! SurrealDB-backed ArtifactStore implementation
//!
//! Run rows, state history and the artifact index live in SurrealDB.
//! Artifact payloads are stored as canonical JSON bytes in a `CasStore`;
//! the index row only records the digest.
//!
//! `seq` is allocated per run from the current row count. Allocation and
//! insert happen under `write_lock`, and the `(run_id, seq)` unique indexes
//! turn a cross-process collision into a retried insert.

use std::sync::Arc;

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::{CloudConfig, StoreConfig, DEFAULT_DATABASE, DEFAULT_NAMESPACE};
use crate::error::StorageError;
use crate::fakes::MemoryCasStore;
use crate::migrations;
use crate::schema::{CountRow, DbArtifact, DbRun, DbStateEntry};
use crate::storage_traits::{
    payload_bytes, ArtifactKey, ArtifactRecord, ArtifactStore, CasStore, ContentDigest, RunId,
    RunRecord, StateEntry, StorageResult,
};

/// Insert attempts before a `seq` collision is reported as a backend error.
const SEQ_ATTEMPTS: u32 = 5;

/// SurrealDB-backed implementation of [`ArtifactStore`].
pub struct SurrealArtifactStore {
    db: Surreal<Any>,
    blobs: Arc<dyn CasStore>,
    write_lock: Mutex<()>,
}

impl SurrealArtifactStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `devstory/main`, runs `init_schema`,
    /// and keeps blobs in a `MemoryCasStore`.
    pub async fn in_memory() -> StorageResult<Self> {
        let db = connect_url("mem://", DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?;
        info!("SurrealArtifactStore connected (in-memory)");
        Ok(Self {
            db,
            blobs: Arc::new(MemoryCasStore::new()),
            write_lock: Mutex::new(()),
        })
    }

    /// Connect according to `config`, storing payload blobs in `blobs`.
    pub async fn connect(config: &StoreConfig, blobs: Arc<dyn CasStore>) -> StorageResult<Self> {
        let db = match config {
            StoreConfig::Cloud(cloud) => connect_cloud(cloud).await?,
            StoreConfig::Url(url) => connect_url(url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?,
            StoreConfig::Local(dir) => {
                let path = dir.join("db");
                std::fs::create_dir_all(&path).map_err(|e| {
                    StorageError::Connection(format!(
                        "Failed to create database directory {}: {}",
                        path.display(),
                        e
                    ))
                })?;
                let url = format!("surrealkv://{}", path.display());
                connect_url(&url, DEFAULT_NAMESPACE, DEFAULT_DATABASE).await?
            }
        };
        info!(backend = %config.describe(), "SurrealArtifactStore connected");
        Ok(Self {
            db,
            blobs,
            write_lock: Mutex::new(()),
        })
    }

    /// Create from environment variables (see [`StoreConfig::from_env`]).
    pub async fn from_env(blobs: Arc<dyn CasStore>) -> StorageResult<Self> {
        Self::connect(&StoreConfig::from_env(), blobs).await
    }

    // -- private helpers -----------------------------------------------------

    async fn fetch_run(&self, rid: &str) -> StorageResult<DbRun> {
        let rid_owned = rid.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE run_id = $rid")
            .bind(("rid", rid_owned))
            .await?;

        let rows: Vec<DbRun> = res.take(0)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: rid.to_string(),
            })
    }

    async fn count(&self, table: &str, rid: &str) -> StorageResult<u64> {
        let sql = format!("SELECT count() AS count FROM {table} WHERE run_id = $rid GROUP ALL");
        let mut res = self
            .db
            .query(sql)
            .bind(("rid", rid.to_string()))
            .await?;
        let rows: Vec<CountRow> = res.take(0)?;
        Ok(rows.first().map(|r| r.count).unwrap_or(0))
    }

    /// `Some(existing)` when `key` already holds `digest`, a conflict when it
    /// holds anything else.
    async fn existing_revision(
        &self,
        key: &ArtifactKey,
        digest: &ContentDigest,
    ) -> StorageResult<Option<ArtifactRecord>> {
        match self.get_revision(key).await {
            Ok(existing) if existing.digest == *digest => Ok(Some(existing)),
            Ok(existing) => Err(StorageError::ArtifactConflict {
                run_id: key.run_id.0.clone(),
                slot: key.slot.clone(),
                revision: key.revision,
                existing: existing.digest.to_string(),
            }),
            Err(StorageError::ArtifactNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn load_artifact(&self, row: DbArtifact) -> StorageResult<ArtifactRecord> {
        let digest = ContentDigest::try_from(row.digest)?;
        let bytes = self.blobs.get(&digest).await?;
        let payload = serde_json::from_slice(&bytes)?;
        Ok(ArtifactRecord {
            key: ArtifactKey {
                run_id: RunId(row.run_id),
                slot: row.slot,
                revision: row.revision,
            },
            digest,
            seq: row.seq,
            payload,
            created_at: row.created_at,
        })
    }

    fn db_run_to_record(row: DbRun) -> StorageResult<RunRecord> {
        Ok(RunRecord {
            run_id: RunId(row.run_id),
            project_key: row.project_key,
            metadata: serde_json::from_str(&row.metadata_json)?,
            state: serde_json::from_str(&row.state_json)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// A unique-index violation, raised when a concurrent writer won the slot.
fn is_index_collision(err: &surrealdb::Error) -> bool {
    err.to_string().contains("already contains")
}

async fn connect_url(url: &str, ns: &str, database: &str) -> StorageResult<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(url)
        .await
        .map_err(|e| StorageError::Connection(format!("Failed to connect to {}: {}", url, e)))?;

    db.use_ns(ns)
        .use_db(database)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

async fn connect_cloud(config: &CloudConfig) -> StorageResult<Surreal<Any>> {
    let db = surrealdb::engine::any::connect(&config.endpoint)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    if config.is_root {
        db.signin(Root {
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StorageError::Connection(format!("Root auth failed: {e}")))?;
    } else {
        db.signin(Database {
            namespace: &config.namespace,
            database: &config.database,
            username: &config.username,
            password: &config.password,
        })
        .await
        .map_err(|e| StorageError::Connection(format!("DB auth failed: {e}")))?;
    }

    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

    migrations::init_schema(&db).await?;
    Ok(db)
}

#[async_trait]
impl ArtifactStore for SurrealArtifactStore {
    async fn create_run(
        &self,
        project_key: &str,
        metadata: serde_json::Value,
        initial_state: serde_json::Value,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let state_json = serde_json::to_string(&initial_state)?;
        let db_row = DbRun::new(
            run_id.0.clone(),
            project_key.to_string(),
            serde_json::to_string(&metadata)?,
            state_json.clone(),
        );

        debug!(run_id = %run_id, project = project_key, "creating run");

        let _created: Option<DbRun> = self.db.create("runs").content(db_row).await?;
        let _entry: Option<DbStateEntry> = self
            .db
            .create("run_states")
            .content(DbStateEntry::new(run_id.0.clone(), 1, state_json))
            .await?;

        Ok(run_id)
    }

    async fn record_state(&self, run_id: &RunId, state: serde_json::Value) -> StorageResult<()> {
        let state_json = serde_json::to_string(&state)?;
        let _guard = self.write_lock.lock().await;
        let mut row = self.fetch_run(&run_id.0).await?;

        let mut attempt = 0;
        loop {
            attempt += 1;
            let seq = self.count("run_states", &run_id.0).await? + 1;
            let created: Result<Option<DbStateEntry>, surrealdb::Error> = self
                .db
                .create("run_states")
                .content(DbStateEntry::new(run_id.0.clone(), seq, state_json.clone()))
                .await;
            match created {
                Ok(_) => break,
                Err(e) if is_index_collision(&e) && attempt < SEQ_ATTEMPTS => {
                    warn!(run_id = %run_id, seq, attempt, "state seq taken, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        row.state_json = state_json;
        row.updated_at = chrono::Utc::now();
        let rid_owned = run_id.0.clone();

        self.db
            .query("UPDATE runs CONTENT $row WHERE run_id = $rid")
            .bind(("row", row))
            .bind(("rid", rid_owned))
            .await?
            .check()?;

        Ok(())
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        let row = self.fetch_run(&run_id.0).await?;
        Self::db_run_to_record(row)
    }

    async fn state_history(&self, run_id: &RunId) -> StorageResult<Vec<StateEntry>> {
        self.fetch_run(&run_id.0).await?;

        let mut res = self
            .db
            .query("SELECT * FROM run_states WHERE run_id = $rid ORDER BY seq ASC")
            .bind(("rid", run_id.0.clone()))
            .await?;
        let rows: Vec<DbStateEntry> = res.take(0)?;

        rows.into_iter()
            .map(|r| {
                Ok(StateEntry {
                    seq: r.seq,
                    state: serde_json::from_str(&r.state_json)?,
                    recorded_at: r.recorded_at,
                })
            })
            .collect()
    }

    async fn list_runs(&self, project_key: &str) -> StorageResult<Vec<RunId>> {
        let mut res = self
            .db
            .query("SELECT * FROM runs WHERE project_key = $pk ORDER BY created_at DESC")
            .bind(("pk", project_key.to_string()))
            .await?;
        let rows: Vec<DbRun> = res.take(0)?;
        Ok(rows.into_iter().map(|r| RunId(r.run_id)).collect())
    }

    async fn put(
        &self,
        key: &ArtifactKey,
        payload: &serde_json::Value,
    ) -> StorageResult<ArtifactRecord> {
        self.fetch_run(&key.run_id.0).await?;
        let bytes = payload_bytes(payload)?;
        let digest = ContentDigest::from_bytes(&bytes);

        let _guard = self.write_lock.lock().await;
        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(existing) = self.existing_revision(key, &digest).await? {
                return Ok(existing);
            }

            self.blobs.put(&bytes).await?;
            let seq = self.count("artifacts", &key.run_id.0).await? + 1;
            let row = DbArtifact::new(
                key.run_id.0.clone(),
                key.slot.clone(),
                key.revision,
                digest.as_str().to_string(),
                seq,
            );
            let created_at = row.created_at;

            debug!(artifact = %key, digest = digest.short(), seq, "storing artifact");

            let created: Result<Option<DbArtifact>, surrealdb::Error> =
                self.db.create("artifacts").content(row).await;
            match created {
                Ok(_) => {
                    return Ok(ArtifactRecord {
                        key: key.clone(),
                        digest,
                        seq,
                        payload: payload.clone(),
                        created_at,
                    })
                }
                // another writer took this seq or this key; re-check and re-allocate
                Err(e) if is_index_collision(&e) && attempt < SEQ_ATTEMPTS => {
                    warn!(artifact = %key, seq, attempt, "artifact index collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn get(&self, run_id: &RunId, slot: &str) -> StorageResult<ArtifactRecord> {
        self.fetch_run(&run_id.0).await?;

        let mut res = self
            .db
            .query(
                "SELECT * FROM artifacts WHERE run_id = $rid AND slot = $slot \
                 ORDER BY revision DESC LIMIT 1",
            )
            .bind(("rid", run_id.0.clone()))
            .bind(("slot", slot.to_string()))
            .await?;
        let rows: Vec<DbArtifact> = res.take(0)?;

        match rows.into_iter().next() {
            Some(row) => self.load_artifact(row).await,
            None => Err(StorageError::ArtifactNotFound {
                run_id: run_id.0.clone(),
                slot: slot.to_string(),
                revision: None,
            }),
        }
    }

    async fn get_revision(&self, key: &ArtifactKey) -> StorageResult<ArtifactRecord> {
        let mut res = self
            .db
            .query(
                "SELECT * FROM artifacts WHERE run_id = $rid AND slot = $slot \
                 AND revision = $rev",
            )
            .bind(("rid", key.run_id.0.clone()))
            .bind(("slot", key.slot.clone()))
            .bind(("rev", key.revision))
            .await?;
        let rows: Vec<DbArtifact> = res.take(0)?;

        match rows.into_iter().next() {
            Some(row) => self.load_artifact(row).await,
            None => Err(StorageError::ArtifactNotFound {
                run_id: key.run_id.0.clone(),
                slot: key.slot.clone(),
                revision: Some(key.revision),
            }),
        }
    }

    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactKey>> {
        self.fetch_run(&run_id.0).await?;

        let mut res = self
            .db
            .query("SELECT * FROM artifacts WHERE run_id = $rid ORDER BY seq ASC, created_at ASC")
            .bind(("rid", run_id.0.clone()))
            .await?;
        let rows: Vec<DbArtifact> = res.take(0)?;

        Ok(rows
            .into_iter()
            .map(|r| ArtifactKey {
                run_id: RunId(r.run_id),
                slot: r.slot,
                revision: r.revision,
            })
            .collect())
    }
}
