//! SurrealDB schema initialization
//!
//! Defines the run, state-history and artifact tables with their indexes.
//! Safe to call on every connection.

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::storage_traits::StorageResult;

/// Initialize all DevStory tables in SurrealDB (idempotent).
pub async fn init_schema(db: &Surreal<Any>) -> StorageResult<()> {
    info!("Initializing DevStory SurrealDB schema");

    init_runs_table(db).await?;
    init_run_states_table(db).await?;
    init_artifacts_table(db).await?;

    info!("DevStory schema initialization complete");
    Ok(())
}

/// `runs`: one row per run, `run_id` unique, listed per project newest first.
async fn init_runs_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_project_created ON TABLE runs COLUMNS project_key, created_at;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// `run_states`: append-only state history, `(run_id, seq)` unique.
async fn init_run_states_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing run_states table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS run_states
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_run_state_seq ON TABLE run_states COLUMNS run_id, seq UNIQUE;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}

/// `artifacts`: append-only, `(run_id, slot, revision)` and `(run_id, seq)` unique.
async fn init_artifacts_table(db: &Surreal<Any>) -> StorageResult<()> {
    debug!("Initializing artifacts table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS artifacts
            SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE INDEX IF NOT EXISTS idx_artifact_key ON TABLE artifacts COLUMNS run_id, slot, revision UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_artifact_seq ON TABLE artifacts COLUMNS run_id, seq UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_artifact_run ON TABLE artifacts COLUMNS run_id;
    "#;

    db.query(sql).await?.check()?;
    Ok(())
}
