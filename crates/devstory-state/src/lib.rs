//! devstory-state: persistence for DevStory runs
//!
//! Stores run records, their state history, and every intermediate
//! artifact a pipeline run produces, addressed by `(run_id, slot, revision)`.
//!
//! ## Key Components
//!
//! - `ArtifactStore`: run + artifact persistence trait
//! - `CasStore`: content-addressed blob storage trait
//! - `SurrealArtifactStore`: SurrealDB index over a blob store
//! - `FsCasStore`: sharded on-disk blobs
//! - `fakes`: in-memory implementations for tests

pub mod config;
mod error;
pub mod fakes;
mod fs_cas;
mod migrations;
mod schema;
pub mod storage_traits;
pub mod surreal_store;

pub use config::{CloudConfig, StoreConfig};
pub use error::StorageError;
pub use fs_cas::FsCasStore;
pub use storage_traits::{
    ArtifactKey, ArtifactRecord, ArtifactStore, CasStore, ContentDigest, RunId, RunRecord,
    StateEntry, StorageResult,
};
pub use surreal_store::SurrealArtifactStore;
