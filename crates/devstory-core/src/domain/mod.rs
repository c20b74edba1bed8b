//! Domain models for DevStory.
//!
//! - `ProjectRef` / `Query`: run inputs
//! - stage artifacts: `ImpactSet`, `SourceBundle`, `StoryPair`, `TaskPair`,
//!   `GeneratedArtifact`, `ReviewVerdict`
//! - `RunState`: persisted run progress

pub mod artifacts;
pub mod error;
pub mod project;
pub mod run;

pub use artifacts::{
    ArtifactRef, FileStatus, GeneratedArtifact, ImpactSet, ReviewVerdict, Role, SourceBundle,
    SourceFile, StoryPair, Task, TaskPair, TaskRef, VerdictOrigin, VerdictStatus,
};
pub use error::{ErrorClass, InputError, PipelineError, StageError};
pub use project::{AccessToken, ProjectRef, Query};
pub use run::{
    ArtifactSlot, FailureCause, RunManifest, RunPhase, RunState, StageFailure, StageName,
};
