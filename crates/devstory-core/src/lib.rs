//! DevStory Core Library
//!
//! Domain model, stage contracts and the pipeline orchestrator that turns a
//! feature request plus a repository into stories, code and tests.

pub mod collaborators;
pub mod config;
pub mod context;
pub mod domain;
pub mod fakes;
pub mod java_outline;
pub mod metrics;
pub mod obs;
pub mod orchestrator;
pub mod parsing;
pub mod prompts;
pub mod recorder;
pub mod retry;
pub mod stages;
pub mod telemetry;

pub use collaborators::{
    CompletionError, CompletionService, ModelTier, RepoError, RepositorySource,
};

pub use config::{ConfigError, PipelineConfig};

pub use domain::{
    AccessToken, ArtifactRef, ArtifactSlot, FailureCause, FileStatus, GeneratedArtifact,
    ImpactSet, InputError, PipelineError, ProjectRef, Query, ReviewVerdict, Role, RunManifest,
    RunPhase, RunState, SourceBundle, SourceFile, StageError, StageFailure, StageName,
    StoryPair, Task, TaskPair, TaskRef, VerdictOrigin, VerdictStatus,
};

pub use orchestrator::{LatestArtifacts, PipelineOrchestrator, RunSnapshot};

pub use recorder::RunRecorder;

pub use retry::RetryPolicy;

pub use devstory_state::{ArtifactStore, RunId};
