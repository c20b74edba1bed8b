//! Error taxonomy for the pipeline.
//!
//! - `InputError`: rejected before stage 1
//! - `StageError`: raised by a stage, classified for retry and mapped to a
//!   persisted `FailureCause`
//! - `PipelineError`: returned by orchestrator entry points

use devstory_state::StorageError;

use super::artifacts::Role;
use super::run::{FailureCause, RunPhase};
use crate::collaborators::{CompletionError, RepoError};

/// Bad run inputs.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum InputError {
    #[error("query must not be empty")]
    EmptyQuery,

    #[error("invalid project reference: {reason}")]
    InvalidProjectRef { reason: String },

    #[error("not a GitHub repository URL: {url}")]
    InvalidRepoUrl { url: String },
}

/// How the orchestrator treats a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Retried with backoff up to the configured count
    Transient,
    /// Model output failed its structural contract; never retried
    Validation,
    /// Anything else; never retried
    Permanent,
}

/// Errors produced by a single stage.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error("no impacted files found: {reason}")]
    NoImpactedFilesFound { reason: String },

    #[error("source unavailable: all {failed} file fetches failed")]
    SourceUnavailable {
        failed: usize,
        /// Every fetch failed with a transient error
        transient: bool,
    },

    #[error("story response could not be parsed: {reason}")]
    StoryParse { reason: String },

    #[error("story pair is missing the {section} section")]
    MissingStorySection { section: String },

    #[error("{role} generation returned no code block")]
    GenerationEmpty { role: Role },

    #[error("review verdict could not be parsed: {reason}")]
    VerdictParse { reason: String },

    #[error("review limit of {limit} cycles exceeded")]
    ReviewLimitExceeded { limit: u32 },

    #[error("completion failed: {0}")]
    Completion(#[from] CompletionError),

    #[error("repository error: {0}")]
    Repository(#[from] RepoError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StageError {
    pub fn class(&self) -> ErrorClass {
        match self {
            StageError::Completion(CompletionError::RateLimited(_))
            | StageError::Completion(CompletionError::Timeout { .. })
            | StageError::Repository(RepoError::NetworkError(_))
            | StageError::SourceUnavailable {
                transient: true, ..
            } => ErrorClass::Transient,
            StageError::NoImpactedFilesFound { .. }
            | StageError::StoryParse { .. }
            | StageError::MissingStorySection { .. }
            | StageError::GenerationEmpty { .. }
            | StageError::VerdictParse { .. } => ErrorClass::Validation,
            _ => ErrorClass::Permanent,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn cause(&self) -> FailureCause {
        match self {
            StageError::NoImpactedFilesFound { .. } => FailureCause::NoImpactedFilesFound,
            StageError::SourceUnavailable { .. } => FailureCause::SourceUnavailable,
            StageError::StoryParse { .. } => FailureCause::StoryParseError,
            StageError::MissingStorySection { .. } => FailureCause::MissingStorySection,
            StageError::GenerationEmpty { .. } => FailureCause::GenerationEmpty,
            StageError::VerdictParse { .. } => FailureCause::VerdictParseError,
            StageError::ReviewLimitExceeded { .. } => FailureCause::ReviewLimitExceeded,
            StageError::Completion(CompletionError::RateLimited(_)) => FailureCause::RateLimited,
            StageError::Completion(CompletionError::Timeout { .. }) => FailureCause::Timeout,
            StageError::Completion(CompletionError::ModelError(_)) => FailureCause::ModelError,
            StageError::Repository(RepoError::NotFound { .. }) => FailureCause::NotFound,
            StageError::Repository(RepoError::AuthError(_)) => FailureCause::AuthError,
            StageError::Repository(RepoError::NetworkError(_)) => FailureCause::NetworkError,
            StageError::Storage(_) | StageError::Serialization(_) => FailureCause::Storage,
            StageError::Internal(_) => FailureCause::Internal,
        }
    }
}

/// Errors returned by orchestrator entry points.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    #[error("run {run_id} is {phase}; code generation can only be triggered from AwaitingCodeGeneration")]
    NotTriggerable { run_id: String, phase: RunPhase },

    #[error("run {run_id} cannot be resumed: {reason}")]
    NotResumable { run_id: String, reason: String },

    #[error("run {run_id} is already executing")]
    AlreadyActive { run_id: String },

    #[error("run {run_id} still needs repository access; supply the access token again")]
    TokenRequired { run_id: String },

    #[error("storage error: {0}")]
    Storage(StorageError),

    #[error("corrupt run record: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::RunNotFound { run_id } => PipelineError::RunNotFound { run_id },
            other => PipelineError::Storage(other),
        }
    }
}
