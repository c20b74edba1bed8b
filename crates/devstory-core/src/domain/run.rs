//! Run progress: phases, stage names, failure causes and the persisted RunState.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::project::{ProjectRef, Query};

/// One unit of work in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageName {
    Analyzing,
    Reading,
    StoryGen,
    Assigning,
    Generating,
    Reviewing,
}

impl StageName {
    /// Stages in execution order.
    pub const ORDER: [StageName; 6] = [
        StageName::Analyzing,
        StageName::Reading,
        StageName::StoryGen,
        StageName::Assigning,
        StageName::Generating,
        StageName::Reviewing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::Analyzing => "Analyzing",
            StageName::Reading => "Reading",
            StageName::StoryGen => "StoryGen",
            StageName::Assigning => "Assigning",
            StageName::Generating => "Generating",
            StageName::Reviewing => "Reviewing",
        }
    }

    pub fn phase(&self) -> RunPhase {
        match self {
            StageName::Analyzing => RunPhase::Analyzing,
            StageName::Reading => RunPhase::Reading,
            StageName::StoryGen => RunPhase::StoryGen,
            StageName::Assigning => RunPhase::Assigning,
            StageName::Generating => RunPhase::Generating,
            StageName::Reviewing => RunPhase::Reviewing,
        }
    }
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run progress marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunPhase {
    Analyzing,
    Reading,
    StoryGen,
    /// Stories are persisted; the run waits for an explicit generation trigger.
    AwaitingCodeGeneration,
    Assigning,
    Generating,
    Reviewing,
    Completed,
    Failed,
    Cancelled,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunPhase::Completed | RunPhase::Failed | RunPhase::Cancelled
        )
    }

    /// Stage executing in this phase, if any.
    pub fn stage(&self) -> Option<StageName> {
        StageName::ORDER.into_iter().find(|s| s.phase() == *self)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunPhase::AwaitingCodeGeneration => "AwaitingCodeGeneration",
            RunPhase::Completed => "Completed",
            RunPhase::Failed => "Failed",
            RunPhase::Cancelled => "Cancelled",
            other => other.stage().map(|s| s.as_str()).unwrap_or("Unknown"),
        }
    }
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Serialisable reason a stage failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureCause {
    NoImpactedFilesFound,
    SourceUnavailable,
    StoryParseError,
    MissingStorySection,
    GenerationEmpty,
    VerdictParseError,
    ReviewLimitExceeded,
    Timeout,
    RateLimited,
    ModelError,
    NetworkError,
    NotFound,
    AuthError,
    Storage,
    Internal,
}

impl FailureCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCause::NoImpactedFilesFound => "NoImpactedFilesFound",
            FailureCause::SourceUnavailable => "SourceUnavailable",
            FailureCause::StoryParseError => "StoryParseError",
            FailureCause::MissingStorySection => "MissingStorySection",
            FailureCause::GenerationEmpty => "GenerationEmpty",
            FailureCause::VerdictParseError => "VerdictParseError",
            FailureCause::ReviewLimitExceeded => "ReviewLimitExceeded",
            FailureCause::Timeout => "Timeout",
            FailureCause::RateLimited => "RateLimited",
            FailureCause::ModelError => "ModelError",
            FailureCause::NetworkError => "NetworkError",
            FailureCause::NotFound => "NotFound",
            FailureCause::AuthError => "AuthError",
            FailureCause::Storage => "Storage",
            FailureCause::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: StageName,
    pub cause: FailureCause,
    pub message: String,
    /// Attempts made before giving up (1 = no retries)
    pub attempts: u32,
}

/// Persisted run progress. Owned by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub phase: RunPhase,
    /// Current review cycle (0 before the first generation)
    pub revision_cycle: u32,
    /// Whether the run proceeds past StoryGen into code generation
    pub generation_requested: bool,
    pub failure: Option<StageFailure>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    pub fn initial(generation_requested: bool) -> Self {
        Self {
            phase: RunPhase::Analyzing,
            revision_cycle: 0,
            generation_requested,
            failure: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_phase(&self, phase: RunPhase) -> Self {
        Self {
            phase,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    pub fn failed(&self, failure: StageFailure) -> Self {
        Self {
            phase: RunPhase::Failed,
            failure: Some(failure),
            updated_at: Utc::now(),
            ..self.clone()
        }
    }
}

/// Artifact slots, in the order the pipeline fills them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactSlot {
    ImpactSet,
    SourceBundle,
    Stories,
    Tasks,
    Code,
    Tests,
    Verdict,
}

impl ArtifactSlot {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactSlot::ImpactSet => "impact_set",
            ArtifactSlot::SourceBundle => "source_bundle",
            ArtifactSlot::Stories => "stories",
            ArtifactSlot::Tasks => "tasks",
            ArtifactSlot::Code => "code",
            ArtifactSlot::Tests => "tests",
            ArtifactSlot::Verdict => "verdict",
        }
    }

    pub fn stage(&self) -> StageName {
        match self {
            ArtifactSlot::ImpactSet => StageName::Analyzing,
            ArtifactSlot::SourceBundle => StageName::Reading,
            ArtifactSlot::Stories => StageName::StoryGen,
            ArtifactSlot::Tasks => StageName::Assigning,
            ArtifactSlot::Code | ArtifactSlot::Tests => StageName::Generating,
            ArtifactSlot::Verdict => StageName::Reviewing,
        }
    }
}

impl std::fmt::Display for ArtifactSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable run inputs stored with the run record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Token is skipped on serialization
    pub project: ProjectRef,
    pub query: Query,
    /// Whether the run was started with a token
    pub authenticated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_stage_mapping_round_trips() {
        for stage in StageName::ORDER {
            assert_eq!(stage.phase().stage(), Some(stage));
        }
        assert_eq!(RunPhase::AwaitingCodeGeneration.stage(), None);
        assert_eq!(RunPhase::Completed.stage(), None);
    }

    #[test]
    fn terminal_phases() {
        assert!(RunPhase::Completed.is_terminal());
        assert!(RunPhase::Failed.is_terminal());
        assert!(RunPhase::Cancelled.is_terminal());
        assert!(!RunPhase::AwaitingCodeGeneration.is_terminal());
        assert!(!RunPhase::Reviewing.is_terminal());
    }

    #[test]
    fn failed_state_keeps_cycle_and_flag() {
        let mut state = RunState::initial(true);
        state.revision_cycle = 2;
        let failed = state.failed(StageFailure {
            stage: StageName::Reviewing,
            cause: FailureCause::ReviewLimitExceeded,
            message: "limit".into(),
            attempts: 1,
        });
        assert_eq!(failed.phase, RunPhase::Failed);
        assert_eq!(failed.revision_cycle, 2);
        assert!(failed.generation_requested);
    }

    #[test]
    fn phase_display_names() {
        assert_eq!(RunPhase::StoryGen.to_string(), "StoryGen");
        assert_eq!(RunPhase::Cancelled.to_string(), "Cancelled");
    }
}
