//! Run-scoped context handed to every stage.

use std::sync::Arc;
use std::time::Duration;

use devstory_state::RunId;

use crate::collaborators::{CompletionError, CompletionService, RepositorySource};
use crate::config::PipelineConfig;
use crate::domain::{ProjectRef, Query};
use crate::prompts::PromptKind;

/// Everything a stage may use: run inputs, collaborators and configuration.
/// Cheap to clone; shared between the generator sub-tasks.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: RunId,
    pub project: Arc<ProjectRef>,
    pub query: Arc<Query>,
    pub source: Arc<dyn RepositorySource>,
    pub completion: Arc<dyn CompletionService>,
    pub config: Arc<PipelineConfig>,
}

impl RunContext {
    /// Issue one completion with the tier for `kind`, bounded by the
    /// configured timeout.
    pub async fn complete(&self, kind: PromptKind, prompt: &str) -> Result<String, CompletionError> {
        let limit = self.config.completion_timeout_ms;
        let call = self.completion.complete(prompt, kind.tier());
        match tokio::time::timeout(Duration::from_millis(limit), call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(CompletionError::Timeout { after_ms: limit }),
        }
    }
}
