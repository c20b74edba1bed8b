//! Structured observability hooks for run lifecycle events.
//!
//! This module provides:
//! - Run-scoped tracing spans (`RunSpan` guard, `run_span` for futures)
//! - Emission functions for stage and run lifecycle events
//!
//! Events are emitted at `info!` level (filter with `DEVSTORY_LOG`).

use tracing::{info, warn};

use crate::domain::{FailureCause, RunPhase, StageError, StageName};

/// RAII guard that enters a run-scoped tracing span.
///
/// Only for synchronous sections; instrument futures with [`run_span`].
pub struct RunSpan {
    _span: tracing::span::EnteredSpan,
}

impl RunSpan {
    /// Create and enter a span tagged with the run_id.
    pub fn enter(run_id: &str) -> Self {
        Self {
            _span: run_span(run_id).entered(),
        }
    }
}

/// Span carrying `run_id`, for `.instrument()` on spawned run drivers.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("devstory.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, project_key: &str) {
    info!(event = "run.started", run_id = %run_id, project = %project_key);
}

pub fn emit_stage_started(stage: StageName) {
    info!(event = "stage.started", stage = %stage);
}

pub fn emit_stage_completed(stage: StageName, attempts: u32) {
    info!(event = "stage.completed", stage = %stage, attempts = attempts);
}

pub fn emit_stage_retry(stage: StageName, attempt: u32, delay_ms: u64, error: &StageError) {
    warn!(
        event = "stage.retry",
        stage = %stage,
        attempt = attempt,
        delay_ms = delay_ms,
        error = %error,
    );
}

pub fn emit_stage_failed(stage: StageName, cause: FailureCause, attempts: u32, message: &str) {
    warn!(
        event = "stage.failed",
        stage = %stage,
        cause = %cause,
        attempts = attempts,
        message = %message,
    );
}

pub fn emit_transition(phase: RunPhase, revision_cycle: u32) {
    info!(event = "run.transition", phase = %phase, revision_cycle = revision_cycle);
}

pub fn emit_artifact_persisted(slot: &str, revision: u32, digest: &str) {
    tracing::debug!(event = "artifact.persisted", slot = slot, revision = revision, digest = digest);
}

/// Reviewer reply was unparsable and replaced by a fallback verdict.
pub fn emit_soft_verdict_failure(revision_cycle: u32, reason: &str) {
    warn!(event = "review.soft_failure", revision_cycle = revision_cycle, reason = %reason);
}

pub fn emit_run_finished(run_id: &str, phase: RunPhase, duration_ms: u64) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        phase = %phase,
        duration_ms = duration_ms,
    );
}

/// Recording the final run state failed (warning level).
pub fn emit_run_finalize_error(run_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "run.finalize_error", run_id = %run_id, error = %error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_span_create() {
        let _span = RunSpan::enter("test-run-id");
        emit_stage_started(StageName::Analyzing);
    }
}
