//! Global atomic counters for DevStory observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (the orchestrator does so when a run ends).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    stages_completed: AtomicU64,
    stage_retries: AtomicU64,
    stage_failures: AtomicU64,
    revision_cycles: AtomicU64,
    soft_verdict_failures: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            stages_completed: AtomicU64::new(0),
            stage_retries: AtomicU64::new(0),
            stage_failures: AtomicU64::new(0),
            revision_cycles: AtomicU64::new(0),
            soft_verdict_failures: AtomicU64::new(0),
        }
    }

    pub fn inc_stages_completed(&self) {
        self.stages_completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stages_completed", "counter incremented");
    }

    pub fn inc_stage_retries(&self) {
        self.stage_retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_retries", "counter incremented");
    }

    pub fn inc_stage_failures(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "stage_failures", "counter incremented");
    }

    pub fn inc_revision_cycles(&self) {
        self.revision_cycles.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "revision_cycles", "counter incremented");
    }

    pub fn inc_soft_verdict_failures(&self) {
        self.soft_verdict_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "soft_verdict_failures", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            stages_completed = self.stages_completed(),
            stage_retries = self.stage_retries(),
            stage_failures = self.stage_failures(),
            revision_cycles = self.revision_cycles(),
            soft_verdict_failures = self.soft_verdict_failures(),
        );
    }

    pub fn stages_completed(&self) -> u64 {
        self.stages_completed.load(Ordering::Relaxed)
    }

    pub fn stage_retries(&self) -> u64 {
        self.stage_retries.load(Ordering::Relaxed)
    }

    pub fn stage_failures(&self) -> u64 {
        self.stage_failures.load(Ordering::Relaxed)
    }

    pub fn revision_cycles(&self) -> u64 {
        self.revision_cycles.load(Ordering::Relaxed)
    }

    pub fn soft_verdict_failures(&self) -> u64 {
        self.soft_verdict_failures.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.stages_completed.store(0, Ordering::Relaxed);
        self.stage_retries.store(0, Ordering::Relaxed);
        self.stage_failures.store(0, Ordering::Relaxed);
        self.revision_cycles.store(0, Ordering::Relaxed);
        self.soft_verdict_failures.store(0, Ordering::Relaxed);
    }
}
