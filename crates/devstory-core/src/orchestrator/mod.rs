//! PipelineOrchestrator: the run trigger surface.
//!
//! Owns every run's `RunState`. Each started run executes on its own tokio
//! task; runs share nothing but the [`ArtifactStore`].
//!
//! - `start_run` validates inputs, records the run, and launches it
//! - `trigger_code_generation` continues a run parked after StoryGen
//! - `resume_run` restarts a failed, cancelled or interrupted run from its
//!   first missing artifact
//! - `cancel_run` stops a run at its next stage boundary

mod driver;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::{DateTime, Utc};
use devstory_state::{ArtifactStore, RunId, StorageError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{warn, Instrument};

use crate::collaborators::{CompletionService, RepositorySource};
use crate::config::{ConfigError, PipelineConfig};
use crate::context::RunContext;
use crate::domain::{
    AccessToken, ArtifactRef, ArtifactSlot, FailureCause, GeneratedArtifact, ImpactSet,
    PipelineError, ProjectRef, Query, ReviewVerdict, RunManifest, RunPhase, RunState,
    SourceBundle, StoryPair, TaskPair,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::recorder::RunRecorder;

use driver::RunDriver;

/// Handles to a run executing on this orchestrator.
struct ActiveRun {
    cancel: watch::Sender<bool>,
    finished: watch::Receiver<bool>,
}

/// The other ends of an [`ActiveRun`], held by whoever owns the registry
/// slot: a launch from validation until its driver stops, or an idle cancel
/// while it writes `Cancelled`.
struct Claim {
    cancel: watch::Receiver<bool>,
    finished: watch::Sender<bool>,
}

/// Latest revision of every artifact slot of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LatestArtifacts {
    pub impact_set: Option<ImpactSet>,
    pub source_bundle: Option<SourceBundle>,
    pub stories: Option<StoryPair>,
    pub tasks: Option<TaskPair>,
    pub code: Option<GeneratedArtifact>,
    pub tests: Option<GeneratedArtifact>,
    pub verdict: Option<ReviewVerdict>,
    /// Storage references of the artifacts above, in pipeline order
    pub refs: Vec<ArtifactRef>,
}

/// Point-in-time view of a run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSnapshot {
    pub run_id: RunId,
    pub manifest: RunManifest,
    pub state: RunState,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub artifacts: LatestArtifacts,
}

pub struct PipelineOrchestrator {
    store: Arc<dyn ArtifactStore>,
    source: Arc<dyn RepositorySource>,
    completion: Arc<dyn CompletionService>,
    config: Arc<PipelineConfig>,
    active: Arc<Mutex<HashMap<RunId, ActiveRun>>>,
}

impl PipelineOrchestrator {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        source: Arc<dyn RepositorySource>,
        completion: Arc<dyn CompletionService>,
        config: PipelineConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            store,
            source,
            completion,
            config: Arc::new(config),
            active: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate inputs, record a new run and start executing it.
    pub async fn start_run(&self, project: ProjectRef, query: &str) -> Result<RunId, PipelineError> {
        project.validate()?;
        let query = Query::new(query)?;
        let project_key = project.project_key();

        let manifest = RunManifest {
            authenticated: !project.access_token.is_empty(),
            project: project.clone(),
            query: query.clone(),
        };
        let state = RunState::initial(self.config.auto_generate);
        let run_id = self
            .store
            .create_run(
                &project_key,
                serde_json::to_value(&manifest)?,
                serde_json::to_value(&state)?,
            )
            .await?;

        obs::emit_run_started(&run_id.0, &project_key);
        let claim = self.claim(&run_id)?;
        self.launch(&run_id, claim, project, query, state);
        Ok(run_id)
    }

    /// Continue a run parked in `AwaitingCodeGeneration` into Assigning,
    /// Generating and Reviewing.
    pub async fn trigger_code_generation(&self, run_id: &RunId) -> Result<(), PipelineError> {
        self.wait_inactive(run_id).await;
        let claim = self.claim(run_id)?;
        match self.triggerable(run_id).await {
            Ok((manifest, state)) => {
                self.launch(run_id, claim, manifest.project, manifest.query, state);
                Ok(())
            }
            Err(e) => {
                self.abandon(run_id, claim).await;
                Err(e)
            }
        }
    }

    /// Restart a failed, cancelled or interrupted run from the first stage
    /// whose artifact is missing. Artifacts already persisted are reused.
    ///
    /// The token is required again when the run was started with one and the
    /// repository still has to be read.
    pub async fn resume_run(
        &self,
        run_id: &RunId,
        token: Option<AccessToken>,
    ) -> Result<(), PipelineError> {
        let claim = self.claim(run_id)?;
        match self.resumable(run_id, token).await {
            Ok((project, query, state)) => {
                self.launch(run_id, claim, project, query, state);
                Ok(())
            }
            Err(e) => {
                self.abandon(run_id, claim).await;
                Err(e)
            }
        }
    }

    /// Request cancellation. An executing run stops at its next stage
    /// boundary; an idle non-terminal run is marked `Cancelled` directly.
    /// Terminal runs are left unchanged.
    pub async fn cancel_run(&self, run_id: &RunId) -> Result<(), PipelineError> {
        // check and claim under one lock so no launch slips in before the write
        let claim = {
            let mut registry = self.registry();
            if let Some(active) = registry.get(run_id) {
                let _ = active.cancel.send(true);
                return Ok(());
            }
            register(&mut registry, run_id)
        };

        let outcome = self.mark_cancelled(run_id).await;
        self.release(run_id, claim);
        outcome
    }

    /// Wait until the run stops executing and return its recorded state.
    pub async fn await_run(&self, run_id: &RunId) -> Result<RunState, PipelineError> {
        self.wait_inactive(run_id).await;
        let (_, state) = self.load_run(run_id).await?;
        Ok(state)
    }

    /// Current state plus the latest artifact of every slot.
    pub async fn get_run_state(&self, run_id: &RunId) -> Result<RunSnapshot, PipelineError> {
        let record = self.store.get_run(run_id).await?;
        let manifest: RunManifest = serde_json::from_value(record.metadata)?;
        let state: RunState = serde_json::from_value(record.state)?;

        let mut artifacts = LatestArtifacts::default();
        let mut refs = Vec::new();
        artifacts.impact_set = self.latest(run_id, ArtifactSlot::ImpactSet, &mut refs).await?;
        artifacts.source_bundle = self.latest(run_id, ArtifactSlot::SourceBundle, &mut refs).await?;
        artifacts.stories = self.latest(run_id, ArtifactSlot::Stories, &mut refs).await?;
        artifacts.tasks = self.latest(run_id, ArtifactSlot::Tasks, &mut refs).await?;
        artifacts.code = self.latest(run_id, ArtifactSlot::Code, &mut refs).await?;
        artifacts.tests = self.latest(run_id, ArtifactSlot::Tests, &mut refs).await?;
        artifacts.verdict = self.latest(run_id, ArtifactSlot::Verdict, &mut refs).await?;
        artifacts.refs = refs;

        Ok(RunSnapshot {
            run_id: record.run_id,
            manifest,
            state,
            active: self.is_active(run_id),
            created_at: record.created_at,
            artifacts,
        })
    }

    /// Every recorded state of a run, oldest first.
    pub async fn state_history(&self, run_id: &RunId) -> Result<Vec<RunState>, PipelineError> {
        let entries = self.store.state_history(run_id).await?;
        entries
            .into_iter()
            .map(|e| serde_json::from_value(e.state).map_err(PipelineError::from))
            .collect()
    }

    /// Run IDs for `owner/repo`, newest first.
    pub async fn list_runs(&self, project_key: &str) -> Result<Vec<RunId>, PipelineError> {
        Ok(self.store.list_runs(project_key).await?)
    }

    // -- internals ----------------------------------------------------------

    fn registry(&self) -> MutexGuard<'_, HashMap<RunId, ActiveRun>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_active(&self, run_id: &RunId) -> bool {
        self.registry().contains_key(run_id)
    }

    /// Take the run's registry slot, or fail when someone else holds it.
    fn claim(&self, run_id: &RunId) -> Result<Claim, PipelineError> {
        let mut registry = self.registry();
        if registry.contains_key(run_id) {
            return Err(PipelineError::AlreadyActive {
                run_id: run_id.0.clone(),
            });
        }
        Ok(register(&mut registry, run_id))
    }

    fn release(&self, run_id: &RunId, claim: Claim) {
        self.registry().remove(run_id);
        let _ = claim.finished.send(true);
    }

    /// Give back a claim that never launched. A cancel received while it was
    /// held still applies.
    async fn abandon(&self, run_id: &RunId, claim: Claim) {
        let cancelled = *claim.cancel.borrow();
        if cancelled {
            if let Err(e) = self.mark_cancelled(run_id).await {
                warn!(run_id = %run_id, error = %e, "deferred cancel failed");
            }
        }
        self.release(run_id, claim);
    }

    async fn mark_cancelled(&self, run_id: &RunId) -> Result<(), PipelineError> {
        let (_, state) = self.load_run(run_id).await?;
        if !state.phase.is_terminal() {
            let recorder = RunRecorder::new(Arc::clone(&self.store), run_id.clone());
            recorder
                .transition(&state.with_phase(RunPhase::Cancelled))
                .await?;
        }
        Ok(())
    }

    async fn triggerable(&self, run_id: &RunId) -> Result<(RunManifest, RunState), PipelineError> {
        let (manifest, state) = self.load_run(run_id).await?;
        if state.phase != RunPhase::AwaitingCodeGeneration {
            return Err(PipelineError::NotTriggerable {
                run_id: run_id.0.clone(),
                phase: state.phase,
            });
        }
        let state = RunState {
            generation_requested: true,
            ..state
        };
        Ok((manifest, state))
    }

    async fn resumable(
        &self,
        run_id: &RunId,
        token: Option<AccessToken>,
    ) -> Result<(ProjectRef, Query, RunState), PipelineError> {
        let (manifest, state) = self.load_run(run_id).await?;
        let not_resumable = |reason: &str| PipelineError::NotResumable {
            run_id: run_id.0.clone(),
            reason: reason.to_string(),
        };
        match state.phase {
            RunPhase::Completed => return Err(not_resumable("run already completed")),
            RunPhase::AwaitingCodeGeneration => {
                return Err(not_resumable(
                    "run is awaiting code generation; trigger it instead",
                ))
            }
            RunPhase::Failed
                if state.failure.as_ref().map(|f| f.cause)
                    == Some(FailureCause::ReviewLimitExceeded) =>
            {
                return Err(not_resumable("review limit exceeded"))
            }
            _ => {}
        }

        let project = match token {
            Some(token) => manifest.project.with_token(token),
            None => manifest.project,
        };
        if manifest.authenticated && project.access_token.is_empty() && self.needs_repository(run_id).await? {
            return Err(PipelineError::TokenRequired {
                run_id: run_id.0.clone(),
            });
        }

        let state = RunState {
            failure: None,
            ..state
        };
        Ok((project, manifest.query, state))
    }

    async fn wait_inactive(&self, run_id: &RunId) {
        let finished = self.registry().get(run_id).map(|a| a.finished.clone());
        if let Some(mut finished) = finished {
            let _ = finished.wait_for(|done| *done).await;
        }
    }

    async fn load_run(&self, run_id: &RunId) -> Result<(RunManifest, RunState), PipelineError> {
        let record = self.store.get_run(run_id).await?;
        Ok((
            serde_json::from_value(record.metadata)?,
            serde_json::from_value(record.state)?,
        ))
    }

    async fn needs_repository(&self, run_id: &RunId) -> Result<bool, PipelineError> {
        let recorder = RunRecorder::new(Arc::clone(&self.store), run_id.clone());
        let impact: Option<(ImpactSet, _)> = recorder.load(ArtifactSlot::ImpactSet, 0).await?;
        let bundle: Option<(SourceBundle, _)> = recorder.load(ArtifactSlot::SourceBundle, 0).await?;
        Ok(impact.is_none() || bundle.is_none())
    }

    async fn latest<T: DeserializeOwned>(
        &self,
        run_id: &RunId,
        slot: ArtifactSlot,
        refs: &mut Vec<ArtifactRef>,
    ) -> Result<Option<T>, StorageError> {
        let recorder = RunRecorder::new(Arc::clone(&self.store), run_id.clone());
        Ok(recorder.latest(slot).await?.map(|(value, r)| {
            refs.push(r);
            value
        }))
    }

    /// Spawn the driver for a run whose registry slot is already claimed.
    fn launch(
        &self,
        run_id: &RunId,
        claim: Claim,
        project: ProjectRef,
        query: Query,
        state: RunState,
    ) {
        let Claim {
            cancel: cancel_rx,
            finished: finished_tx,
        } = claim;
        let ctx = RunContext {
            run_id: run_id.clone(),
            project: Arc::new(project),
            query: Arc::new(query),
            source: Arc::clone(&self.source),
            completion: Arc::clone(&self.completion),
            config: Arc::clone(&self.config),
        };
        let recorder = RunRecorder::new(Arc::clone(&self.store), run_id.clone());
        let driver = RunDriver::new(ctx, recorder, state, cancel_rx);
        let active = Arc::clone(&self.active);
        let id = run_id.clone();

        tokio::spawn(
            async move {
                let started = Instant::now();
                let last = driver.drive().await;
                METRICS.flush();
                obs::emit_run_finished(&id.0, last.phase, started.elapsed().as_millis() as u64);

                active
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&id);
                let _ = finished_tx.send(true);
            }
            .instrument(obs::run_span(&run_id.0)),
        );
    }
}

fn register(registry: &mut HashMap<RunId, ActiveRun>, run_id: &RunId) -> Claim {
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (finished_tx, finished_rx) = watch::channel(false);
    registry.insert(
        run_id.clone(),
        ActiveRun {
            cancel: cancel_tx,
            finished: finished_rx,
        },
    );
    Claim {
        cancel: cancel_rx,
        finished: finished_tx,
    }
}
