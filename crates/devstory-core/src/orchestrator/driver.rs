//! Run driver: executes the stage sequence for one run.
//!
//! Each stage first looks for its persisted artifact and only runs when the
//! artifact is missing, so the same driver serves fresh runs, resumed runs
//! and runs continued after a code-generation trigger.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, Instrument};

use crate::context::RunContext;
use crate::domain::{
    ArtifactRef, ArtifactSlot, FailureCause, GeneratedArtifact, ReviewVerdict, Role, RunPhase,
    RunState, SourceBundle, StageError, StageFailure, StageName, Task, TaskPair, TaskRef,
};
use crate::metrics::METRICS;
use crate::obs;
use crate::recorder::RunRecorder;
use crate::retry::{run_with_retry, RetryExhausted, RetryPolicy};
use crate::stages;

/// Why a run stopped before completing.
enum Halt {
    Cancelled,
    Failed(StageFailure),
}

enum Outcome {
    Completed,
    AwaitingTrigger,
}

fn failure(stage: StageName, error: &StageError, attempts: u32) -> StageFailure {
    StageFailure {
        stage,
        cause: error.cause(),
        message: error.to_string(),
        attempts,
    }
}

fn exhausted(stage: StageName, e: RetryExhausted) -> Halt {
    Halt::Failed(failure(stage, &e.error, e.attempts))
}

fn storage(stage: StageName) -> impl Fn(devstory_state::StorageError) -> Halt {
    move |e| Halt::Failed(failure(stage, &StageError::from(e), 1))
}

/// Persistence and state bookkeeping for a run, kept apart from the
/// `RunContext` so stage closures can borrow the context while progress
/// is mutated.
struct Progress {
    recorder: RunRecorder,
    state: RunState,
    policy: RetryPolicy,
    cancel: watch::Receiver<bool>,
}

impl Progress {
    /// Cooperative cancellation point between stages.
    fn checkpoint(&self) -> Result<(), Halt> {
        if *self.cancel.borrow() {
            return Err(Halt::Cancelled);
        }
        Ok(())
    }

    async fn enter(&mut self, stage: StageName) -> Result<(), Halt> {
        self.checkpoint()?;
        if self.state.phase != stage.phase() {
            self.state = self.state.with_phase(stage.phase());
            self.recorder
                .transition(&self.state)
                .await
                .map_err(storage(stage))?;
        }
        obs::emit_stage_started(stage);
        Ok(())
    }

    async fn load<T: DeserializeOwned>(
        &self,
        stage: StageName,
        slot: ArtifactSlot,
        revision: u32,
    ) -> Result<Option<(T, ArtifactRef)>, Halt> {
        self.recorder
            .load(slot, revision)
            .await
            .map_err(storage(stage))
    }

    /// Return the persisted artifact for `(slot, revision)`, or run `op`
    /// under the retry policy and persist its output.
    async fn stage<T, F, Fut>(
        &mut self,
        stage: StageName,
        slot: ArtifactSlot,
        revision: u32,
        op: F,
    ) -> Result<(T, ArtifactRef), Halt>
    where
        T: Serialize + DeserializeOwned,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StageError>>,
    {
        if let Some(found) = self.load(stage, slot, revision).await? {
            debug!(stage = %stage, slot = %slot, revision, "artifact present, stage skipped");
            return Ok(found);
        }

        self.enter(stage).await?;
        let (value, attempts) = run_with_retry(&self.policy, stage, op)
            .await
            .map_err(|e| exhausted(stage, e))?;
        let artifact = self
            .recorder
            .persist(slot, revision, &value)
            .await
            .map_err(|e| Halt::Failed(failure(stage, &StageError::from(e), attempts)))?;

        obs::emit_stage_completed(stage, attempts);
        METRICS.inc_stages_completed();
        Ok((value, artifact))
    }
}

/// One generator sub-task: already persisted, or running.
enum Generation {
    Ready(GeneratedArtifact),
    Running(JoinHandle<Result<(GeneratedArtifact, u32), StageFailure>>),
}

impl Generation {
    async fn settle(self) -> Result<(GeneratedArtifact, u32), StageFailure> {
        match self {
            Generation::Ready(artifact) => Ok((artifact, 0)),
            Generation::Running(handle) => handle.await.unwrap_or_else(|e| {
                Err(StageFailure {
                    stage: StageName::Generating,
                    cause: FailureCause::Internal,
                    message: format!("generator task aborted: {e}"),
                    attempts: 1,
                })
            }),
        }
    }
}

pub(crate) struct RunDriver {
    ctx: RunContext,
    progress: Progress,
}

impl RunDriver {
    pub(crate) fn new(
        ctx: RunContext,
        recorder: RunRecorder,
        state: RunState,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let policy = ctx.config.retry_policy();
        Self {
            ctx,
            progress: Progress {
                recorder,
                state,
                policy,
                cancel,
            },
        }
    }

    /// Run to a resting point and record the final state.
    pub(crate) async fn drive(mut self) -> RunState {
        let next = match self.execute().await {
            Ok(Outcome::Completed) => self.progress.state.with_phase(RunPhase::Completed),
            Ok(Outcome::AwaitingTrigger) => self
                .progress
                .state
                .with_phase(RunPhase::AwaitingCodeGeneration),
            Err(Halt::Cancelled) => self.progress.state.with_phase(RunPhase::Cancelled),
            Err(Halt::Failed(f)) => {
                obs::emit_stage_failed(f.stage, f.cause, f.attempts, &f.message);
                METRICS.inc_stage_failures();
                self.progress.state.failed(f)
            }
        };

        if let Err(e) = self.progress.recorder.transition(&next).await {
            obs::emit_run_finalize_error(&self.ctx.run_id.0, &e);
        }
        next
    }

    async fn execute(&mut self) -> Result<Outcome, Halt> {
        let ctx = &self.ctx;

        let (impact, _) = self
            .progress
            .stage(StageName::Analyzing, ArtifactSlot::ImpactSet, 0, || {
                stages::analyze(ctx)
            })
            .await?;

        let (bundle, bundle_ref) = self
            .progress
            .stage(StageName::Reading, ArtifactSlot::SourceBundle, 0, || {
                stages::read_sources(ctx, &impact)
            })
            .await?;

        let (stories, _) = self
            .progress
            .stage(StageName::StoryGen, ArtifactSlot::Stories, 0, || {
                stages::generate_stories(ctx, &bundle)
            })
            .await?;

        if !self.progress.state.generation_requested {
            self.progress.checkpoint()?;
            return Ok(Outcome::AwaitingTrigger);
        }

        let (tasks, tasks_ref) = self
            .progress
            .stage(StageName::Assigning, ArtifactSlot::Tasks, 0, || {
                futures::future::ready(stages::assign_tasks(&stories, &bundle_ref))
            })
            .await?;

        self.review_loop(&tasks, &tasks_ref, Arc::new(bundle)).await
    }

    /// Generating ⇄ Reviewing until approval or the cycle limit.
    async fn review_loop(
        &mut self,
        tasks: &TaskPair,
        tasks_ref: &ArtifactRef,
        bundle: Arc<SourceBundle>,
    ) -> Result<Outcome, Halt> {
        let limit = self.ctx.config.max_review_cycles;

        let (mut cycle, mut feedback) = match self
            .progress
            .recorder
            .latest::<ReviewVerdict>(ArtifactSlot::Verdict)
            .await
            .map_err(storage(StageName::Reviewing))?
        {
            Some((verdict, _)) if verdict.is_approved() => return Ok(Outcome::Completed),
            Some((verdict, r)) => (r.revision + 1, verdict.comments),
            None => (1, Vec::new()),
        };

        loop {
            if cycle > limit {
                return Err(limit_exceeded(limit));
            }
            self.progress.state.revision_cycle = cycle;

            let (code, tests) = self
                .generate_pair(tasks, tasks_ref, &bundle, cycle, &feedback)
                .await?;

            let ctx = &self.ctx;
            let (verdict, _) = self
                .progress
                .stage(StageName::Reviewing, ArtifactSlot::Verdict, cycle, || {
                    stages::review(ctx, &code, &tests)
                })
                .await?;

            if verdict.is_approved() {
                return Ok(Outcome::Completed);
            }
            if cycle >= limit {
                return Err(limit_exceeded(limit));
            }
            METRICS.inc_revision_cycles();
            feedback = verdict.comments;
            cycle += 1;
        }
    }

    /// Developer and tester generation for one cycle, run concurrently.
    /// Either failing fails the stage and nothing from the cycle is stored;
    /// the pair is persisted only once both succeed.
    async fn generate_pair(
        &mut self,
        tasks: &TaskPair,
        tasks_ref: &ArtifactRef,
        bundle: &Arc<SourceBundle>,
        cycle: u32,
        feedback: &[String],
    ) -> Result<(GeneratedArtifact, GeneratedArtifact), Halt> {
        let stage = StageName::Generating;
        let code: Option<(GeneratedArtifact, ArtifactRef)> =
            self.progress.load(stage, ArtifactSlot::Code, cycle).await?;
        let tests: Option<(GeneratedArtifact, ArtifactRef)> =
            self.progress.load(stage, ArtifactSlot::Tests, cycle).await?;
        if let (Some((code, _)), Some((tests, _))) = (&code, &tests) {
            return Ok((code.clone(), tests.clone()));
        }

        self.progress.enter(stage).await?;
        let fresh_code = code.is_none();
        let fresh_tests = tests.is_none();
        let feedback: Arc<[String]> = feedback.into();
        let spawn = |role: Role, existing: Option<(GeneratedArtifact, ArtifactRef)>| match existing {
            Some((artifact, _)) => Generation::Ready(artifact),
            None => Generation::Running(self.spawn_generator(
                tasks.for_role(role).clone(),
                TaskRef {
                    assignment: tasks_ref.clone(),
                    role,
                },
                Arc::clone(bundle),
                cycle,
                Arc::clone(&feedback),
            )),
        };
        let developer = spawn(Role::Developer, code);
        let tester = spawn(Role::Tester, tests);

        let (developer, tester) = tokio::join!(developer.settle(), tester.settle());
        let (code, code_attempts) = developer.map_err(Halt::Failed)?;
        let (tests, test_attempts) = tester.map_err(Halt::Failed)?;
        let attempts = code_attempts.max(test_attempts);

        let outputs = [
            (ArtifactSlot::Code, &code, fresh_code),
            (ArtifactSlot::Tests, &tests, fresh_tests),
        ];
        for (slot, artifact, fresh) in outputs {
            if fresh {
                self.progress
                    .recorder
                    .persist(slot, cycle, artifact)
                    .await
                    .map_err(|e| Halt::Failed(failure(stage, &StageError::from(e), attempts)))?;
            }
        }

        obs::emit_stage_completed(stage, attempts);
        METRICS.inc_stages_completed();
        Ok((code, tests))
    }

    fn spawn_generator(
        &self,
        task: Task,
        source_task: TaskRef,
        bundle: Arc<SourceBundle>,
        cycle: u32,
        feedback: Arc<[String]>,
    ) -> JoinHandle<Result<(GeneratedArtifact, u32), StageFailure>> {
        let ctx = self.ctx.clone();
        let policy = self.progress.policy;
        let stage = StageName::Generating;

        tokio::spawn(
            async move {
                run_with_retry(&policy, stage, || {
                    stages::generate(&ctx, &task, &bundle, source_task.clone(), cycle, &feedback)
                })
                .await
                .map_err(|e| failure(stage, &e.error, e.attempts))
            }
            .in_current_span(),
        )
    }
}

fn limit_exceeded(limit: u32) -> Halt {
    Halt::Failed(failure(
        StageName::Reviewing,
        &StageError::ReviewLimitExceeded { limit },
        1,
    ))
}
