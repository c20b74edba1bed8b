//! End-to-end orchestrator scenarios over in-memory collaborators.

use std::sync::Arc;

use async_trait::async_trait;
use devstory_core::fakes::{ScriptedCompletion, StaticRepository};
use devstory_core::prompts::PromptKind;
use devstory_core::{
    AccessToken, CompletionError, CompletionService, FailureCause, GeneratedArtifact, InputError,
    ModelTier, PipelineConfig, PipelineError, PipelineOrchestrator, ProjectRef, ReviewVerdict,
    RunPhase, StageName, VerdictOrigin,
};
use devstory_state::fakes::MemoryArtifactStore;
use devstory_state::{
    ArtifactKey, ArtifactRecord, ArtifactStore, RunId, RunRecord, StateEntry, StorageResult,
};
use tokio::sync::Notify;

const AUTH_CONTROLLER: &str = "\
@RestController
public class AuthController {
    public ResponseEntity<User> me(Principal principal) { return null; }
}";

const IMPACT: &str = r#"["src/AuthController.java"]"#;

const STORIES: &str = "\
=== DEVELOPER STORIES ===
As a user I can log in via POST /login with my credentials.
=== TESTER STORIES ===
Verify login accepts valid credentials and rejects invalid ones.";

const APPROVED: &str = "VERDICT: APPROVED";

fn code_reply(class: &str) -> String {
    format!("```java\nclass {class} {{}}\n```")
}

fn needs_revision(comment: &str) -> String {
    format!("VERDICT: NEEDS_REVISION\nCOMMENTS:\n- {comment}")
}

fn project() -> ProjectRef {
    ProjectRef::new("acme", "shop", "main", AccessToken::default())
}

fn auto() -> PipelineConfig {
    PipelineConfig {
        auto_generate: true,
        ..PipelineConfig::default()
    }
}

fn script_happy_path(c: &ScriptedCompletion) {
    c.always(PromptKind::ImpactAnalysis, IMPACT)
        .always(PromptKind::Stories, STORIES)
        .always(PromptKind::CodeGeneration, code_reply("LoginController"))
        .always(PromptKind::TestGeneration, code_reply("LoginControllerTest"))
        .always(PromptKind::Review, APPROVED);
}

struct Harness {
    orchestrator: PipelineOrchestrator,
    store: Arc<MemoryArtifactStore>,
    repo: Arc<StaticRepository>,
}

fn harness(config: PipelineConfig, completion: Arc<dyn CompletionService>) -> Harness {
    let store = Arc::new(MemoryArtifactStore::new());
    let repo = Arc::new(
        StaticRepository::new()
            .with_file("src/AuthController.java", AUTH_CONTROLLER)
            .with_file("src/UserService.java", "public class UserService {}")
            .with_file("pom.xml", "<project/>"),
    );
    let orchestrator =
        PipelineOrchestrator::new(store.clone(), repo.clone(), completion, config).unwrap();
    Harness {
        orchestrator,
        store,
        repo,
    }
}

async fn phases(h: &Harness, run_id: &RunId) -> Vec<RunPhase> {
    h.orchestrator
        .state_history(run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.phase)
        .collect()
}

async fn revision<T: serde::de::DeserializeOwned>(
    h: &Harness,
    run_id: &RunId,
    slot: &str,
    rev: u32,
) -> T {
    let record = h
        .store
        .get_revision(&ArtifactKey::new(run_id, slot, rev))
        .await
        .unwrap();
    serde_json::from_value(record.payload).unwrap()
}

// ---------------------------------------------------------------------------
// Happy paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn full_run_produces_artifacts_in_stage_order() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
    assert_eq!(state.revision_cycle, 1);

    let keys: Vec<String> = h
        .store
        .list_artifacts(&run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|k| format!("{}@{}", k.slot, k.revision))
        .collect();
    assert_eq!(&keys[..4], ["impact_set@0", "source_bundle@0", "stories@0", "tasks@0"]);
    let mut generated = keys[4..6].to_vec();
    generated.sort();
    assert_eq!(generated, ["code@1", "tests@1"]);
    assert_eq!(keys[6], "verdict@1");

    assert_eq!(
        phases(&h, &run_id).await,
        [
            RunPhase::Analyzing,
            RunPhase::Reading,
            RunPhase::StoryGen,
            RunPhase::Assigning,
            RunPhase::Generating,
            RunPhase::Reviewing,
            RunPhase::Completed,
        ]
    );

    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    assert!(!snapshot.active);
    assert_eq!(snapshot.manifest.query.as_str(), "add login endpoint");
    assert_eq!(snapshot.artifacts.refs.len(), 7);
    assert_eq!(
        snapshot.artifacts.code.map(|c| c.code),
        Some("class LoginController {}".to_string())
    );
    assert!(snapshot.artifacts.verdict.unwrap().is_approved());
}

#[tokio::test]
async fn run_parks_after_stories_until_generation_is_triggered() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    let h = harness(PipelineConfig::default(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let parked = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(parked.phase, RunPhase::AwaitingCodeGeneration);
    assert!(!parked.generation_requested);
    assert!(completion.calls_for(PromptKind::CodeGeneration).is_empty());

    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    assert!(snapshot.artifacts.stories.is_some());
    assert!(snapshot.artifacts.tasks.is_none());

    h.orchestrator.trigger_code_generation(&run_id).await.unwrap();
    let done = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(done.phase, RunPhase::Completed);
    assert!(done.generation_requested);

    // Earlier stages are not repeated.
    assert_eq!(completion.calls_for(PromptKind::ImpactAnalysis).len(), 1);
    assert_eq!(completion.calls_for(PromptKind::Stories).len(), 1);
    assert_eq!(h.repo.list_calls(), 1);

    assert_eq!(
        phases(&h, &run_id).await,
        [
            RunPhase::Analyzing,
            RunPhase::Reading,
            RunPhase::StoryGen,
            RunPhase::AwaitingCodeGeneration,
            RunPhase::Assigning,
            RunPhase::Generating,
            RunPhase::Reviewing,
            RunPhase::Completed,
        ]
    );

    let err = h
        .orchestrator
        .trigger_code_generation(&run_id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PipelineError::NotTriggerable {
            phase: RunPhase::Completed,
            ..
        }
    ));
}

// ---------------------------------------------------------------------------
// Revision cycles
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approval_on_third_cycle_keeps_three_versions_per_role() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion
        .push(PromptKind::Review, needs_revision("hash the password"))
        .push(PromptKind::Review, needs_revision("return 401 on failure"))
        .push(PromptKind::Review, APPROVED);
    for class in ["LoginV1", "LoginV2", "LoginV3"] {
        completion.push(PromptKind::CodeGeneration, code_reply(class));
    }
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
    assert_eq!(state.revision_cycle, 3);

    for slot in ["code", "tests"] {
        let mut versions = Vec::new();
        for rev in 1..=3 {
            let artifact: GeneratedArtifact = revision(&h, &run_id, slot, rev).await;
            versions.push(artifact.version);
        }
        assert_eq!(versions, [1, 2, 3]);
    }
    let v1: GeneratedArtifact = revision(&h, &run_id, "code", 1).await;
    let v3: GeneratedArtifact = revision(&h, &run_id, "code", 3).await;
    assert_eq!(v1.code, "class LoginV1 {}");
    assert_eq!(v3.code, "class LoginV3 {}");

    // Both generators see the previous cycle's comments.
    let code_calls = completion.calls_for(PromptKind::CodeGeneration);
    let test_calls = completion.calls_for(PromptKind::TestGeneration);
    assert_eq!(code_calls.len(), 3);
    assert_eq!(test_calls.len(), 3);
    assert!(!code_calls[0].prompt.contains("Reviewer feedback"));
    assert!(code_calls[1].prompt.contains("- hash the password"));
    assert!(test_calls[2].prompt.contains("- return 401 on failure"));
}

#[tokio::test]
async fn review_limit_always_fails_the_run() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.always(PromptKind::Review, needs_revision("still wrong"));
    let config = PipelineConfig {
        max_review_cycles: 2,
        ..auto()
    };
    let h = harness(config, completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();

    assert_eq!(state.phase, RunPhase::Failed);
    let failure = state.failure.unwrap();
    assert_eq!(failure.stage, StageName::Reviewing);
    assert_eq!(failure.cause, FailureCause::ReviewLimitExceeded);
    assert_eq!(completion.calls_for(PromptKind::Review).len(), 2);

    let err = h.orchestrator.resume_run(&run_id, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotResumable { .. }));
}

#[tokio::test]
async fn unparsable_verdict_is_a_soft_revision() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push(PromptKind::Review, "Looks reasonable overall.");
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);

    let first: ReviewVerdict = revision(&h, &run_id, "verdict", 1).await;
    assert!(!first.is_approved());
    assert_eq!(first.origin, VerdictOrigin::ParseFallback);
    let second: ReviewVerdict = revision(&h, &run_id, "verdict", 2).await;
    assert_eq!(second.origin, VerdictOrigin::Reviewer);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn repeated_story_timeouts_fail_after_configured_retries() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    for _ in 0..3 {
        completion.push_err(PromptKind::Stories, CompletionError::Timeout { after_ms: 120_000 });
    }
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();

    assert_eq!(state.phase, RunPhase::Failed);
    let failure = state.failure.unwrap();
    assert_eq!(failure.stage, StageName::StoryGen);
    assert_eq!(failure.cause, FailureCause::Timeout);
    assert_eq!(failure.attempts, 3);
    assert_eq!(completion.calls_for(PromptKind::Stories).len(), 3);

    // Earlier artifacts stay readable.
    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    assert!(snapshot.artifacts.source_bundle.is_some());
    assert!(snapshot.artifacts.stories.is_none());
}

#[tokio::test(start_paused = true)]
async fn transient_error_recovers_within_retry_budget() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push_err(PromptKind::ImpactAnalysis, CompletionError::RateLimited("429".into()));
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
    assert_eq!(completion.calls_for(PromptKind::ImpactAnalysis).len(), 2);
}

#[tokio::test]
async fn validation_errors_are_not_retried() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push(PromptKind::Stories, "Here are some stories without headings.");
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();

    let failure = state.failure.unwrap();
    assert_eq!(failure.stage, StageName::StoryGen);
    assert_eq!(failure.cause, FailureCause::StoryParseError);
    assert_eq!(failure.attempts, 1);
    assert_eq!(completion.calls_for(PromptKind::Stories).len(), 1);
}

#[tokio::test]
async fn empty_impact_never_reaches_the_reader() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push(PromptKind::ImpactAnalysis, "[]");
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();

    let failure = state.failure.unwrap();
    assert_eq!(failure.stage, StageName::Analyzing);
    assert_eq!(failure.cause, FailureCause::NoImpactedFilesFound);
    assert!(h.repo.reads().is_empty());
    assert!(h.store.list_artifacts(&run_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn one_failed_generator_fails_the_whole_stage() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push(PromptKind::TestGeneration, "No tests needed.");
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();

    let failure = state.failure.unwrap();
    assert_eq!(failure.stage, StageName::Generating);
    assert_eq!(failure.cause, FailureCause::GenerationEmpty);
    assert!(completion.calls_for(PromptKind::Review).is_empty());

    // The developer succeeded, but its code is not stored without tests.
    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    assert!(snapshot.artifacts.code.is_none());
    assert!(snapshot.artifacts.tests.is_none());
    let slots: Vec<String> = h
        .store
        .list_artifacts(&run_id)
        .await
        .unwrap()
        .into_iter()
        .map(|k| k.slot)
        .collect();
    assert!(!slots.iter().any(|s| s == "code" || s == "tests"));

    // Resuming regenerates the whole pair.
    h.orchestrator.resume_run(&run_id, None).await.unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
    assert_eq!(completion.calls_for(PromptKind::CodeGeneration).len(), 2);
    assert_eq!(completion.calls_for(PromptKind::TestGeneration).len(), 2);
}

#[tokio::test]
async fn failed_revision_cycle_keeps_the_previous_pair_together() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push(PromptKind::Review, needs_revision("validate the password"));
    completion.push(PromptKind::TestGeneration, code_reply("LoginControllerTest"));
    completion.push(PromptKind::TestGeneration, "No tests needed.");
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.failure.unwrap().cause, FailureCause::GenerationEmpty);
    assert_eq!(completion.calls_for(PromptKind::CodeGeneration).len(), 2);

    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    let pair_revisions: Vec<u32> = snapshot
        .artifacts
        .refs
        .iter()
        .filter(|r| r.slot == "code" || r.slot == "tests")
        .map(|r| r.revision)
        .collect();
    assert_eq!(pair_revisions, vec![1, 1]);
    assert!(h
        .store
        .get_revision(&ArtifactKey::new(&run_id, "code", 2))
        .await
        .is_err());
}

// ---------------------------------------------------------------------------
// Resume, cancel, tokens
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resume_continues_from_first_missing_artifact() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push_err(PromptKind::Stories, CompletionError::ModelError("overloaded".into()));
    let h = harness(auto(), completion.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let failed = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(failed.failure.unwrap().cause, FailureCause::ModelError);
    let reads_before = h.repo.reads().len();

    h.orchestrator.resume_run(&run_id, None).await.unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
    assert!(state.failure.is_none());

    assert_eq!(completion.calls_for(PromptKind::ImpactAnalysis).len(), 1);
    assert_eq!(h.repo.reads().len(), reads_before);

    let err = h.orchestrator.resume_run(&run_id, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::NotResumable { .. }));
}

/// Holds impact-analysis calls until released.
struct GatedCompletion {
    inner: ScriptedCompletion,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl CompletionService for GatedCompletion {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<String, CompletionError> {
        if PromptKind::detect(prompt) == Some(PromptKind::ImpactAnalysis) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.complete(prompt, tier).await
    }
}

#[tokio::test]
async fn cancellation_takes_effect_at_the_next_stage_boundary() {
    let gated = Arc::new(GatedCompletion {
        inner: ScriptedCompletion::new(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    script_happy_path(&gated.inner);
    let h = harness(auto(), gated.clone());

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    gated.entered.notified().await;
    h.orchestrator.cancel_run(&run_id).await.unwrap();
    gated.release.notify_one();

    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Cancelled);

    // The in-flight stage finished and its artifact is kept.
    let snapshot = h.orchestrator.get_run_state(&run_id).await.unwrap();
    assert!(snapshot.artifacts.impact_set.is_some());
    assert!(snapshot.artifacts.source_bundle.is_none());

    h.orchestrator.resume_run(&run_id, None).await.unwrap();
    let resumed = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(resumed.phase, RunPhase::Completed);
    assert_eq!(gated.inner.calls_for(PromptKind::ImpactAnalysis).len(), 1);
}

#[tokio::test]
async fn idle_parked_run_is_cancelled_directly() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    let h = harness(PipelineConfig::default(), completion);

    let run_id = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    h.orchestrator.await_run(&run_id).await.unwrap();
    h.orchestrator.cancel_run(&run_id).await.unwrap();

    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Cancelled);
    let err = h
        .orchestrator
        .trigger_code_generation(&run_id)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NotTriggerable { .. }));
}

/// Pauses the write that marks a run `Cancelled` until released.
struct CancelGatedStore {
    inner: MemoryArtifactStore,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl ArtifactStore for CancelGatedStore {
    async fn create_run(
        &self,
        project_key: &str,
        metadata: serde_json::Value,
        initial_state: serde_json::Value,
    ) -> StorageResult<RunId> {
        self.inner.create_run(project_key, metadata, initial_state).await
    }

    async fn record_state(&self, run_id: &RunId, state: serde_json::Value) -> StorageResult<()> {
        if state["phase"] == serde_json::json!(RunPhase::Cancelled) {
            self.entered.notify_one();
            self.release.notified().await;
        }
        self.inner.record_state(run_id, state).await
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.inner.get_run(run_id).await
    }

    async fn state_history(&self, run_id: &RunId) -> StorageResult<Vec<StateEntry>> {
        self.inner.state_history(run_id).await
    }

    async fn list_runs(&self, project_key: &str) -> StorageResult<Vec<RunId>> {
        self.inner.list_runs(project_key).await
    }

    async fn put(&self, key: &ArtifactKey, payload: &serde_json::Value) -> StorageResult<ArtifactRecord> {
        self.inner.put(key, payload).await
    }

    async fn get(&self, run_id: &RunId, slot: &str) -> StorageResult<ArtifactRecord> {
        self.inner.get(run_id, slot).await
    }

    async fn get_revision(&self, key: &ArtifactKey) -> StorageResult<ArtifactRecord> {
        self.inner.get_revision(key).await
    }

    async fn list_artifacts(&self, run_id: &RunId) -> StorageResult<Vec<ArtifactKey>> {
        self.inner.list_artifacts(run_id).await
    }
}

#[tokio::test]
async fn trigger_during_idle_cancel_cannot_revive_the_run() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    let store = Arc::new(CancelGatedStore {
        inner: MemoryArtifactStore::new(),
        entered: Notify::new(),
        release: Notify::new(),
    });
    let repo = Arc::new(StaticRepository::new().with_file("src/AuthController.java", AUTH_CONTROLLER));
    let orchestrator = PipelineOrchestrator::new(
        store.clone(),
        repo,
        completion.clone(),
        PipelineConfig::default(),
    )
    .unwrap();

    let run_id = orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let parked = orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(parked.phase, RunPhase::AwaitingCodeGeneration);

    // The cancel stalls mid-write while a trigger arrives.
    let (cancelled, triggered) = tokio::join!(orchestrator.cancel_run(&run_id), async {
        store.entered.notified().await;
        let (triggered, _) = tokio::join!(orchestrator.trigger_code_generation(&run_id), async {
            tokio::task::yield_now().await;
            store.release.notify_one();
        });
        triggered
    });
    cancelled.unwrap();
    assert!(matches!(
        triggered.unwrap_err(),
        PipelineError::NotTriggerable {
            phase: RunPhase::Cancelled,
            ..
        }
    ));

    let state = orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Cancelled);
    assert!(completion.calls_for(PromptKind::CodeGeneration).is_empty());
}

#[tokio::test]
async fn access_token_is_never_persisted_and_required_to_resume() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    completion.push_err(
        PromptKind::ImpactAnalysis,
        CompletionError::ModelError("bad request".into()),
    );
    let h = harness(auto(), completion);

    let project = project().with_token(AccessToken::new("ghp_secret_value"));
    let run_id = h
        .orchestrator
        .start_run(project, "add login endpoint")
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Failed);

    let record = h.store.get_run(&run_id).await.unwrap();
    assert!(!record.metadata.to_string().contains("ghp_secret_value"));
    assert_eq!(record.metadata["authenticated"], true);

    let err = h.orchestrator.resume_run(&run_id, None).await.unwrap_err();
    assert!(matches!(err, PipelineError::TokenRequired { .. }));

    h.orchestrator
        .resume_run(&run_id, Some(AccessToken::new("ghp_secret_value")))
        .await
        .unwrap();
    let state = h.orchestrator.await_run(&run_id).await.unwrap();
    assert_eq!(state.phase, RunPhase::Completed);
}

// ---------------------------------------------------------------------------
// Trigger surface
// ---------------------------------------------------------------------------

#[tokio::test]
async fn invalid_inputs_are_rejected_before_any_run_exists() {
    let completion = Arc::new(ScriptedCompletion::new());
    let h = harness(auto(), completion.clone());

    let err = h.orchestrator.start_run(project(), "   ").await.unwrap_err();
    assert!(matches!(err, PipelineError::Input(InputError::EmptyQuery)));

    let bad = ProjectRef::new("", "shop", "main", AccessToken::default());
    let err = h.orchestrator.start_run(bad, "add login").await.unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Input(InputError::InvalidProjectRef { .. })
    ));

    assert!(h.orchestrator.list_runs("acme/shop").await.unwrap().is_empty());
    assert!(completion.calls().is_empty());
}

#[tokio::test]
async fn unknown_run_is_reported() {
    let h = harness(auto(), Arc::new(ScriptedCompletion::new()));
    let missing = RunId::from("no-such-run");

    assert!(matches!(
        h.orchestrator.get_run_state(&missing).await,
        Err(PipelineError::RunNotFound { .. })
    ));
    assert!(matches!(
        h.orchestrator.resume_run(&missing, None).await,
        Err(PipelineError::RunNotFound { .. })
    ));
}

#[tokio::test]
async fn concurrent_runs_do_not_interfere() {
    let completion = Arc::new(ScriptedCompletion::new());
    script_happy_path(&completion);
    let h = harness(auto(), completion);

    let other = ProjectRef::new("acme", "billing", "main", AccessToken::default());
    let a = h
        .orchestrator
        .start_run(project(), "add login endpoint")
        .await
        .unwrap();
    let b = h
        .orchestrator
        .start_run(other, "add invoice export")
        .await
        .unwrap();

    let (sa, sb) = tokio::join!(h.orchestrator.await_run(&a), h.orchestrator.await_run(&b));
    assert_eq!(sa.unwrap().phase, RunPhase::Completed);
    assert_eq!(sb.unwrap().phase, RunPhase::Completed);

    assert_eq!(h.orchestrator.list_runs("acme/shop").await.unwrap(), vec![a.clone()]);
    assert_eq!(h.orchestrator.list_runs("acme/billing").await.unwrap(), vec![b.clone()]);
    assert_eq!(h.store.list_artifacts(&a).await.unwrap().len(), 7);
    assert_eq!(h.store.list_artifacts(&b).await.unwrap().len(), 7);
}
