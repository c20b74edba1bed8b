//! In-memory fakes for the collaborator traits (testing only)
//!
//! `ScriptedCompletion` answers each prompt kind from a queue of scripted
//! replies; `StaticRepository` serves a fixed file map.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::collaborators::{CompletionError, CompletionService, ModelTier, RepoError, RepositorySource};
use crate::domain::ProjectRef;
use crate::prompts::PromptKind;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// ScriptedCompletion
// ---------------------------------------------------------------------------

/// One scripted answer.
#[derive(Debug, Clone)]
pub enum Scripted {
    Reply(String),
    Fail(CompletionError),
    /// Never resolves; exercises the per-call timeout.
    Hang,
}

/// A prompt the fake received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub kind: Option<PromptKind>,
    pub tier: ModelTier,
    pub prompt: String,
}

#[derive(Default)]
struct Script {
    queues: HashMap<PromptKind, VecDeque<Scripted>>,
    fallback: HashMap<PromptKind, String>,
    calls: Vec<RecordedCall>,
}

/// Completion fake keyed by the `# Agent:` header of each prompt.
///
/// Queued answers are consumed first; when a queue is empty the kind's
/// fallback reply is used, and without one the call fails with `ModelError`.
#[derive(Default)]
pub struct ScriptedCompletion {
    script: Mutex<Script>,
}

impl ScriptedCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, kind: PromptKind, reply: impl Into<String>) -> &Self {
        self.push_scripted(kind, Scripted::Reply(reply.into()))
    }

    pub fn push_err(&self, kind: PromptKind, error: CompletionError) -> &Self {
        self.push_scripted(kind, Scripted::Fail(error))
    }

    pub fn push_scripted(&self, kind: PromptKind, answer: Scripted) -> &Self {
        lock(&self.script)
            .queues
            .entry(kind)
            .or_default()
            .push_back(answer);
        self
    }

    /// Reply used whenever `kind`'s queue is empty.
    pub fn always(&self, kind: PromptKind, reply: impl Into<String>) -> &Self {
        lock(&self.script).fallback.insert(kind, reply.into());
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.script).calls.clone()
    }

    pub fn calls_for(&self, kind: PromptKind) -> Vec<RecordedCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.kind == Some(kind))
            .collect()
    }

    fn next(&self, prompt: &str, tier: ModelTier) -> Scripted {
        let kind = PromptKind::detect(prompt);
        let mut script = lock(&self.script);
        script.calls.push(RecordedCall {
            kind,
            tier,
            prompt: prompt.to_string(),
        });

        let Some(kind) = kind else {
            return Scripted::Fail(CompletionError::ModelError("unrecognised prompt".into()));
        };
        if let Some(answer) = script.queues.get_mut(&kind).and_then(VecDeque::pop_front) {
            return answer;
        }
        match script.fallback.get(&kind) {
            Some(reply) => Scripted::Reply(reply.clone()),
            None => Scripted::Fail(CompletionError::ModelError(format!(
                "no scripted reply for {kind:?}"
            ))),
        }
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn complete(&self, prompt: &str, tier: ModelTier) -> Result<String, CompletionError> {
        match self.next(prompt, tier) {
            Scripted::Reply(text) => Ok(text),
            Scripted::Fail(e) => Err(e),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

// ---------------------------------------------------------------------------
// StaticRepository
// ---------------------------------------------------------------------------

/// Repository fake over a fixed, ordered file map.
#[derive(Default)]
pub struct StaticRepository {
    order: Vec<String>,
    files: HashMap<String, String>,
    failures: HashMap<String, RepoError>,
    list_error: Option<RepoError>,
    list_calls: AtomicUsize,
    reads: Mutex<Vec<String>>,
}

impl StaticRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<String>, content: impl Into<String>) -> Self {
        let path = path.into();
        if !self.order.contains(&path) {
            self.order.push(path.clone());
        }
        self.files.insert(path, content.into());
        self
    }

    /// Listed, but every read fails with `error`.
    pub fn with_failure(mut self, path: impl Into<String>, error: RepoError) -> Self {
        let path = path.into();
        if !self.order.contains(&path) {
            self.order.push(path.clone());
        }
        self.failures.insert(path, error);
        self
    }

    pub fn with_list_error(mut self, error: RepoError) -> Self {
        self.list_error = Some(error);
        self
    }

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::Relaxed)
    }

    /// Paths passed to `read_file`, in call order.
    pub fn reads(&self) -> Vec<String> {
        lock(&self.reads).clone()
    }
}

#[async_trait]
impl RepositorySource for StaticRepository {
    async fn list_files(&self, _project: &ProjectRef) -> Result<Vec<String>, RepoError> {
        self.list_calls.fetch_add(1, Ordering::Relaxed);
        match &self.list_error {
            Some(e) => Err(e.clone()),
            None => Ok(self.order.clone()),
        }
    }

    async fn read_file(&self, _project: &ProjectRef, path: &str) -> Result<String, RepoError> {
        lock(&self.reads).push(path.to_string());
        if let Some(e) = self.failures.get(path) {
            return Err(e.clone());
        }
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| RepoError::NotFound {
                path: path.to_string(),
            })
    }
}
