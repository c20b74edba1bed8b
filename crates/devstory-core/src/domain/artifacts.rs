//! Typed stage artifacts.
//!
//! Each artifact is produced by exactly one stage, persisted, and never
//! mutated afterwards. Later stages refer to earlier output by
//! [`ArtifactRef`] rather than by sharing in-memory state.

use devstory_state::{ArtifactRecord, ContentDigest, RunId};
use serde::{Deserialize, Serialize};

/// Ordered set of distinct file paths judged relevant to the query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactSet {
    paths: Vec<String>,
}

impl ImpactSet {
    /// Deduplicate preserving first occurrence; `None` when nothing remains.
    pub fn new<I, S>(paths: I) -> Option<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out: Vec<String> = Vec::new();
        for p in paths {
            let p = p.into().trim().to_string();
            if !p.is_empty() && !out.contains(&p) {
                out.push(p);
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(Self { paths: out })
        }
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Fetch outcome for one file of a [`SourceBundle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileStatus {
    Loaded { content: String },
    FetchFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    pub path: String,
    #[serde(flatten)]
    pub status: FileStatus,
}

/// Snapshot of the impacted files, one entry per ImpactSet path, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBundle {
    pub files: Vec<SourceFile>,
}

impl SourceBundle {
    pub fn loaded(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().filter_map(|f| match &f.status {
            FileStatus::Loaded { content } => Some((f.path.as_str(), content.as_str())),
            FileStatus::FetchFailed { .. } => None,
        })
    }

    pub fn failed_paths(&self) -> Vec<&str> {
        self.files
            .iter()
            .filter(|f| matches!(f.status, FileStatus::FetchFailed { .. }))
            .map(|f| f.path.as_str())
            .collect()
    }

    pub fn loaded_count(&self) -> usize {
        self.loaded().count()
    }

    pub fn content_of(&self, path: &str) -> Option<&str> {
        self.loaded().find(|(p, _)| *p == path).map(|(_, c)| c)
    }

    /// Concatenate loaded files under `// FILE: <path>` headers.
    ///
    /// Output is capped at `max_chars`; a file that does not fit is cut and
    /// marked, later files are listed by header only.
    pub fn render(&self, max_chars: usize) -> String {
        let mut out = String::new();
        let mut exhausted = false;
        for (path, content) in self.loaded() {
            let header = format!("// FILE: {path}\n");
            if exhausted {
                out.push_str(&header);
                out.push_str("// (omitted: context limit reached)\n\n");
                continue;
            }
            let remaining = max_chars.saturating_sub(out.len() + header.len());
            out.push_str(&header);
            if content.len() <= remaining {
                out.push_str(content);
                out.push_str("\n\n");
            } else {
                let mut cut = remaining;
                while cut > 0 && !content.is_char_boundary(cut) {
                    cut -= 1;
                }
                out.push_str(&content[..cut]);
                out.push_str("\n// ... truncated\n\n");
                exhausted = true;
            }
        }
        out
    }
}

/// Paired developer/tester stories derived from one SourceBundle + Query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoryPair {
    pub developer_story: String,
    pub tester_story: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Developer,
    Tester,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Developer => "developer",
            Role::Tester => "tester",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer to one persisted artifact revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub run_id: RunId,
    pub slot: String,
    pub revision: u32,
    pub digest: ContentDigest,
}

impl From<&ArtifactRecord> for ArtifactRef {
    fn from(rec: &ArtifactRecord) -> Self {
        Self {
            run_id: rec.key.run_id.clone(),
            slot: rec.key.slot.clone(),
            revision: rec.key.revision,
            digest: rec.digest.clone(),
        }
    }
}

/// Work item for one generator. `context` points at the SourceBundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    pub role: Role,
    pub story_text: String,
    pub context: ArtifactRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPair {
    pub developer: Task,
    pub tester: Task,
}

impl TaskPair {
    pub fn for_role(&self, role: Role) -> &Task {
        match role {
            Role::Developer => &self.developer,
            Role::Tester => &self.tester,
        }
    }
}

/// Which task (within the persisted `tasks` artifact) an output came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRef {
    pub assignment: ArtifactRef,
    pub role: Role,
}

/// Code or test output of one generator for one revision cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub role: Role,
    pub code: String,
    pub source_task: TaskRef,
    /// Revision cycle that produced this output (1-based)
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictStatus {
    Approved,
    NeedsRevision,
}

/// Whether a verdict came from the reviewer or stands in for an unparsable reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerdictOrigin {
    Reviewer,
    ParseFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewVerdict {
    pub status: VerdictStatus,
    pub comments: Vec<String>,
    pub code_version: u32,
    pub test_version: u32,
    pub origin: VerdictOrigin,
}

impl ReviewVerdict {
    pub fn is_approved(&self) -> bool {
        self.status == VerdictStatus::Approved
    }
}
