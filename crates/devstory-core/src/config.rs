//! Pipeline tuning knobs.

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: String, value: String },
}

/// Configuration shared by every run an orchestrator drives.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Additional attempts for transient stage errors (0 = run once).
    pub max_retries: u32,
    /// Base delay for exponential backoff between attempts (milliseconds).
    pub backoff_base_ms: u64,
    /// Wall-clock limit for a single completion call (milliseconds).
    pub completion_timeout_ms: u64,
    /// Generating→Reviewing cycles allowed before `ReviewLimitExceeded`.
    pub max_review_cycles: u32,
    /// Continue into code generation without waiting for a trigger.
    pub auto_generate: bool,
    /// Candidate file suffixes offered to the impact analyzer.
    pub source_extensions: Vec<String>,
    /// Cap on candidate paths embedded in the impact prompt.
    pub max_candidate_files: usize,
    /// Embed type/method signatures of each candidate in the impact prompt.
    pub outline_candidates: bool,
    /// Concurrent file reads.
    pub read_concurrency: usize,
    /// Cap on source text embedded in a single prompt (characters).
    pub max_context_chars: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff_base_ms: 500,
            completion_timeout_ms: 120_000,
            max_review_cycles: 3,
            auto_generate: false,
            source_extensions: vec![".java".to_string()],
            max_candidate_files: 400,
            outline_candidates: false,
            read_concurrency: 4,
            max_context_chars: 60_000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(var: &str, current: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value: raw,
        }),
        Err(_) => Ok(current),
    }
}

impl PipelineConfig {
    /// Defaults overridden by `DEVSTORY_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let d = Self::default();
        let source_extensions = match std::env::var("DEVSTORY_SOURCE_EXTENSIONS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    if s.starts_with('.') {
                        s.to_string()
                    } else {
                        format!(".{s}")
                    }
                })
                .collect(),
            Err(_) => d.source_extensions.clone(),
        };

        let cfg = Self {
            max_retries: env_parse("DEVSTORY_MAX_RETRIES", d.max_retries)?,
            backoff_base_ms: env_parse("DEVSTORY_BACKOFF_BASE_MS", d.backoff_base_ms)?,
            completion_timeout_ms: env_parse(
                "DEVSTORY_COMPLETION_TIMEOUT_MS",
                d.completion_timeout_ms,
            )?,
            max_review_cycles: env_parse("DEVSTORY_MAX_REVIEW_CYCLES", d.max_review_cycles)?,
            auto_generate: env_parse("DEVSTORY_AUTO_GENERATE", d.auto_generate)?,
            source_extensions,
            max_candidate_files: env_parse("DEVSTORY_MAX_CANDIDATE_FILES", d.max_candidate_files)?,
            outline_candidates: env_parse("DEVSTORY_OUTLINE_CANDIDATES", d.outline_candidates)?,
            read_concurrency: env_parse("DEVSTORY_READ_CONCURRENCY", d.read_concurrency)?,
            max_context_chars: env_parse("DEVSTORY_MAX_CONTEXT_CHARS", d.max_context_chars)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_review_cycles == 0 {
            return Err(ConfigError::Invalid {
                var: "max_review_cycles".into(),
                value: "0".into(),
            });
        }
        if self.read_concurrency == 0 {
            return Err(ConfigError::Invalid {
                var: "read_concurrency".into(),
                value: "0".into(),
            });
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base_ms: self.backoff_base_ms,
        }
    }

    /// Whether `path` ends in one of the configured source extensions.
    pub fn is_source_path(&self, path: &str) -> bool {
        self.source_extensions.iter().any(|ext| path.ends_with(ext.as_str()))
    }
}
