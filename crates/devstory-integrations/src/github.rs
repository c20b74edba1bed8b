//! GitHub REST implementation of `RepositorySource`.
//!
//! Files are enumerated from the recursive git tree of the resolved ref and
//! read through the contents API in raw form. `HEAD` resolves to the
//! repository's default branch (cached per repository).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use devstory_core::domain::project::DEFAULT_REF;
use devstory_core::{ProjectRef, RepoError, RepositorySource};
use reqwest::{RequestBuilder, StatusCode, Url};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{IntegrationError, Result};

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// GitHub API configuration
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    /// API base URL (GitHub Enterprise installs use `https://host/api/v3`)
    pub api_url: String,
    /// Per-request timeout
    pub timeout_secs: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        GitHubConfig {
            api_url: std::env::var("GITHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            timeout_secs: 30,
        }
    }
}

impl GitHubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    pub fn new(api_url: &str) -> Self {
        GitHubConfig {
            api_url: api_url.trim_end_matches('/').to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize)]
struct RepoInfo {
    default_branch: String,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TreeResponse {
    tree: Vec<TreeEntry>,
    #[serde(default)]
    truncated: bool,
}

/// GitHub-backed repository source
pub struct GitHubSource {
    config: GitHubConfig,
    base: Url,
    http: reqwest::Client,
    default_branches: Mutex<HashMap<String, String>>,
}

impl GitHubSource {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url).map_err(|e| IntegrationError::InvalidConfig {
            var: "GITHUB_API_URL",
            reason: e.to_string(),
        })?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("devstory/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(GitHubSource {
            config,
            base,
            http,
            default_branches: Mutex::new(HashMap::new()),
        })
    }

    pub fn from_env() -> Result<Self> {
        Self::new(GitHubConfig::from_env())
    }

    pub fn config(&self) -> &GitHubConfig {
        &self.config
    }

    fn endpoint<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> std::result::Result<Url, RepoError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| RepoError::NetworkError(format!("API URL cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn request(&self, project: &ProjectRef, url: Url, accept: &str) -> RequestBuilder {
        let req = self
            .http
            .get(url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", API_VERSION);
        if project.access_token.is_empty() {
            req
        } else {
            req.bearer_auth(project.access_token.expose())
        }
    }

    async fn send(&self, req: RequestBuilder, what: &str) -> std::result::Result<reqwest::Response, RepoError> {
        let response = req
            .send()
            .await
            .map_err(|e| RepoError::NetworkError(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let remaining = response
            .headers()
            .get("x-ratelimit-remaining")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        Err(classify_status(status, remaining.as_deref(), what))
    }

    /// Concrete ref to read from; `HEAD` becomes the default branch.
    async fn resolve_ref(&self, project: &ProjectRef) -> std::result::Result<String, RepoError> {
        if project.branch_or_ref != DEFAULT_REF {
            return Ok(project.branch_or_ref.clone());
        }
        let key = project.project_key();
        if let Some(branch) = self.cached_branch(&key) {
            return Ok(branch);
        }

        let url = self.endpoint(["repos", project.owner.as_str(), project.repo_name.as_str()])?;
        let response = self
            .send(self.request(project, url, "application/vnd.github+json"), &key)
            .await?;
        let info: RepoInfo = response
            .json()
            .await
            .map_err(|e| RepoError::NetworkError(format!("malformed repository response: {e}")))?;

        debug!(repo = %key, branch = %info.default_branch, "resolved default branch");
        if let Ok(mut cache) = self.default_branches.lock() {
            cache.insert(key, info.default_branch.clone());
        }
        Ok(info.default_branch)
    }

    fn cached_branch(&self, key: &str) -> Option<String> {
        self.default_branches
            .lock()
            .ok()
            .and_then(|cache| cache.get(key).cloned())
    }
}

#[async_trait]
impl RepositorySource for GitHubSource {
    async fn list_files(&self, project: &ProjectRef) -> std::result::Result<Vec<String>, RepoError> {
        let git_ref = self.resolve_ref(project).await?;
        let mut url = self.endpoint([
            "repos",
            project.owner.as_str(),
            project.repo_name.as_str(),
            "git",
            "trees",
            git_ref.as_str(),
        ])?;
        url.query_pairs_mut().append_pair("recursive", "1");

        let response = self
            .send(
                self.request(project, url, "application/vnd.github+json"),
                &format!("{}@{git_ref}", project.project_key()),
            )
            .await?;
        let tree: TreeResponse = response
            .json()
            .await
            .map_err(|e| RepoError::NetworkError(format!("malformed tree response: {e}")))?;

        if tree.truncated {
            warn!(repo = %project.project_key(), "git tree listing truncated by GitHub");
        }
        Ok(blob_paths(tree))
    }

    async fn read_file(&self, project: &ProjectRef, path: &str) -> std::result::Result<String, RepoError> {
        let git_ref = self.resolve_ref(project).await?;
        let mut url = self.endpoint(
            ["repos", project.owner.as_str(), project.repo_name.as_str(), "contents"]
                .into_iter()
                .chain(path.split('/').filter(|s| !s.is_empty())),
        )?;
        url.query_pairs_mut().append_pair("ref", &git_ref);

        let response = self
            .send(self.request(project, url, "application/vnd.github.raw"), path)
            .await?;
        response
            .text()
            .await
            .map_err(|e| RepoError::NetworkError(e.to_string()))
    }
}

fn blob_paths(tree: TreeResponse) -> Vec<String> {
    tree.tree
        .into_iter()
        .filter(|e| e.kind == "blob")
        .map(|e| e.path)
        .collect()
}

/// Map a non-success GitHub status. Only network-class failures are retried
/// upstream, so an exhausted rate limit is reported as a network error.
fn classify_status(status: StatusCode, ratelimit_remaining: Option<&str>, what: &str) -> RepoError {
    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && ratelimit_remaining == Some("0"));
    match status {
        _ if rate_limited => RepoError::NetworkError(format!("rate limited ({status})")),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RepoError::AuthError(format!("{status} for {what}"))
        }
        StatusCode::NOT_FOUND | StatusCode::UNPROCESSABLE_ENTITY => RepoError::NotFound {
            path: what.to_string(),
        },
        s => RepoError::NetworkError(format!("unexpected status {s} for {what}")),
    }
}
