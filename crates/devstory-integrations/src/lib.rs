//! devstory-integrations: production collaborators for DevStory
//!
//! - `GitHubSource`: `RepositorySource` over the GitHub REST API
//! - `GeminiCompletion`: `CompletionService` over the Gemini REST API

pub mod error;
pub mod gemini;
pub mod github;

pub use error::{IntegrationError, Result};
pub use gemini::{GeminiCompletion, GeminiConfig};
pub use github::{GitHubConfig, GitHubSource};
