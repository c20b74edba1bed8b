//! Stage 2: materialize the impacted files into a SourceBundle.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::warn;

use crate::collaborators::RepoError;
use crate::context::RunContext;
use crate::domain::{FileStatus, ImpactSet, SourceBundle, SourceFile, StageError};

/// Read every ImpactSet path. Individual failures are recorded per file;
/// the stage fails only when no file could be read.
pub async fn read_sources(ctx: &RunContext, impact: &ImpactSet) -> Result<SourceBundle, StageError> {
    let results: Vec<(String, Result<String, RepoError>)> = stream::iter(impact.paths().to_vec())
        .map(|path| {
            let source = Arc::clone(&ctx.source);
            let project = Arc::clone(&ctx.project);
            async move {
                let result = source.read_file(&project, &path).await;
                (path, result)
            }
        })
        .buffered(ctx.config.read_concurrency.max(1))
        .collect()
        .await;

    let mut files = Vec::with_capacity(results.len());
    let mut all_transient = true;
    for (path, result) in results {
        let status = match result {
            Ok(content) => FileStatus::Loaded { content },
            Err(e) => {
                warn!(path = %path, error = %e, "file fetch failed, omitted from bundle");
                all_transient &= matches!(e, RepoError::NetworkError(_));
                FileStatus::FetchFailed {
                    reason: e.to_string(),
                }
            }
        };
        files.push(SourceFile { path, status });
    }

    let bundle = SourceBundle { files };
    if bundle.loaded_count() == 0 {
        return Err(StageError::SourceUnavailable {
            failed: bundle.files.len(),
            transient: all_transient,
        });
    }
    Ok(bundle)
}
