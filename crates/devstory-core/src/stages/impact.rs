//! Stage 1: select the files plausibly impacted by the query.

use std::collections::HashSet;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::context::RunContext;
use crate::domain::{ImpactSet, StageError};
use crate::java_outline;
use crate::parsing::parse_path_selection;
use crate::prompts::{impact_prompt, PromptKind};

/// List candidate files, ask the fast model to pick the relevant ones, and
/// keep only picks that exist in the listing.
pub async fn analyze(ctx: &RunContext) -> Result<ImpactSet, StageError> {
    let all = ctx.source.list_files(&ctx.project).await?;
    let total = all.len();
    let mut candidates: Vec<String> = all
        .into_iter()
        .filter(|p| ctx.config.is_source_path(p))
        .collect();

    if candidates.is_empty() {
        return Err(StageError::NoImpactedFilesFound {
            reason: format!(
                "none of {total} repository files match {:?}",
                ctx.config.source_extensions
            ),
        });
    }
    if candidates.len() > ctx.config.max_candidate_files {
        warn!(
            candidates = candidates.len(),
            limit = ctx.config.max_candidate_files,
            "candidate listing truncated"
        );
        candidates.truncate(ctx.config.max_candidate_files);
    }

    let listing = candidate_listing(ctx, &candidates).await;
    let prompt = impact_prompt(ctx.query.as_str(), &listing);
    let reply = ctx.complete(PromptKind::ImpactAnalysis, &prompt).await?;

    let selected = parse_path_selection(&reply).ok_or_else(|| StageError::NoImpactedFilesFound {
        reason: "selection is not a JSON array of paths".into(),
    })?;

    let known: HashSet<&str> = candidates.iter().map(String::as_str).collect();
    let (kept, dropped): (Vec<String>, Vec<String>) = selected
        .into_iter()
        .map(|p| p.trim().trim_start_matches("./").to_string())
        .partition(|p| known.contains(p.as_str()));
    if !dropped.is_empty() {
        warn!(dropped = ?dropped, "selection named files outside the listing");
    }

    let impact = ImpactSet::new(kept).ok_or_else(|| StageError::NoImpactedFilesFound {
        reason: "selection contains no listed file".into(),
    })?;
    debug!(files = impact.len(), "impact set selected");
    Ok(impact)
}

/// One line per candidate: the path, or `path :: outline` when outlines are on.
async fn candidate_listing(ctx: &RunContext, candidates: &[String]) -> String {
    if !ctx.config.outline_candidates {
        return candidates.join("\n");
    }

    let lines: Vec<String> = stream::iter(candidates.to_vec())
        .map(|path| {
            let source = Arc::clone(&ctx.source);
            let project = Arc::clone(&ctx.project);
            async move {
                match source.read_file(&project, &path).await {
                    Ok(text) => {
                        let outline = java_outline::outline(&text);
                        if outline.is_empty() {
                            path
                        } else {
                            format!("{path} :: {}", outline.summary())
                        }
                    }
                    Err(e) => {
                        debug!(path = %path, error = %e, "outline read failed");
                        path
                    }
                }
            }
        })
        .buffered(ctx.config.read_concurrency.max(1))
        .collect()
        .await;
    lines.join("\n")
}
