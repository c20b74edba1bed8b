//! Stage 3: paired developer/tester stories from query + source.

use crate::context::RunContext;
use crate::domain::{SourceBundle, StageError, StoryPair};
use crate::parsing::split_stories;
use crate::prompts::{stories_prompt, PromptKind};

pub async fn generate_stories(
    ctx: &RunContext,
    bundle: &SourceBundle,
) -> Result<StoryPair, StageError> {
    let source = bundle.render(ctx.config.max_context_chars);
    let prompt = stories_prompt(ctx.query.as_str(), &source);
    let reply = ctx.complete(PromptKind::Stories, &prompt).await?;
    split_stories(&reply)
}
