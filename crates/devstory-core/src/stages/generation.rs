//! Stage 5: code and test generation. One call per role per revision cycle.

use crate::context::RunContext;
use crate::domain::{GeneratedArtifact, SourceBundle, StageError, Task, TaskRef};
use crate::parsing::extract_code;
use crate::prompts::{generation_prompt, GenerationPrompt, PromptKind};

/// Generate the artifact for `task` at revision `version`.
///
/// `feedback` holds the previous cycle's reviewer comments (empty on cycle 1).
pub async fn generate(
    ctx: &RunContext,
    task: &Task,
    bundle: &SourceBundle,
    source_task: TaskRef,
    version: u32,
    feedback: &[String],
) -> Result<GeneratedArtifact, StageError> {
    let source = bundle.render(ctx.config.max_context_chars);
    let prompt = generation_prompt(&GenerationPrompt {
        role: task.role,
        story: &task.story_text,
        source: &source,
        version,
        feedback,
    });
    let reply = ctx
        .complete(PromptKind::for_role(task.role), &prompt)
        .await?;
    let code = extract_code(&reply).ok_or(StageError::GenerationEmpty { role: task.role })?;

    Ok(GeneratedArtifact {
        role: task.role,
        code,
        source_task,
        version,
    })
}
