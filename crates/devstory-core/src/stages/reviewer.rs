//! Stage 6: review one cycle's code and tests.

use crate::context::RunContext;
use crate::domain::{GeneratedArtifact, ReviewVerdict, StageError, VerdictOrigin, VerdictStatus};
use crate::metrics::METRICS;
use crate::obs;
use crate::parsing::parse_verdict;
use crate::prompts::{review_prompt, PromptKind};

pub const FALLBACK_COMMENT: &str =
    "Reviewer response could not be parsed; regenerate and resubmit for review.";

pub async fn review(
    ctx: &RunContext,
    code: &GeneratedArtifact,
    tests: &GeneratedArtifact,
) -> Result<ReviewVerdict, StageError> {
    let prompt = review_prompt(&code.code, &tests.code, code.version);
    let reply = ctx.complete(PromptKind::Review, &prompt).await?;
    Ok(verdict_from_reply(&reply, code.version, tests.version))
}

/// Parse a reviewer reply. An unparsable reply becomes a `NeedsRevision`
/// verdict marked `ParseFallback` and is logged as a soft failure.
pub fn verdict_from_reply(reply: &str, code_version: u32, test_version: u32) -> ReviewVerdict {
    match parse_verdict(reply) {
        Ok((status, comments)) => ReviewVerdict {
            status,
            comments,
            code_version,
            test_version,
            origin: VerdictOrigin::Reviewer,
        },
        Err(e) => {
            obs::emit_soft_verdict_failure(code_version, &e.to_string());
            METRICS.inc_soft_verdict_failures();
            ReviewVerdict {
                status: VerdictStatus::NeedsRevision,
                comments: vec![FALLBACK_COMMENT.to_string()],
                code_version,
                test_version,
                origin: VerdictOrigin::ParseFallback,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_verdict_is_marked_reviewer() {
        let v = verdict_from_reply("VERDICT: APPROVED", 2, 2);
        assert!(v.is_approved());
        assert_eq!(v.origin, VerdictOrigin::Reviewer);
        assert_eq!(v.code_version, 2);
    }

    #[test]
    fn unparsable_reply_falls_back_to_needs_revision() {
        let v = verdict_from_reply("I think it is mostly fine?", 1, 1);
        assert_eq!(v.status, VerdictStatus::NeedsRevision);
        assert_eq!(v.origin, VerdictOrigin::ParseFallback);
        assert_eq!(v.comments, vec![FALLBACK_COMMENT.to_string()]);
    }

    #[test]
    fn real_rejection_is_not_a_fallback() {
        let v = verdict_from_reply("VERDICT: NEEDS_REVISION\nCOMMENTS:\n- add tests", 1, 1);
        assert_eq!(v.status, VerdictStatus::NeedsRevision);
        assert_eq!(v.origin, VerdictOrigin::Reviewer);
        assert_eq!(v.comments, vec!["add tests".to_string()]);
    }
}
