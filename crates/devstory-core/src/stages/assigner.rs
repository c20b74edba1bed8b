//! Stage 4: split a StoryPair into one task per role.

use crate::domain::{ArtifactRef, Role, StageError, StoryPair, Task, TaskPair};

/// Pure and deterministic: identical inputs yield identical tasks.
///
/// `context` is the persisted SourceBundle both generators read from.
pub fn assign_tasks(stories: &StoryPair, context: &ArtifactRef) -> Result<TaskPair, StageError> {
    let developer = stories.developer_story.trim();
    if developer.is_empty() {
        return Err(StageError::MissingStorySection {
            section: Role::Developer.to_string(),
        });
    }
    let tester = stories.tester_story.trim();
    if tester.is_empty() {
        return Err(StageError::MissingStorySection {
            section: Role::Tester.to_string(),
        });
    }

    Ok(TaskPair {
        developer: Task {
            role: Role::Developer,
            story_text: developer.to_string(),
            context: context.clone(),
        },
        tester: Task {
            role: Role::Tester,
            story_text: tester.to_string(),
            context: context.clone(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use devstory_state::{ContentDigest, RunId};

    fn bundle_ref() -> ArtifactRef {
        ArtifactRef {
            run_id: RunId::from("run-1"),
            slot: "source_bundle".into(),
            revision: 0,
            digest: ContentDigest::from_bytes(b"bundle"),
        }
    }

    fn stories() -> StoryPair {
        StoryPair {
            developer_story: "Add a login endpoint.".into(),
            tester_story: "Verify login rejects bad passwords.".into(),
        }
    }

    #[test]
    fn assigns_each_role_with_shared_context() {
        let tasks = assign_tasks(&stories(), &bundle_ref()).unwrap();
        assert_eq!(tasks.developer.role, Role::Developer);
        assert_eq!(tasks.tester.role, Role::Tester);
        assert_eq!(tasks.developer.context, bundle_ref());
        assert_eq!(tasks.tester.context, bundle_ref());
        assert_eq!(tasks.for_role(Role::Tester).story_text, "Verify login rejects bad passwords.");
    }

    #[test]
    fn deterministic_across_invocations() {
        let a = assign_tasks(&stories(), &bundle_ref()).unwrap();
        let b = assign_tasks(&stories(), &bundle_ref()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn blank_section_is_missing() {
        let pair = StoryPair {
            developer_story: "x".into(),
            tester_story: "  ".into(),
        };
        let err = assign_tasks(&pair, &bundle_ref()).unwrap_err();
        assert!(matches!(err, StageError::MissingStorySection { ref section } if section == "tester"));
    }
}
