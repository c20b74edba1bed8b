//! Prompt templates, one per model-backed stage.
//!
//! Every prompt opens with an `# Agent: <persona>` header and states the
//! response contract that [`crate::parsing`] enforces.

use crate::collaborators::ModelTier;
use crate::domain::Role;
use crate::parsing::{DEVELOPER_DELIMITER, TESTER_DELIMITER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    ImpactAnalysis,
    Stories,
    CodeGeneration,
    TestGeneration,
    Review,
}

impl PromptKind {
    pub fn persona(&self) -> &'static str {
        match self {
            PromptKind::ImpactAnalysis => "Information Retrieval Expert",
            PromptKind::Stories => "Tech Lead",
            PromptKind::CodeGeneration => "Backend Developer",
            PromptKind::TestGeneration => "QA Engineer",
            PromptKind::Review => "Code Reviewer",
        }
    }

    pub fn tier(&self) -> ModelTier {
        match self {
            PromptKind::ImpactAnalysis => ModelTier::Fast,
            _ => ModelTier::Quality,
        }
    }

    pub fn for_role(role: Role) -> Self {
        match role {
            Role::Developer => PromptKind::CodeGeneration,
            Role::Tester => PromptKind::TestGeneration,
        }
    }

    /// Header line that starts every prompt of this kind.
    pub fn header(&self) -> String {
        format!("# Agent: {}", self.persona())
    }

    /// Recover the kind from a prompt's header line.
    pub fn detect(prompt: &str) -> Option<Self> {
        let first = prompt.lines().next()?;
        [
            PromptKind::ImpactAnalysis,
            PromptKind::Stories,
            PromptKind::CodeGeneration,
            PromptKind::TestGeneration,
            PromptKind::Review,
        ]
        .into_iter()
        .find(|k| first == k.header())
    }
}

pub fn impact_prompt(query: &str, listing: &str) -> String {
    format!(
        "{header}\n\
         You are an information retrieval expert for a Java Spring Boot project.\n\
         Select the source files a developer would need to change or read to implement \
         the feature request below. Choose only from the listed paths.\n\n\
         ## Feature request\n{query}\n\n\
         ## Candidate files\n{listing}\n\n\
         ## Response format\n\
         Reply with a JSON array of file paths and nothing else, for example:\n\
         [\"src/main/java/com/acme/OrderService.java\"]\n",
        header = PromptKind::ImpactAnalysis.header(),
    )
}

pub fn stories_prompt(query: &str, source: &str) -> String {
    format!(
        "{header}\n\
         You are an experienced Tech Lead translating feature requests into actionable \
         user stories. Using the feature request and the current source below, write \
         user stories for the developers and matching stories for the testers. Tester \
         stories must only cover behaviour described in the developer stories.\n\n\
         ## Feature request\n{query}\n\n\
         ## Current source\n{source}\n\
         ## Response format\n\
         {DEVELOPER_DELIMITER}\n<developer stories with acceptance criteria>\n\
         {TESTER_DELIMITER}\n<tester stories with test scenarios>\n\
         Use each heading exactly once, in this order.\n",
        header = PromptKind::Stories.header(),
    )
}

/// Inputs for one generator call.
pub struct GenerationPrompt<'a> {
    pub role: Role,
    pub story: &'a str,
    pub source: &'a str,
    pub version: u32,
    /// Reviewer comments from the previous cycle
    pub feedback: &'a [String],
}

pub fn generation_prompt(p: &GenerationPrompt<'_>) -> String {
    let kind = PromptKind::for_role(p.role);
    let instructions = match p.role {
        Role::Developer => {
            "You are a backend developer specialised in Java, Spring Boot and JPA. \
             Implement the user stories below against the existing code. Do not write test code."
        }
        Role::Tester => {
            "You are a QA engineer. Write JUnit 5 test cases that validate the behaviour \
             described in the tester stories below against the existing code."
        }
    };

    let mut out = format!(
        "{header}\n{instructions}\n\n\
         ## Stories\n{story}\n\n\
         ## Existing source\n{source}\n",
        header = kind.header(),
        story = p.story,
        source = p.source,
    );

    if !p.feedback.is_empty() {
        out.push_str(&format!(
            "\n## Reviewer feedback on revision {}\nAddress every point:\n",
            p.version.saturating_sub(1)
        ));
        for item in p.feedback {
            out.push_str(&format!("- {item}\n"));
        }
    }

    out.push_str(
        "\n## Response format\n\
         Return the complete Java source in one or more fenced ```java code blocks.\n",
    );
    out
}

pub fn review_prompt(code: &str, tests: &str, version: u32) -> String {
    format!(
        "{header}\n\
         You are a senior software architect reviewing revision {version} of generated \
         Spring Boot code and its JUnit tests. Check that the code fulfils its stories, \
         follows best practices, and that the tests validate it.\n\n\
         ## Implementation\n```java\n{code}\n```\n\n\
         ## Tests\n```java\n{tests}\n```\n\n\
         ## Response format\n\
         VERDICT: APPROVED or VERDICT: NEEDS_REVISION\n\
         COMMENTS:\n- <one line per required change>\n",
        header = PromptKind::Review.header(),
    )
}
