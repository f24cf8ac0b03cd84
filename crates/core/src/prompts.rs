//! Prompt Templates
//!
//! Every prompt the tutor sends is a markdown template with `{name}`
//! placeholders. The built-in templates are compiled in; a directory of
//! `<key>.md` files can override any of them.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKey {
    SystemPrompt,
    ExplainConcept,
    ProvideFeedback,
    GenerateHint,
    AnswerQuestion,
    Encouragement,
    EvaluateAnswer,
    TutoringQuestion,
    TutoringProgress,
    SummarizeConversation,
    EvaluateWithContext,
    AnswerWithContext,
}

impl PromptKey {
    pub const ALL: [PromptKey; 12] = [
        PromptKey::SystemPrompt,
        PromptKey::ExplainConcept,
        PromptKey::ProvideFeedback,
        PromptKey::GenerateHint,
        PromptKey::AnswerQuestion,
        PromptKey::Encouragement,
        PromptKey::EvaluateAnswer,
        PromptKey::TutoringQuestion,
        PromptKey::TutoringProgress,
        PromptKey::SummarizeConversation,
        PromptKey::EvaluateWithContext,
        PromptKey::AnswerWithContext,
    ];

    /// File stem of the template on disk.
    pub fn file_stem(self) -> &'static str {
        match self {
            PromptKey::SystemPrompt => "system_prompt",
            PromptKey::ExplainConcept => "explain_concept",
            PromptKey::ProvideFeedback => "provide_feedback",
            PromptKey::GenerateHint => "generate_hint",
            PromptKey::AnswerQuestion => "answer_question",
            PromptKey::Encouragement => "encouragement",
            PromptKey::EvaluateAnswer => "evaluate_answer",
            PromptKey::TutoringQuestion => "tutoring_question",
            PromptKey::TutoringProgress => "tutoring_progress",
            PromptKey::SummarizeConversation => "summarize_conversation",
            PromptKey::EvaluateWithContext => "evaluate_with_context",
            PromptKey::AnswerWithContext => "answer_with_context",
        }
    }

    pub fn from_file_stem(stem: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.file_stem() == stem)
    }

    fn builtin(self) -> &'static str {
        match self {
            PromptKey::SystemPrompt => include_str!("../prompts/system_prompt.md"),
            PromptKey::ExplainConcept => include_str!("../prompts/explain_concept.md"),
            PromptKey::ProvideFeedback => include_str!("../prompts/provide_feedback.md"),
            PromptKey::GenerateHint => include_str!("../prompts/generate_hint.md"),
            PromptKey::AnswerQuestion => include_str!("../prompts/answer_question.md"),
            PromptKey::Encouragement => include_str!("../prompts/encouragement.md"),
            PromptKey::EvaluateAnswer => include_str!("../prompts/evaluate_answer.md"),
            PromptKey::TutoringQuestion => include_str!("../prompts/tutoring_question.md"),
            PromptKey::TutoringProgress => include_str!("../prompts/tutoring_progress.md"),
            PromptKey::SummarizeConversation => {
                include_str!("../prompts/summarize_conversation.md")
            }
            PromptKey::EvaluateWithContext => include_str!("../prompts/evaluate_with_context.md"),
            PromptKey::AnswerWithContext => include_str!("../prompts/answer_with_context.md"),
        }
    }
}

/// The set of templates in use: built-ins plus any overrides.
#[derive(Debug, Clone, Default)]
pub struct PromptLibrary {
    overrides: HashMap<PromptKey, String>,
}

impl PromptLibrary {
    pub fn builtin() -> Self {
        Self::default()
    }

    /// Loads `<key>.md` overrides from `dir`. Files that do not name a known
    /// template are skipped.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut overrides = HashMap::new();
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read prompts directory {}", dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|s| s.to_str()) != Some("md") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .context("Could not get file stem")?;
            match PromptKey::from_file_stem(stem) {
                Some(key) => {
                    let content = std::fs::read_to_string(&path)?;
                    overrides.insert(key, content);
                }
                None => warn!(file = %path.display(), "Ignoring unknown prompt template"),
            }
        }
        info!(count = overrides.len(), dir = %dir.display(), "Loaded prompt overrides");
        Ok(Self { overrides })
    }

    pub fn template(&self, key: PromptKey) -> &str {
        self.overrides
            .get(&key)
            .map(String::as_str)
            .unwrap_or_else(|| key.builtin())
    }

    /// Fills the `{name}` placeholders of `key` from `vars`.
    pub fn render(&self, key: PromptKey, vars: &[(&str, &str)]) -> String {
        fill(self.template(key), vars).trim().to_string()
    }
}

/// Single-pass substitution; text inserted for one placeholder is never
/// rescanned, and braces that do not name a variable are kept verbatim.
fn fill(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let substituted = after.find('}').and_then(|close| {
            let name = &after[..close];
            vars.iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| (close, *v))
        });
        match substituted {
            Some((close, value)) => {
                out.push_str(value);
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}
