//! Lesson Scripts
//!
//! A lesson is an ordered, static list of steps. The store walks it by index;
//! the successor pointers are kept for validation and for callers that want to
//! follow the authored order explicitly.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// The shape of a single scripted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepKind {
    /// Narration from the tutor; the student continues when ready.
    Bot,
    /// Multiple-choice question graded by the evaluator.
    Question,
    /// Short-answer check graded by the evaluator.
    Quiz,
    /// Open prompt; any thoughtful reply moves the lesson on.
    Reflection,
    Explanation,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonStep {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: StepKind,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl LessonStep {
    fn new(id: &str, kind: StepKind, content: &str) -> Self {
        Self {
            id: id.to_string(),
            kind,
            content: content.to_string(),
            prompt: None,
            options: None,
            answer: None,
            next_step_id: None,
            metadata: None,
        }
    }

    fn prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    fn options(mut self, options: &[&str]) -> Self {
        self.options = Some(options.iter().map(|o| o.to_string()).collect());
        self
    }

    fn answer(mut self, answer: &str) -> Self {
        self.answer = Some(answer.to_string());
        self
    }

    fn then(mut self, next: &str) -> Self {
        self.next_step_id = Some(next.to_string());
        self
    }

    /// The text a student is asked to respond to: the prompt when present,
    /// otherwise the step content.
    pub fn question_text(&self) -> &str {
        self.prompt.as_deref().unwrap_or(&self.content)
    }

    /// Whether answers to this step are graded by the evaluator.
    pub fn is_graded(&self) -> bool {
        matches!(self.kind, StepKind::Question | StepKind::Quiz)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LessonError {
    #[error("Failed to read lesson file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to parse lesson: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid lesson '{lesson}': {reason}")]
    Invalid { lesson: String, reason: String },
}

/// A complete lesson: metadata plus its ordered steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonConfig {
    pub id: String,
    pub title: String,
    /// Short subject name used in prompts (e.g. "number systems").
    pub topic: String,
    pub description: String,
    /// Areas the tutor should keep free-form answers anchored to.
    #[serde(default)]
    pub focus_areas: Vec<String>,
    pub steps: Vec<LessonStep>,
    #[serde(rename = "estimatedDuration")]
    pub estimated_duration_minutes: u32,
}

impl LessonConfig {
    pub fn from_json_str(json: &str) -> Result<Self, LessonError> {
        let lesson: LessonConfig = serde_json::from_str(json)?;
        lesson.validate()?;
        Ok(lesson)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, LessonError> {
        let json = std::fs::read_to_string(path).map_err(|source| LessonError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Checks the structural rules every lesson must satisfy.
    pub fn validate(&self) -> Result<(), LessonError> {
        let invalid = |reason: String| LessonError::Invalid {
            lesson: self.id.clone(),
            reason,
        };

        if self.steps.is_empty() {
            return Err(invalid("lesson has no steps".to_string()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(invalid(format!("duplicate step id '{}'", step.id)));
            }
        }

        for step in &self.steps {
            if let Some(next) = &step.next_step_id {
                if !seen.contains(next.as_str()) {
                    return Err(invalid(format!(
                        "step '{}' points at unknown step '{}'",
                        step.id, next
                    )));
                }
            }
            if let (Some(options), Some(answer)) = (&step.options, &step.answer) {
                if step.is_graded() && !options.iter().any(|o| o == answer) {
                    return Err(invalid(format!(
                        "answer of step '{}' is not among its options",
                        step.id
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn find_step(&self, id: &str) -> Option<&LessonStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Follows the successor pointer of `id`.
    pub fn next_step(&self, id: &str) -> Option<&LessonStep> {
        self.find_step(id)
            .and_then(|s| s.next_step_id.as_deref())
            .and_then(|next| self.find_step(next))
    }

    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// A step with no successor ends the lesson. Unknown ids are never last.
    pub fn is_last_step(&self, id: &str) -> bool {
        self.find_step(id)
            .map(|s| s.next_step_id.is_none())
            .unwrap_or(false)
    }
}

/// Every lesson that ships with the tutor.
pub fn available_lessons() -> Vec<LessonConfig> {
    vec![number_systems()]
}

/// "Journey Through Number Systems": from counting sheep to hexadecimal.
pub fn number_systems() -> LessonConfig {
    use StepKind::*;

    let steps = vec![
        LessonStep::new(
            "welcome",
            Bot,
            "Namaste, learner! 🙏 Welcome to our journey through the fascinating world of number systems. I'm your guide today, and together we'll explore how humans have counted and calculated throughout history. Feel free to ask me any questions along the way!",
        )
        .then("intro_question"),
        LessonStep::new(
            "intro_question",
            Question,
            "Imagine you're in a village 5000 years ago, before any written numbers existed. You need to count your sheep. What would you naturally use to keep track?",
        )
        .prompt("How would ancient people count without written numbers?")
        .options(&[
            "Their fingers and toes",
            "Sticks and stones",
            "Lines carved in wood or stone",
            "All of the above",
        ])
        .answer("All of the above")
        .then("counting_reflection"),
        LessonStep::new(
            "counting_reflection",
            Reflection,
            "Excellent thinking! Humans have always been creative with counting. Let's reflect on this:",
        )
        .prompt("Can you think of any number system you've seen apart from our usual decimal (base-10) system? Maybe in computers, clocks, or other areas of life?")
        .then("binary_intro"),
        LessonStep::new(
            "binary_intro",
            Bot,
            "Great observations! You might have mentioned binary (computers), base-60 (time), or even base-12 (dozens). Today we'll focus on binary - the language of computers. Every message, photo, and video is just 1s and 0s! Have any questions about how this works?",
        )
        .then("binary_explanation"),
        LessonStep::new(
            "binary_explanation",
            Bot,
            "In decimal, we use 10 digits (0-9) and each position represents a power of 10. In binary, we use only 2 digits (0, 1) and each position represents a power of 2. Let's convert the decimal number 5 to binary. We break it down: 5 = 4 + 1 = 2² + 2⁰ = 101 in binary. Can you see the pattern?",
        )
        .then("binary_quiz1"),
        LessonStep::new("binary_quiz1", Quiz, "Let's test your understanding!")
            .prompt("What is the decimal number 8 in binary?")
            .options(&["1000", "1001", "1010", "1100"])
            .answer("1000")
            .then("binary_quiz2"),
        LessonStep::new("binary_quiz2", Quiz, "One more quick check:")
            .prompt("What base is the binary number system?")
            .answer("2")
            .then("practical_reflection"),
        LessonStep::new(
            "practical_reflection",
            Reflection,
            "Wonderful! You're getting the hang of this. Binary is everywhere in our digital world.",
        )
        .prompt("Now think about this: Why do you think computers use binary instead of decimal like humans do? What advantages might this have?")
        .then("hexadecimal_intro"),
        LessonStep::new(
            "hexadecimal_intro",
            Bot,
            "Excellent reasoning! Computers use binary because it's simple - each bit is either ON (1) or OFF (0), like a light switch. But binary numbers get very long, so programmers often use hexadecimal (base-16) as a shorthand.",
        )
        .then("hex_explanation"),
        LessonStep::new(
            "hex_explanation",
            Bot,
            "Hexadecimal uses 16 symbols: 0-9 and A-F (where A=10, B=11, C=12, D=13, E=14, F=15). One hex digit represents exactly 4 binary digits! For example: Binary 1111 = Decimal 15 = Hex F. And Binary 1010 = Decimal 10 = Hex A. See how much shorter hex is?",
        )
        .then("hex_quiz"),
        LessonStep::new("hex_quiz", Quiz, "Let's practice hex conversion:")
            .prompt("What is the hexadecimal representation of decimal 255?")
            .options(&["FF", "FE", "F0", "EF"])
            .answer("FF")
            .then("final_reflection"),
        LessonStep::new(
            "final_reflection",
            Reflection,
            "Amazing work! You've learned about different number systems that power our digital world.",
        )
        .prompt("Take a moment to reflect: How has learning about different number systems changed your perspective on mathematics or technology? What was the most surprising thing you learned today?")
        .then("conclusion"),
        LessonStep::new(
            "conclusion",
            Bot,
            "🎉 Congratulations! You've completed your journey through number systems. From ancient counting methods to modern binary and hexadecimal, you now understand the foundation of all digital technology. Keep exploring, keep questioning, and remember - every complex system started with simple ideas like counting on fingers! 🌟",
        ),
    ];

    LessonConfig {
        id: "number_systems_intro".to_string(),
        title: "Journey Through Number Systems".to_string(),
        topic: "number systems".to_string(),
        description: "An interactive exploration of how humans count and how computers think, from ancient methods to modern binary and hexadecimal systems.".to_string(),
        focus_areas: ["number systems", "binary", "decimal", "hexadecimal", "computer science basics"]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        steps,
        estimated_duration_minutes: 25,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_lesson_is_valid() {
        let lesson = number_systems();
        lesson.validate().expect("built-in lesson must validate");
        assert_eq!(lesson.total_steps(), 13);
        assert_eq!(lesson.steps[0].id, "welcome");
        assert_eq!(lesson.steps[12].id, "conclusion");
    }

    #[test]
    fn test_successor_chain_matches_order() {
        let lesson = number_systems();
        for pair in lesson.steps.windows(2) {
            assert_eq!(pair[0].next_step_id.as_deref(), Some(pair[1].id.as_str()));
        }
        assert_eq!(
            lesson.next_step("binary_quiz1").map(|s| s.id.as_str()),
            Some("binary_quiz2")
        );
        assert!(lesson.next_step("conclusion").is_none());
        assert!(lesson.next_step("missing").is_none());
    }

    #[test]
    fn test_lookup_helpers() {
        let lesson = number_systems();
        assert_eq!(lesson.step_index("hex_quiz"), Some(10));
        assert_eq!(lesson.step_index("nope"), None);
        assert!(lesson.is_last_step("conclusion"));
        assert!(!lesson.is_last_step("welcome"));
        assert!(!lesson.is_last_step("nope"));
        assert_eq!(
            lesson.find_step("binary_quiz2").and_then(|s| s.answer.as_deref()),
            Some("2")
        );
    }

    #[test]
    fn test_question_text_prefers_prompt() {
        let lesson = number_systems();
        let quiz = lesson.find_step("hex_quiz").unwrap();
        assert_eq!(
            quiz.question_text(),
            "What is the hexadecimal representation of decimal 255?"
        );
        let welcome = lesson.find_step("welcome").unwrap();
        assert_eq!(welcome.question_text(), welcome.content);
    }

    #[test]
    fn test_validate_rejects_broken_lessons() {
        let mut lesson = number_systems();
        lesson.steps[1].id = "welcome".to_string();
        assert!(matches!(
            lesson.validate(),
            Err(LessonError::Invalid { reason, .. }) if reason.contains("duplicate")
        ));

        let mut lesson = number_systems();
        lesson.steps[0].next_step_id = Some("nowhere".to_string());
        assert!(lesson.validate().is_err());

        let mut lesson = number_systems();
        lesson.steps[5].answer = Some("1111".to_string());
        assert!(lesson.validate().is_err());

        let mut lesson = number_systems();
        lesson.steps.clear();
        assert!(lesson.validate().is_err());
    }

    #[test]
    fn test_lesson_json_round_trips_through_a_file() {
        let json = serde_json::to_string_pretty(&number_systems()).unwrap();
        assert!(json.contains("\"type\": \"quiz\""));
        assert!(json.contains("\"nextStepId\""));
        assert!(json.contains("\"estimatedDuration\": 25"));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        let loaded = LessonConfig::from_json_file(file.path()).unwrap();
        assert_eq!(loaded, number_systems());
    }

    #[test]
    fn test_missing_lesson_file_reports_path() {
        let err = LessonConfig::from_json_file(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.json"));
    }
}
