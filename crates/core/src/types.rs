//! Domain types shared by the lesson store, the tutor helpers and the services.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::lesson::LessonStep;

/// Who authored a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Bot,
    Student,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Bot => write!(f, "bot"),
            Role::Student => write!(f, "student"),
        }
    }
}

/// A single entry in the chat transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
}

impl Message {
    /// Creates a message stamped with a fresh id and the current time.
    pub fn new(role: Role, text: impl Into<String>, step_id: Option<String>) -> Self {
        Self {
            id: format!("msg-{}", Uuid::new_v4()),
            role,
            text: text.into(),
            timestamp: Utc::now(),
            step_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvaluationStatus {
    Pass,
    Fail,
}

/// What the evaluator recommends after grading an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NextAction {
    Proceed,
    Tutor,
    Retry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionKind {
    Leading,
    Conceptual,
    Verification,
}

impl fmt::Display for QuestionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuestionKind::Leading => write!(f, "leading"),
            QuestionKind::Conceptual => write!(f, "conceptual"),
            QuestionKind::Verification => write!(f, "verification"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ApproachType {
    #[default]
    Guided,
    Conceptual,
    Practical,
}

/// One question of a remedial tutoring plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutoringQuestion {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: QuestionKind,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_answer: Option<String>,
    #[serde(default)]
    pub hints: Vec<String>,
}

/// A remedial branch proposed by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutoringPlan {
    #[serde(default)]
    pub target_concepts: Vec<String>,
    #[serde(default)]
    pub questions: Vec<TutoringQuestion>,
    #[serde(default, rename = "approachType")]
    pub approach: ApproachType,
    /// Expected length of the branch in minutes.
    #[serde(default)]
    pub estimated_duration: u32,
}

/// The graded outcome of a student answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationResult {
    pub status: EvaluationStatus,
    /// 0..=100
    pub score: u8,
    pub feedback: String,
    #[serde(default)]
    pub concepts_to_review: Vec<String>,
    pub next_action: NextAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tutoring_plan: Option<TutoringPlan>,
}

impl EvaluationResult {
    pub fn passed(&self) -> bool {
        self.status == EvaluationStatus::Pass
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentAnswer {
    pub step_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_id: Option<String>,
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_correct: Option<bool>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<EvaluationResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonProgress {
    pub current_step_index: usize,
    pub completed_steps: Vec<String>,
    pub answers: Vec<StudentAnswer>,
    pub reflections: Vec<String>,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
}

impl LessonProgress {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            current_step_index: 0,
            completed_steps: Vec::new(),
            answers: Vec::new(),
            reflections: Vec::new(),
            start_time: now,
            last_update_time: now,
        }
    }

    /// Records a step as completed once; repeated completions are ignored.
    pub fn mark_completed(&mut self, step_id: &str) {
        if !self.completed_steps.iter().any(|s| s == step_id) {
            self.completed_steps.push(step_id.to_string());
        }
    }

    pub fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }

    /// Answers previously given for `step_id`, oldest first.
    pub fn attempts_for(&self, step_id: &str) -> Vec<String> {
        self.answers
            .iter()
            .filter(|a| a.step_id == step_id)
            .map(|a| a.answer.clone())
            .collect()
    }
}

impl Default for LessonProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// The active remedial branch, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutoringSession {
    pub original_step_id: String,
    pub plan: TutoringPlan,
    pub current_question_index: usize,
    pub attempts: u32,
    /// Student replies given during this branch, in order.
    #[serde(default)]
    pub responses: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgressSummary {
    #[serde(default)]
    pub current_step: String,
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub struggling_areas: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
}

/// Rolling summary of the conversation, refreshed every few messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub total_messages: usize,
    pub key_topics: Vec<String>,
    pub student_progress: StudentProgressSummary,
    pub highlights: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LessonPointer {
    pub lesson_id: String,
    pub step_id: String,
    pub topic: String,
}

/// Everything the backend needs to answer with awareness of the session so far.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationContext {
    pub summary: ConversationSummary,
    pub recent_messages: Vec<Message>,
    pub lesson: LessonPointer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecommendedAction {
    Proceed,
    ContinueTutoring,
    RetryOriginal,
}

/// Assessment of a whole tutoring branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TutoringProgress {
    pub is_ready_to_proceed: bool,
    pub confidence_level: u8,
    pub feedback: String,
    pub recommended_action: RecommendedAction,
}

/// Id and topic of the step a summary or answer refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTopic {
    pub id: String,
    pub topic: String,
}

impl StepTopic {
    pub fn of(step: &LessonStep, topic: impl Into<String>) -> Self {
        Self {
            id: step.id.clone(),
            topic: topic.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Role::Bot).unwrap(), "\"bot\"");
        assert_eq!(serde_json::to_string(&Role::Student).unwrap(), "\"student\"");
        assert_eq!(format!("{}", Role::Student), "student");
    }

    #[test]
    fn test_evaluation_enums_use_wire_casing() {
        let status: EvaluationStatus = serde_json::from_str("\"PASS\"").unwrap();
        assert_eq!(status, EvaluationStatus::Pass);
        let action: RecommendedAction = serde_json::from_str("\"CONTINUE_TUTORING\"").unwrap();
        assert_eq!(action, RecommendedAction::ContinueTutoring);
        let kind: QuestionKind = serde_json::from_str("\"verification\"").unwrap();
        assert_eq!(kind, QuestionKind::Verification);
        assert!(serde_json::from_str::<NextAction>("\"proceed\"").is_err());
    }

    #[test]
    fn test_tutoring_plan_parses_camel_case_and_defaults() {
        let json = r#"{
            "targetConcepts": ["place value"],
            "questions": [{"id": "q1", "type": "leading", "prompt": "What is 2^3?"}],
            "approachType": "practical"
        }"#;
        let plan: TutoringPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.target_concepts, vec!["place value"]);
        assert_eq!(plan.questions[0].kind, QuestionKind::Leading);
        assert!(plan.questions[0].hints.is_empty());
        assert_eq!(plan.approach, ApproachType::Practical);
        assert_eq!(plan.estimated_duration, 0);
    }

    #[test]
    fn test_mark_completed_deduplicates() {
        let mut progress = LessonProgress::new();
        progress.mark_completed("welcome");
        progress.mark_completed("welcome");
        progress.mark_completed("intro_question");
        assert_eq!(progress.completed_steps, vec!["welcome", "intro_question"]);
    }

    #[test]
    fn test_attempts_for_filters_by_step() {
        let mut progress = LessonProgress::new();
        for (step, answer) in [("a", "1"), ("b", "2"), ("a", "3")] {
            progress.answers.push(StudentAnswer {
                step_id: step.into(),
                question_id: None,
                answer: answer.into(),
                is_correct: None,
                timestamp: Utc::now(),
                evaluation: None,
            });
        }
        assert_eq!(progress.attempts_for("a"), vec!["1", "3"]);
        assert!(progress.attempts_for("c").is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::new(Role::Bot, "hi", None);
        let b = Message::new(Role::Bot, "hi", None);
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("msg-"));
    }
}
