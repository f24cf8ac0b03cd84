//! Tutor Helpers
//!
//! Prompt-construction helpers on top of an [`AiGateway`]. Each helper renders
//! a template, sends it, and (where a structured reply is expected) parses the
//! first JSON object out of the reply text. Structured helpers fall back to
//! heuristic defaults when the reply cannot be parsed.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use tracing::{error, warn};

use crate::gateway::{AiGateway, GatewayError, GatewayReply, GatewayRequest, RequestContext, StudentProfile};
use crate::prompts::{PromptKey, PromptLibrary};
use crate::types::{
    ConversationContext, EvaluationResult, EvaluationStatus, Message, NextAction, QuestionKind,
    RecommendedAction, StepTopic, StudentProgressSummary, TutoringPlan, TutoringProgress,
};

/// Topic used when a caller gives none.
pub const DEFAULT_TOPIC: &str = "number systems";

/// How the student has been doing lately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Performance {
    Good,
    Struggling,
    Excellent,
}

impl fmt::Display for Performance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Performance::Good => write!(f, "good"),
            Performance::Struggling => write!(f, "struggling"),
            Performance::Excellent => write!(f, "excellent"),
        }
    }
}

/// Where an answer being graded comes from.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub step_id: String,
    pub lesson_topic: String,
    pub previous_attempts: Vec<String>,
}

/// The parsed result of a conversation summarization.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryDraft {
    pub summary: String,
    #[serde(default)]
    pub key_topics: Vec<String>,
    #[serde(default)]
    pub student_progress: StudentProgressSummary,
    #[serde(default, rename = "conversationHighlights")]
    pub highlights: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEvaluation {
    status: EvaluationStatus,
    score: f64,
    feedback: String,
    #[serde(default)]
    concepts_to_review: Vec<String>,
    next_action: NextAction,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireAssessment {
    evaluation: WireEvaluation,
    #[serde(default)]
    tutoring_plan: Option<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireTutoringProgress {
    is_ready_to_proceed: bool,
    confidence_level: f64,
    feedback: String,
    recommended_action: RecommendedAction,
}

/// Returns the outermost `{...}` span of `text`, or all of it when there is none.
pub fn extract_json_object(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

fn parse_reply<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(extract_json_object(text))
}

fn clamp_percent(value: f64) -> u8 {
    value.round().clamp(0.0, 100.0) as u8
}

/// Parses an evaluation reply. A malformed tutoring plan is dropped rather
/// than failing the whole evaluation.
fn parse_evaluation(text: &str) -> Result<EvaluationResult, serde_json::Error> {
    let wire: WireAssessment = parse_reply(text)?;
    let tutoring_plan = wire.tutoring_plan.and_then(|value| {
        serde_json::from_value::<TutoringPlan>(value)
            .inspect_err(|e| warn!("Discarding malformed tutoring plan: {}", e))
            .ok()
    });
    Ok(EvaluationResult {
        status: wire.evaluation.status,
        score: clamp_percent(wire.evaluation.score),
        feedback: wire.evaluation.feedback,
        concepts_to_review: wire.evaluation.concepts_to_review,
        next_action: wire.evaluation.next_action,
        tutoring_plan,
    })
}

/// Heuristic grading used when the evaluator's reply is unusable.
pub fn fallback_evaluation(
    answer: &str,
    correct_answer: Option<&str>,
    context: Option<&EvaluationContext>,
) -> EvaluationResult {
    let is_correct = match correct_answer {
        Some(expected) => answer.to_lowercase().contains(&expected.to_lowercase()),
        None => answer.chars().count() > 10,
    };
    let topic = context
        .map(|c| c.lesson_topic.as_str())
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TOPIC);

    EvaluationResult {
        status: if is_correct {
            EvaluationStatus::Pass
        } else {
            EvaluationStatus::Fail
        },
        score: if is_correct { 85 } else { 45 },
        feedback: if is_correct {
            "✅ Good effort! You're on the right track!".to_string()
        } else {
            "💡 Let's work on this together! I can help you understand this concept better."
                .to_string()
        },
        concepts_to_review: vec![topic.to_string()],
        next_action: if is_correct {
            NextAction::Proceed
        } else {
            NextAction::Tutor
        },
        tutoring_plan: None,
    }
}

fn fallback_tutoring_progress(responses: &[String]) -> TutoringProgress {
    let n = responses.len();
    TutoringProgress {
        is_ready_to_proceed: n >= 2,
        confidence_level: (n * 30).min(80) as u8,
        feedback: "🎓 Great progress! You're building understanding step by step.".to_string(),
        recommended_action: if n >= 3 {
            RecommendedAction::Proceed
        } else {
            RecommendedAction::ContinueTutoring
        },
    }
}

fn fallback_summary(message_count: usize, current_step: Option<&StepTopic>) -> SummaryDraft {
    let topic = current_step.map(|s| s.topic.as_str()).unwrap_or(DEFAULT_TOPIC);
    SummaryDraft {
        summary: format!(
            "Conversation with {} messages about {}. Student is actively engaged in learning.",
            message_count, topic
        ),
        key_topics: vec![topic.to_string()],
        student_progress: StudentProgressSummary {
            current_step: current_step
                .map(|s| s.id.clone())
                .unwrap_or_else(|| "unknown".to_string()),
            completed_steps: Vec::new(),
            struggling_areas: Vec::new(),
            strengths: vec!["engagement".to_string()],
        },
        highlights: vec!["Active participation in lesson".to_string()],
    }
}

fn transcript(messages: &[Message], uppercase_roles: bool) -> String {
    messages
        .iter()
        .map(|m| {
            let role = m.role.to_string();
            let role = if uppercase_roles {
                role.to_uppercase()
            } else {
                role
            };
            format!("{}: {}", role, m.text)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn optional_line(prefix: &str, value: Option<&str>) -> String {
    match value {
        Some(v) if !v.is_empty() => format!("{}{}", prefix, v),
        _ => String::new(),
    }
}

fn attempts_line(context: Option<&EvaluationContext>) -> String {
    match context {
        Some(c) if !c.previous_attempts.is_empty() => {
            format!("PREVIOUS ATTEMPTS: {}", c.previous_attempts.join(", "))
        }
        _ => String::new(),
    }
}

/// The tutor's view of the generative backend.
#[derive(Clone)]
pub struct TutorClient {
    gateway: Arc<dyn AiGateway>,
    prompts: PromptLibrary,
}

impl TutorClient {
    pub fn new(gateway: Arc<dyn AiGateway>, prompts: PromptLibrary) -> Self {
        Self { gateway, prompts }
    }

    pub fn prompts(&self) -> &PromptLibrary {
        &self.prompts
    }

    /// Sends a raw prompt.
    pub async fn ask(
        &self,
        prompt: String,
        context: Option<RequestContext>,
    ) -> Result<GatewayReply, GatewayError> {
        let request = GatewayRequest { prompt, context };
        self.gateway
            .generate(&request)
            .await
            .inspect_err(|e| error!("AI gateway error: {}", e))
    }

    pub async fn health_check(&self) -> bool {
        self.gateway.health_check().await
    }

    pub async fn explain_concept(
        &self,
        concept: &str,
        student_level: Option<&str>,
        previous_content: Option<&str>,
    ) -> Result<GatewayReply, GatewayError> {
        let level_line = student_level
            .map(|l| format!("The student is at {} level, so pitch the explanation accordingly.", l))
            .unwrap_or_default();
        let previous_line = optional_line("Build on what was discussed earlier: ", previous_content);
        let prompt = self.prompts.render(
            PromptKey::ExplainConcept,
            &[
                ("concept", concept),
                ("level_line", &level_line),
                ("previous_line", &previous_line),
            ],
        );
        let context = RequestContext {
            student_profile: Some(StudentProfile::current(student_level.unwrap_or("beginner"))),
            ..Default::default()
        };
        self.ask(prompt, Some(context)).await
    }

    pub async fn provide_feedback(
        &self,
        answer: &str,
        correct_answer: Option<&str>,
        is_correct: Option<bool>,
    ) -> Result<GatewayReply, GatewayError> {
        let verdict = match (correct_answer, is_correct) {
            (Some(_), Some(true)) => "The answer is correct! Offer positive reinforcement and perhaps an interesting related fact.".to_string(),
            (Some(expected), Some(false)) => format!(
                "The correct answer was \"{}\". Correct gently, with encouragement, and explain why the correct answer is right.",
                expected
            ),
            _ => "This is a reflection or open-ended response. Give thoughtful, encouraging feedback that validates the student's thinking.".to_string(),
        };
        let prompt = self.prompts.render(
            PromptKey::ProvideFeedback,
            &[("answer", answer), ("verdict", &verdict)],
        );
        self.ask(prompt, None).await
    }

    pub async fn generate_hint(
        &self,
        question: &str,
        previous_attempts: &[String],
    ) -> Result<GatewayReply, GatewayError> {
        let attempts = if previous_attempts.is_empty() {
            "none yet".to_string()
        } else {
            previous_attempts.join(", ")
        };
        let prompt = self.prompts.render(
            PromptKey::GenerateHint,
            &[("question", question), ("attempts", &attempts)],
        );
        self.ask(prompt, None).await
    }

    pub async fn answer_question(
        &self,
        question: &str,
        lesson_context: Option<&str>,
    ) -> Result<GatewayReply, GatewayError> {
        let lesson_context_line =
            optional_line("Here is what we have been exploring together: ", lesson_context);
        let prompt = self.prompts.render(
            PromptKey::AnswerQuestion,
            &[
                ("question", question),
                ("lesson_context_line", &lesson_context_line),
            ],
        );
        self.ask(prompt, None).await
    }

    pub async fn generate_encouragement(
        &self,
        completed_steps: usize,
        total_steps: usize,
        performance: Performance,
        topic: &str,
    ) -> Result<GatewayReply, GatewayError> {
        let percent = if total_steps == 0 {
            0
        } else {
            ((completed_steps as f64 / total_steps as f64) * 100.0).round() as u32
        };
        let prompt = self.prompts.render(
            PromptKey::Encouragement,
            &[
                ("completed", &completed_steps.to_string()),
                ("total", &total_steps.to_string()),
                ("percent", &percent.to_string()),
                ("topic", topic),
                ("performance", &performance.to_string()),
            ],
        );
        self.ask(prompt, None).await
    }

    /// Grades an answer. Transport failures propagate; unparseable replies
    /// are graded heuristically.
    pub async fn evaluate_answer(
        &self,
        question: &str,
        answer: &str,
        correct_answer: Option<&str>,
        context: Option<&EvaluationContext>,
    ) -> Result<EvaluationResult, GatewayError> {
        let expected_line = optional_line(
            "EXPECTED ANSWER: ",
            correct_answer.map(|c| format!("\"{}\"", c)).as_deref(),
        );
        let topic_line = optional_line("LESSON TOPIC: ", context.map(|c| c.lesson_topic.as_str()));
        let attempts_line = attempts_line(context);
        let prompt = self.prompts.render(
            PromptKey::EvaluateAnswer,
            &[
                ("question", question),
                ("answer", answer),
                ("expected_line", &expected_line),
                ("topic_line", &topic_line),
                ("attempts_line", &attempts_line),
            ],
        );

        let reply = self.ask(prompt, None).await?;
        match parse_evaluation(&reply.text) {
            Ok(result) => Ok(result),
            Err(e) => {
                warn!("Failed to parse AI evaluation response, providing fallback: {}", e);
                Ok(fallback_evaluation(answer, correct_answer, context))
            }
        }
    }

    /// Grades an answer with the conversation history in view. Any failure
    /// falls back to [`TutorClient::evaluate_answer`].
    pub async fn evaluate_answer_with_context(
        &self,
        question: &str,
        answer: &str,
        correct_answer: Option<&str>,
        conversation: &ConversationContext,
        context: Option<&EvaluationContext>,
    ) -> Result<EvaluationResult, GatewayError> {
        let expected_line = optional_line(
            "EXPECTED ANSWER: ",
            correct_answer.map(|c| format!("\"{}\"", c)).as_deref(),
        );
        let progress = &conversation.summary.student_progress;
        let strengths = progress.strengths.join(", ");
        let struggles = progress.struggling_areas.join(", ");
        let recent = transcript(&conversation.recent_messages, false);
        let topic_line = optional_line("LESSON TOPIC: ", context.map(|c| c.lesson_topic.as_str()));
        let attempts_line = attempts_line(context);
        let prompt = self.prompts.render(
            PromptKey::EvaluateWithContext,
            &[
                ("question", question),
                ("answer", answer),
                ("expected_line", &expected_line),
                ("summary", &conversation.summary.summary),
                ("strengths", &strengths),
                ("struggles", &struggles),
                ("recent", &recent),
                ("topic_line", &topic_line),
                ("attempts_line", &attempts_line),
            ],
        );

        match self.ask(prompt, None).await {
            Ok(reply) => match parse_evaluation(&reply.text) {
                Ok(result) => return Ok(result),
                Err(e) => warn!("Context-aware evaluation unparseable: {}", e),
            },
            Err(e) => error!("Context-aware evaluation error: {}", e),
        }
        self.evaluate_answer(question, answer, correct_answer, context)
            .await
    }

    pub async fn generate_tutoring_question(
        &self,
        target_concept: &str,
        previous_questions: &[String],
        student_responses: &[String],
        kind: QuestionKind,
    ) -> Result<GatewayReply, GatewayError> {
        let prompt = self.prompts.render(
            PromptKey::TutoringQuestion,
            &[
                ("concept", target_concept),
                ("previous_questions", &previous_questions.join("; ")),
                ("responses", &student_responses.join("; ")),
                ("kind", &kind.to_string()),
            ],
        );
        self.ask(prompt, None).await
    }

    /// Judges a tutoring branch. Never fails: errors yield a count-based verdict.
    pub async fn evaluate_tutoring_progress(
        &self,
        original_question: &str,
        tutoring_questions: &[String],
        student_responses: &[String],
        target_concepts: &[String],
    ) -> TutoringProgress {
        let prompt = self.prompts.render(
            PromptKey::TutoringProgress,
            &[
                ("original_question", original_question),
                ("concepts", &target_concepts.join(", ")),
                ("questions", &tutoring_questions.join("; ")),
                ("responses", &student_responses.join("; ")),
            ],
        );

        let parsed = match self.ask(prompt, None).await {
            Ok(reply) => parse_reply::<WireTutoringProgress>(&reply.text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        match parsed {
            Ok(wire) => TutoringProgress {
                is_ready_to_proceed: wire.is_ready_to_proceed,
                confidence_level: clamp_percent(wire.confidence_level),
                feedback: wire.feedback,
                recommended_action: wire.recommended_action,
            },
            Err(e) => {
                error!("Tutoring evaluation error: {}", e);
                fallback_tutoring_progress(student_responses)
            }
        }
    }

    /// Summarizes `messages`. Never fails: errors yield a generic summary.
    pub async fn summarize_conversation(
        &self,
        messages: &[Message],
        current_step: Option<&StepTopic>,
        existing_summary: Option<&str>,
    ) -> SummaryDraft {
        let existing_line = optional_line("EXISTING SUMMARY: ", existing_summary);
        let step_line = current_step
            .map(|s| format!("CURRENT LESSON STEP: {} (Topic: {})", s.id, s.topic))
            .unwrap_or_default();
        let prompt = self.prompts.render(
            PromptKey::SummarizeConversation,
            &[
                ("messages", &transcript(messages, true)),
                ("existing_line", &existing_line),
                ("step_line", &step_line),
            ],
        );

        let parsed = match self.ask(prompt, None).await {
            Ok(reply) => parse_reply::<SummaryDraft>(&reply.text).map_err(|e| e.to_string()),
            Err(e) => Err(e.to_string()),
        };
        parsed.unwrap_or_else(|e| {
            error!("Conversation summarization error: {}", e);
            fallback_summary(messages.len(), current_step)
        })
    }

    pub async fn answer_question_with_context(
        &self,
        question: &str,
        conversation: &ConversationContext,
    ) -> Result<GatewayReply, GatewayError> {
        let recent = transcript(&conversation.recent_messages, false);
        let prompt = self.prompts.render(
            PromptKey::AnswerWithContext,
            &[
                ("question", question),
                ("summary", &conversation.summary.summary),
                ("topic", &conversation.lesson.topic),
                ("step_id", &conversation.lesson.step_id),
                ("recent", &recent),
            ],
        );
        self.ask(prompt, None).await
    }
}
