//! Conversation Store
//!
//! Drives one student through a [`LessonConfig`]: the chat transcript, the
//! step pointer, recorded progress, the optional remedial tutoring branch and
//! the rolling conversation summary. Every operation takes `&mut self`, so a
//! store is a sequential state machine; callers that share one across tasks
//! wrap it in a lock.
//!
//! The conversational pauses between tutor messages are expressed as a
//! [`Pacing`]; tests and batch callers use [`Pacing::immediate`].

use chrono::Utc;
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::lesson::{LessonConfig, LessonStep, StepKind};
use crate::tutor::{EvaluationContext, Performance, TutorClient};
use crate::types::{
    ConversationContext, ConversationSummary, EvaluationResult, LessonPointer, LessonProgress,
    Message, NextAction, QuestionKind, RecommendedAction, Role, StepTopic, StudentAnswer,
    TutoringPlan, TutoringQuestion, TutoringSession,
};

/// Appended to every backend answer to an off-script question.
pub const OFF_SCRIPT_FOOTER: &str =
    "\n\n📚 *That's a great question! When you're ready, we can continue with our lesson.*";
const OFF_SCRIPT_MARKER: &str = "📚 *That's a great question!";

/// Replies that mean "carry on" rather than an answer.
pub const CONTINUATION_PHRASES: [&str; 8] = [
    "continue",
    "next",
    "got it",
    "i understand",
    "tell me more",
    "yes",
    "ok",
    "okay",
];

pub const REFLECTION_RESPONSES: [&str; 4] = [
    "Thank you for sharing your thoughts! That's a great insight.",
    "Excellent reflection! Your thinking shows real understanding.",
    "I appreciate your thoughtful response. Keep that curiosity alive!",
    "Wonderful perspective! Reflection is key to deep learning.",
];

const PROCEED_MESSAGE: &str = "**✅ Excellent! Let's continue with the next topic.**";
const TUTOR_INTRO_MESSAGE: &str = "**💡 Let me help you understand this better!**\nI'll guide you through some questions to build your understanding step by step.";
const RETRY_MESSAGE: &str =
    "**🔄 Give it another try!**\nYou're close! Think about it a bit more.";
const RETRY_ORIGINAL_MESSAGE: &str = "**🎯 Ready to try again!**\nNow that we've worked through this together, would you like to try the original question again?";
const ANOTHER_QUESTION_MESSAGE: &str =
    "**Let me ask you another question to help solidify your understanding...**";
const MASTERED_MESSAGE: &str = "**🎓 Excellent progress!**\nYou've mastered this concept. Let's continue with the lesson!";
const TRY_AGAIN_MESSAGE: &str =
    "**💪 Ready to try again?**\nTake your time and think through what we just discussed.";
const THINKING_MESSAGE: &str = "Let me think of another way to help you understand this...";

const EVALUATION_ERROR: &str = "Sorry, I had trouble evaluating your answer. Let's continue.";
const QUESTION_ERROR: &str =
    "Sorry, I had trouble processing your question. Let's continue with the lesson.";
const QUESTION_FALLBACK: &str = "I'm having trouble with that question right now, but that's okay! Let's continue with our lesson and you can ask me again later. 😊";
const HINT_ERROR: &str = "Sorry, I couldn't come up with a hint right now.";

/// Delays between consecutive tutor actions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pacing {
    /// Before feedback and generated replies are shown.
    pub feedback: Duration,
    /// Before an answered step advances on its own.
    pub advance: Duration,
    /// When the backend failed and a canned reply is shown instead.
    pub fallback: Duration,
    pub reflection_reply: Duration,
    pub reflection_advance: Duration,
    /// Between announcing a tutoring branch and its first question.
    pub tutoring_handoff: Duration,
    /// Between leaving a mastered tutoring branch and the next step.
    pub proceed: Duration,
}

impl Pacing {
    pub fn immediate() -> Self {
        Self {
            feedback: Duration::ZERO,
            advance: Duration::ZERO,
            fallback: Duration::ZERO,
            reflection_reply: Duration::ZERO,
            reflection_advance: Duration::ZERO,
            tutoring_handoff: Duration::ZERO,
            proceed: Duration::ZERO,
        }
    }

    /// Multiplies every delay by `factor`. Negative or non-finite factors
    /// yield [`Pacing::immediate`].
    pub fn scaled(self, factor: f64) -> Self {
        if !factor.is_finite() || factor <= 0.0 {
            return Self::immediate();
        }
        Self {
            feedback: self.feedback.mul_f64(factor),
            advance: self.advance.mul_f64(factor),
            fallback: self.fallback.mul_f64(factor),
            reflection_reply: self.reflection_reply.mul_f64(factor),
            reflection_advance: self.reflection_advance.mul_f64(factor),
            tutoring_handoff: self.tutoring_handoff.mul_f64(factor),
            proceed: self.proceed.mul_f64(factor),
        }
    }
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            feedback: Duration::from_millis(1000),
            advance: Duration::from_millis(1500),
            fallback: Duration::from_millis(500),
            reflection_reply: Duration::from_millis(800),
            reflection_advance: Duration::from_millis(1000),
            tutoring_handoff: Duration::from_millis(1500),
            proceed: Duration::from_millis(2000),
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreConfig {
    pub pacing: Pacing,
    /// Refresh the conversation summary after every N messages; 0 disables.
    pub summary_every: usize,
    /// Maximum transcript length. The first message is always kept.
    pub transcript_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pacing: Pacing::default(),
            summary_every: 6,
            transcript_limit: 50,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Saved state belongs to lesson '{found}', expected '{expected}'")]
    LessonMismatch { expected: String, found: String },
    #[error("Step index {index} is out of range for a lesson of {total} steps")]
    StepOutOfRange { index: usize, total: usize },
}

/// Everything a store needs to resume a session. Loading and error flags
/// are transient and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub lesson_id: String,
    pub step_index: usize,
    pub messages: Vec<Message>,
    pub progress: LessonProgress,
    #[serde(skip)]
    pub is_loading: bool,
    #[serde(skip)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tutoring: Option<TutoringSession>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<ConversationSummary>,
    /// Messages ever added, including ones since dropped from the transcript.
    #[serde(default)]
    pub total_messages: usize,
}

impl ConversationState {
    fn fresh(lesson_id: &str) -> Self {
        Self {
            lesson_id: lesson_id.to_string(),
            step_index: 0,
            messages: Vec::new(),
            progress: LessonProgress::new(),
            is_loading: false,
            error: None,
            tutoring: None,
            summary: None,
            total_messages: 0,
        }
    }
}

pub struct ConversationStore {
    lesson: Arc<LessonConfig>,
    tutor: TutorClient,
    config: StoreConfig,
    state: ConversationState,
    summary_due: bool,
}

impl ConversationStore {
    /// Creates a store positioned at the first step with an empty transcript.
    /// Call [`ConversationStore::initialize_lesson`] to greet the student.
    pub fn new(lesson: Arc<LessonConfig>, tutor: TutorClient, config: StoreConfig) -> Self {
        let state = ConversationState::fresh(&lesson.id);
        Self {
            lesson,
            tutor,
            config,
            state,
            summary_due: false,
        }
    }

    /// Rehydrates a previously persisted state.
    pub fn restore(
        lesson: Arc<LessonConfig>,
        tutor: TutorClient,
        config: StoreConfig,
        state: ConversationState,
    ) -> Result<Self, StoreError> {
        if state.lesson_id != lesson.id {
            return Err(StoreError::LessonMismatch {
                expected: lesson.id.clone(),
                found: state.lesson_id,
            });
        }
        let total = lesson.total_steps();
        if state.step_index >= total {
            return Err(StoreError::StepOutOfRange {
                index: state.step_index,
                total,
            });
        }
        Ok(Self {
            lesson,
            tutor,
            config,
            state,
            summary_due: false,
        })
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn into_state(self) -> ConversationState {
        self.state
    }

    pub fn lesson(&self) -> &LessonConfig {
        &self.lesson
    }

    pub fn messages(&self) -> &[Message] {
        &self.state.messages
    }

    pub fn current_step(&self) -> Option<&LessonStep> {
        self.lesson.steps.get(self.state.step_index)
    }

    fn current_step_id(&self) -> Option<String> {
        self.current_step().map(|s| s.id.clone())
    }

    // --- Navigation ---

    pub fn initialize_lesson(&mut self) {
        self.state.step_index = 0;
        self.state.messages.clear();
        self.state.progress = LessonProgress::new();
        self.state.error = None;
        self.state.tutoring = None;
        if let Some(first) = self.lesson.steps.first() {
            let (content, id) = (first.content.clone(), first.id.clone());
            self.add_message(Role::Bot, content, Some(id));
        }
        info!(lesson = %self.lesson.id, "Lesson initialized");
    }

    /// Completes the current step and moves to the next one.
    pub fn next_step(&mut self) {
        if !self.can_go_next() {
            return;
        }
        let Some(completed) = self.current_step_id() else {
            return;
        };
        self.state.step_index += 1;
        self.state.progress.current_step_index = self.state.step_index;
        self.state.progress.mark_completed(&completed);
        self.state.progress.touch();

        if let Some(step) = self.current_step() {
            let (content, id) = (step.content.clone(), step.id.clone());
            debug!(step = %id, "Advanced to step");
            self.add_message(Role::Bot, content, Some(id));
        }
    }

    pub fn previous_step(&mut self) {
        if !self.can_go_previous() {
            return;
        }
        self.state.step_index -= 1;
        self.state.progress.current_step_index = self.state.step_index;
        self.state.progress.touch();
    }

    /// Moves to `index` without announcing the step or completing anything.
    pub fn jump_to_step(&mut self, index: usize) {
        if index >= self.lesson.total_steps() {
            warn!(index, "Ignoring jump outside the lesson");
            return;
        }
        self.state.step_index = index;
        self.state.progress.current_step_index = index;
        self.state.progress.touch();
    }

    pub fn reset_lesson(&mut self) {
        self.state = ConversationState::fresh(&self.lesson.id);
        self.summary_due = false;
        self.initialize_lesson();
    }

    // --- Transcript ---

    pub fn add_message(&mut self, role: Role, text: impl Into<String>, step_id: Option<String>) {
        self.state.messages.push(Message::new(role, text, step_id));

        let limit = self.config.transcript_limit;
        let len = self.state.messages.len();
        if limit > 0 && len > limit {
            self.state.messages.drain(1..1 + (len - limit));
        }

        self.state.total_messages += 1;
        let every = self.config.summary_every;
        if every > 0 && self.state.total_messages % every == 0 {
            self.summary_due = true;
        }
    }

    /// Runs a pending summary refresh, unless an operation is still loading.
    pub async fn settle(&mut self) {
        if self.summary_due && !self.state.is_loading {
            self.summary_due = false;
            self.update_conversation_summary().await;
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.state.is_loading = loading;
    }

    pub fn set_error(&mut self, error: Option<String>) {
        self.state.error = error;
    }

    // --- Student input ---

    /// Routes free text typed by the student.
    pub async fn handle_student_message(&mut self, text: &str) {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return;
        }

        if self.is_in_tutoring_mode() {
            self.handle_tutoring_response(trimmed).await;
            return;
        }

        let step_id = self.current_step_id();
        self.add_message(Role::Student, trimmed, step_id);

        let Some(step) = self.current_step().cloned() else {
            self.answer_off_script(trimmed).await;
            self.settle().await;
            return;
        };

        let lower = trimmed.to_lowercase();
        if CONTINUATION_PHRASES.contains(&lower.as_str()) {
            if step.kind == StepKind::Bot {
                pause(self.config.pacing.feedback).await;
                self.next_step();
            }
            self.settle().await;
            return;
        }

        match step.kind {
            StepKind::Question if step.options.is_some() => {
                let matched = step.options.iter().flatten().find(|option| {
                    let option = option.to_lowercase();
                    option.contains(&lower) || lower.contains(&option)
                });
                match matched {
                    Some(option) => self.process_answer(&step, option).await,
                    None => self.answer_off_script(trimmed).await,
                }
            }
            StepKind::Quiz if step.answer.is_some() => self.process_answer(&step, trimmed).await,
            StepKind::Reflection => self.process_reflection(&step, trimmed).await,
            _ => self.answer_off_script(trimmed).await,
        }
        self.settle().await;
    }

    /// Records an answer to the current step and grades or advances it.
    pub async fn submit_answer(&mut self, answer: &str) {
        let Some(step) = self.current_step().cloned() else {
            return;
        };
        self.add_message(Role::Student, answer, Some(step.id.clone()));
        self.process_answer(&step, answer).await;
        self.settle().await;
    }

    async fn process_answer(&mut self, step: &LessonStep, answer: &str) {
        if step.is_graded() {
            self.evaluate_answer_with_ai(answer).await;
            return;
        }

        self.state.progress.answers.push(StudentAnswer {
            step_id: step.id.clone(),
            question_id: Some(step.id.clone()),
            answer: answer.to_string(),
            is_correct: step.answer.as_ref().map(|expected| expected == answer),
            timestamp: Utc::now(),
            evaluation: None,
        });
        self.state.progress.touch();

        pause(self.config.pacing.advance).await;
        self.next_step();
    }

    /// Records a reflection; ignored unless the current step asks for one.
    pub async fn add_reflection(&mut self, text: &str) {
        let Some(step) = self.current_step().cloned() else {
            return;
        };
        if step.kind != StepKind::Reflection {
            return;
        }
        self.add_message(Role::Student, text, Some(step.id.clone()));
        self.process_reflection(&step, text).await;
        self.settle().await;
    }

    async fn process_reflection(&mut self, step: &LessonStep, text: &str) {
        self.state.progress.reflections.push(text.to_string());
        self.state.progress.touch();

        let reply = REFLECTION_RESPONSES
            .choose(&mut rand::rng())
            .copied()
            .unwrap_or(REFLECTION_RESPONSES[0]);

        pause(self.config.pacing.reflection_reply).await;
        self.add_message(Role::Bot, reply, Some(step.id.clone()));
        pause(self.config.pacing.reflection_advance).await;
        self.next_step();
    }

    // --- Off-script conversation ---

    /// Answers a question that falls outside the scripted flow.
    pub async fn ask_off_script_question(&mut self, question: &str) {
        self.answer_off_script(question).await;
        self.settle().await;
    }

    async fn answer_off_script(&mut self, question: &str) {
        self.set_loading(true);
        self.set_error(None);

        let result = match self.conversation_context() {
            Some(context) => {
                self.tutor
                    .answer_question_with_context(question, &context)
                    .await
            }
            None => {
                let lesson_context = self.lesson_context();
                self.tutor
                    .answer_question(question, Some(&lesson_context))
                    .await
            }
        };

        pause(self.config.pacing.feedback).await;
        match result {
            Ok(reply) => {
                self.add_message(Role::Bot, format!("{}{}", reply.text, OFF_SCRIPT_FOOTER), None);
            }
            Err(e) => {
                error!("Error answering off-script question: {}", e);
                self.set_error(Some(QUESTION_ERROR.to_string()));
                self.add_message(Role::Bot, QUESTION_FALLBACK, None);
            }
        }
        self.set_loading(false);
    }

    pub fn return_to_lesson(&mut self) {
        let Some(step) = self.current_step() else {
            return;
        };
        let excerpt: String = step.content.chars().take(100).collect();
        let id = step.id.clone();
        self.add_message(
            Role::Bot,
            format!("Let's continue with our lesson! We were learning about: {}...", excerpt),
            Some(id),
        );
    }

    // --- Evaluation ---

    /// Grades an answer to the current step and acts on the verdict.
    pub async fn evaluate_answer_with_ai(&mut self, answer: &str) {
        let Some(step) = self.current_step().cloned() else {
            return;
        };
        self.set_loading(true);
        self.set_error(None);

        let context = EvaluationContext {
            step_id: step.id.clone(),
            lesson_topic: self.lesson.topic.clone(),
            previous_attempts: self.state.progress.attempts_for(&step.id),
        };
        let question = step.question_text();
        let expected = step.answer.as_deref();
        let result = match self.conversation_context() {
            Some(conversation) => {
                self.tutor
                    .evaluate_answer_with_context(
                        question,
                        answer,
                        expected,
                        &conversation,
                        Some(&context),
                    )
                    .await
            }
            None => {
                self.tutor
                    .evaluate_answer(question, answer, expected, Some(&context))
                    .await
            }
        };

        match result {
            Ok(evaluation) => self.apply_evaluation(&step, answer, evaluation).await,
            Err(e) => {
                error!(step = %step.id, "AI evaluation error: {}", e);
                self.set_error(Some(EVALUATION_ERROR.to_string()));
                self.set_loading(false);

                let is_correct = step
                    .answer
                    .as_ref()
                    .map(|expected| answer.to_lowercase().contains(&expected.to_lowercase()))
                    .unwrap_or(true);
                let feedback = if is_correct {
                    "🎉 Good job! Let's continue."
                } else {
                    "Let me help you understand this better."
                };
                pause(self.config.pacing.fallback).await;
                self.add_message(Role::Bot, feedback, Some(step.id.clone()));
                if is_correct {
                    pause(self.config.pacing.advance).await;
                    self.next_step();
                }
            }
        }
        self.settle().await;
    }

    async fn apply_evaluation(
        &mut self,
        step: &LessonStep,
        answer: &str,
        evaluation: EvaluationResult,
    ) {
        info!(
            step = %step.id,
            status = ?evaluation.status,
            score = evaluation.score,
            next = ?evaluation.next_action,
            "Answer evaluated"
        );
        self.state.progress.answers.push(StudentAnswer {
            step_id: step.id.clone(),
            question_id: Some(step.id.clone()),
            answer: answer.to_string(),
            is_correct: Some(evaluation.passed()),
            timestamp: Utc::now(),
            evaluation: Some(evaluation.clone()),
        });
        self.state.progress.touch();

        let pacing = self.config.pacing;
        pause(pacing.feedback).await;
        self.add_message(Role::Bot, evaluation.feedback, Some(step.id.clone()));
        self.set_loading(false);

        pause(pacing.feedback).await;
        match (evaluation.next_action, evaluation.tutoring_plan) {
            (NextAction::Proceed, _) => {
                self.add_message(Role::Bot, PROCEED_MESSAGE, None);
                pause(pacing.feedback).await;
                self.next_step();
            }
            (NextAction::Tutor, Some(plan)) => {
                self.add_message(Role::Bot, TUTOR_INTRO_MESSAGE, None);
                pause(pacing.tutoring_handoff).await;
                self.start_tutoring_mode(plan, &step.id).await;
            }
            // A TUTOR verdict without a plan has nothing to walk through.
            _ => self.add_message(Role::Bot, RETRY_MESSAGE, None),
        }
    }

    // --- Tutoring ---

    pub async fn start_tutoring_mode(&mut self, plan: TutoringPlan, original_step_id: &str) {
        let Some(first) = plan.questions.first().map(|q| q.prompt.clone()) else {
            warn!(step = %original_step_id, "Tutoring plan has no questions");
            self.exit_tutoring_mode(false).await;
            return;
        };
        info!(
            step = %original_step_id,
            questions = plan.questions.len(),
            "Entering tutoring mode"
        );
        self.state.tutoring = Some(TutoringSession {
            original_step_id: original_step_id.to_string(),
            plan,
            current_question_index: 0,
            attempts: 0,
            responses: Vec::new(),
        });
        self.add_message(Role::Bot, first, None);
    }

    /// Records a reply to the active tutoring question and moves the branch on.
    pub async fn handle_tutoring_response(&mut self, text: &str) {
        let Some(session) = self.state.tutoring.as_mut() else {
            return;
        };
        session.responses.push(text.to_string());
        let session = session.clone();

        self.set_loading(true);
        self.add_message(Role::Student, text, None);

        let pacing = self.config.pacing;
        let questions = &session.plan.questions;
        let index = session.current_question_index;

        if questions.is_empty() {
            self.set_loading(false);
            self.add_message(Role::Bot, THINKING_MESSAGE, None);
            self.generate_next_tutoring_question().await;
            self.settle().await;
            return;
        }

        if index + 1 < questions.len() {
            let next = questions[index + 1].prompt.clone();
            if let Some(active) = self.state.tutoring.as_mut() {
                active.current_question_index += 1;
                active.attempts += 1;
            }
            pause(pacing.feedback).await;
            self.add_message(Role::Bot, next, None);
            self.set_loading(false);
            self.settle().await;
            return;
        }

        let asked: Vec<String> = questions
            .iter()
            .take(index + 1)
            .map(|q| q.prompt.clone())
            .collect();
        let original_question = self
            .lesson
            .find_step(&session.original_step_id)
            .map(|s| s.question_text().to_string())
            .unwrap_or_else(|| session.original_step_id.clone());

        let progress = self
            .tutor
            .evaluate_tutoring_progress(
                &original_question,
                &asked,
                &session.responses,
                &session.plan.target_concepts,
            )
            .await;
        info!(
            confidence = progress.confidence_level,
            action = ?progress.recommended_action,
            "Tutoring progress evaluated"
        );

        self.add_message(Role::Bot, progress.feedback, None);
        self.set_loading(false);
        pause(pacing.advance).await;

        match progress.recommended_action {
            RecommendedAction::Proceed => self.exit_tutoring_mode(true).await,
            RecommendedAction::RetryOriginal => {
                self.add_message(Role::Bot, RETRY_ORIGINAL_MESSAGE, None);
                self.exit_tutoring_mode(false).await;
            }
            RecommendedAction::ContinueTutoring => {
                self.add_message(Role::Bot, ANOTHER_QUESTION_MESSAGE, None);
                pause(pacing.feedback).await;
                self.generate_next_tutoring_question().await;
            }
        }
        self.settle().await;
    }

    /// Asks the backend for one more conceptual question and poses it.
    /// If that fails, the branch ends and the lesson moves on.
    pub async fn generate_next_tutoring_question(&mut self) {
        let Some(session) = self.state.tutoring.as_ref() else {
            return;
        };
        let concept = session
            .plan
            .target_concepts
            .first()
            .cloned()
            .unwrap_or_else(|| self.lesson.topic.clone());
        let previous: Vec<String> = session
            .plan
            .questions
            .iter()
            .map(|q| q.prompt.clone())
            .collect();
        let recent_start = session.responses.len().saturating_sub(3);
        let responses = session.responses[recent_start..].to_vec();

        match self
            .tutor
            .generate_tutoring_question(&concept, &previous, &responses, QuestionKind::Conceptual)
            .await
        {
            Ok(reply) => {
                if let Some(active) = self.state.tutoring.as_mut() {
                    let number = active.plan.questions.len() + 1;
                    active.plan.questions.push(TutoringQuestion {
                        id: format!("generated-{}", number),
                        kind: QuestionKind::Conceptual,
                        prompt: reply.text.clone(),
                        expected_answer: None,
                        hints: Vec::new(),
                    });
                    active.current_question_index = active.plan.questions.len() - 1;
                }
                self.add_message(Role::Bot, reply.text, None);
            }
            Err(e) => {
                error!("Error generating tutoring question: {}", e);
                self.exit_tutoring_mode(true).await;
            }
        }
    }

    pub async fn exit_tutoring_mode(&mut self, proceed: bool) {
        self.state.tutoring = None;
        info!(proceed, "Leaving tutoring mode");
        if proceed {
            self.add_message(Role::Bot, MASTERED_MESSAGE, None);
            pause(self.config.pacing.proceed).await;
            self.next_step();
        } else {
            self.add_message(Role::Bot, TRY_AGAIN_MESSAGE, None);
        }
    }

    // --- Summary and context ---

    /// Re-summarizes the recent transcript. Skipped while an operation is
    /// loading or before there is anything to summarize.
    pub async fn update_conversation_summary(&mut self) {
        if self.state.is_loading {
            debug!("Skipping summary update - already loading");
            return;
        }
        let messages = &self.state.messages;
        if messages.len() < 2 {
            return;
        }

        let recent = &messages[messages.len().saturating_sub(10)..];
        let step = self
            .current_step()
            .map(|s| StepTopic::of(s, self.lesson_context()));
        let existing = self.state.summary.as_ref().map(|s| s.summary.as_str());
        let draft = self
            .tutor
            .summarize_conversation(recent, step.as_ref(), existing)
            .await;

        let now = Utc::now();
        let (id, created_at) = match &self.state.summary {
            Some(previous) => (previous.id.clone(), previous.created_at),
            None => (format!("summary-{}", Uuid::new_v4()), now),
        };
        self.state.summary = Some(ConversationSummary {
            id,
            created_at,
            last_updated: now,
            total_messages: self.state.messages.len(),
            key_topics: draft.key_topics,
            student_progress: draft.student_progress,
            highlights: draft.highlights,
            summary: draft.summary,
        });
        debug!(total_messages = self.state.messages.len(), "Conversation summary updated");
    }

    /// The summary plus recent messages, once a summary exists.
    pub fn conversation_context(&self) -> Option<ConversationContext> {
        let summary = self.state.summary.clone()?;
        let messages = &self.state.messages;
        let recent = messages[messages.len().saturating_sub(5)..].to_vec();
        Some(ConversationContext {
            summary,
            recent_messages: recent,
            lesson: LessonPointer {
                lesson_id: self.lesson.id.clone(),
                step_id: self
                    .current_step_id()
                    .unwrap_or_else(|| "unknown".to_string()),
                topic: self.lesson_context(),
            },
        })
    }

    /// A paragraph describing where the student is, for backend prompts.
    pub fn lesson_context(&self) -> String {
        let mut context = format!(
            "We are in a lesson about {}. The student is on step {} of {}. ",
            self.lesson.topic,
            self.state.step_index + 1,
            self.lesson.total_steps()
        );
        if let Some(step) = self.current_step() {
            let excerpt: String = step.content.chars().take(150).collect();
            context.push_str(&format!("Current topic: {}. ", excerpt));
        }
        let completed = &self.state.progress.completed_steps;
        if !completed.is_empty() {
            context.push_str(&format!("Topics covered so far: {}. ", completed.join(", ")));
        }
        context.push_str(&format!(
            "Please provide educational answers related to {}.",
            focus_list(&self.lesson)
        ));
        context
    }

    // --- Helpers beyond the script ---

    /// Offers a hint for the current step, informed by earlier attempts.
    pub async fn request_hint(&mut self) {
        let Some(step) = self.current_step().cloned() else {
            return;
        };
        let attempts = self.state.progress.attempts_for(&step.id);
        self.set_loading(true);
        self.set_error(None);

        match self.tutor.generate_hint(step.question_text(), &attempts).await {
            Ok(reply) => self.add_message(Role::Bot, reply.text, Some(step.id.clone())),
            Err(e) => {
                error!(step = %step.id, "Hint generation error: {}", e);
                self.set_error(Some(HINT_ERROR.to_string()));
            }
        }
        self.set_loading(false);
        self.settle().await;
    }

    pub async fn explain_concept(&mut self, concept: &str) {
        let concept = concept.trim();
        if concept.is_empty() {
            return;
        }
        let previous = self.current_step().map(|s| s.content.clone());
        self.set_loading(true);
        self.set_error(None);

        match self
            .tutor
            .explain_concept(concept, None, previous.as_deref())
            .await
        {
            Ok(reply) => self.add_message(Role::Bot, reply.text, self.current_step_id()),
            Err(e) => {
                error!(concept, "Concept explanation error: {}", e);
                self.set_error(Some(QUESTION_ERROR.to_string()));
                self.add_message(Role::Bot, QUESTION_FALLBACK, None);
            }
        }
        self.set_loading(false);
        self.settle().await;
    }

    /// Sends a short progress-aware pep talk.
    pub async fn encourage(&mut self) {
        let performance = self.recent_performance();
        let completed = self.state.progress.completed_steps.len();
        let total = self.lesson.total_steps();

        match self
            .tutor
            .generate_encouragement(completed, total, performance, &self.lesson.topic)
            .await
        {
            Ok(reply) => self.add_message(Role::Bot, reply.text, None),
            Err(e) => warn!("Encouragement generation failed: {}", e),
        }
        self.settle().await;
    }

    fn recent_performance(&self) -> Performance {
        let answers = &self.state.progress.answers;
        let recent: Vec<bool> = answers[answers.len().saturating_sub(3)..]
            .iter()
            .filter_map(|a| a.is_correct)
            .collect();
        let correct = recent.iter().filter(|c| **c).count();
        if recent.len() >= 3 && correct == recent.len() {
            Performance::Excellent
        } else if !recent.is_empty() && correct * 2 < recent.len() {
            Performance::Struggling
        } else {
            Performance::Good
        }
    }

    // --- Queries ---

    pub fn can_go_next(&self) -> bool {
        self.state.step_index + 1 < self.lesson.total_steps()
    }

    pub fn can_go_previous(&self) -> bool {
        self.state.step_index > 0
    }

    /// Completed steps as a rounded percentage of the lesson.
    pub fn progress_percentage(&self) -> u32 {
        let total = self.lesson.total_steps();
        if total == 0 {
            return 0;
        }
        let completed = self.state.progress.completed_steps.len() as f64;
        (completed / total as f64 * 100.0).round() as u32
    }

    /// The first answer recorded for the current step.
    pub fn current_step_answer(&self) -> Option<&StudentAnswer> {
        let step = self.current_step()?;
        self.state
            .progress
            .answers
            .iter()
            .find(|a| a.step_id == step.id)
    }

    pub fn is_off_script(&self) -> bool {
        if self.current_step().is_none() {
            return false;
        }
        let messages = &self.state.messages;
        messages[messages.len().saturating_sub(3)..]
            .iter()
            .any(|m| m.text.contains(OFF_SCRIPT_MARKER))
    }

    pub fn is_in_tutoring_mode(&self) -> bool {
        self.state.tutoring.is_some()
    }

    pub fn is_loading(&self) -> bool {
        self.state.is_loading
    }

    pub fn error(&self) -> Option<&str> {
        self.state.error.as_deref()
    }
}

/// "a, b, or c" from the lesson's focus areas, or its topic when it has none.
fn focus_list(lesson: &LessonConfig) -> String {
    match lesson.focus_areas.as_slice() {
        [] => lesson.topic.clone(),
        [only] => only.clone(),
        [first, last] => format!("{} or {}", first, last),
        [init @ .., last] => format!("{}, or {}", init.join(", "), last),
    }
}
