//! API and Database Models
//!
//! This module defines the core data structures used for both database mapping
//! with `sqlx` and for generating OpenAPI documentation with `utoipa`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use tutor_core::{
    ConversationStore, LessonConfig, LessonStep,
    gateway::{GatewayReply, GatewayRequest, RequestContext},
    types::{LessonProgress, Message},
};

#[derive(Serialize, Deserialize, ToSchema, FromRow, Debug, Clone)]
pub struct Session {
    #[schema(value_type = String, format = Uuid)]
    pub id: Uuid,
    pub user_id: String,
    #[schema(example = "number_systems_intro")]
    pub lesson_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CreateSessionPayload {
    /// Lesson to start; the first available lesson when omitted.
    #[schema(example = "number_systems_intro")]
    #[serde(default)]
    pub lesson_id: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct SendMessagePayload {
    #[schema(example = "All of the above")]
    pub text: String,
}

#[derive(Deserialize, ToSchema)]
pub struct JumpPayload {
    #[schema(example = 5)]
    pub step_index: usize,
}

#[derive(Deserialize, ToSchema)]
pub struct ExplainPayload {
    #[schema(example = "hexadecimal")]
    pub concept: String,
}

/// A session together with the live state of its conversation.
#[derive(Serialize, ToSchema)]
pub struct SessionView {
    pub session: Session,
    pub step_index: usize,
    pub total_steps: usize,
    #[schema(value_type = Option<Object>)]
    pub current_step: Option<LessonStep>,
    #[schema(value_type = Vec<Object>)]
    pub messages: Vec<Message>,
    #[schema(value_type = Object)]
    pub progress: LessonProgress,
    pub progress_percentage: u32,
    pub can_go_next: bool,
    pub can_go_previous: bool,
    pub in_tutoring: bool,
    pub off_script: bool,
    /// Set when the last operation hit a backend failure.
    pub error: Option<String>,
}

impl SessionView {
    pub fn new(session: Session, store: &ConversationStore) -> Self {
        let state = store.state();
        Self {
            session,
            step_index: state.step_index,
            total_steps: store.lesson().total_steps(),
            current_step: store.current_step().cloned(),
            messages: state.messages.clone(),
            progress: state.progress.clone(),
            progress_percentage: store.progress_percentage(),
            can_go_next: store.can_go_next(),
            can_go_previous: store.can_go_previous(),
            in_tutoring: store.is_in_tutoring_mode(),
            off_script: store.is_off_script(),
            error: state.error.clone(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug, PartialEq)]
pub struct LessonSummary {
    pub id: String,
    pub title: String,
    pub topic: String,
    pub description: String,
    pub total_steps: usize,
    /// Minutes.
    pub estimated_duration: u32,
}

impl From<&LessonConfig> for LessonSummary {
    fn from(lesson: &LessonConfig) -> Self {
        Self {
            id: lesson.id.clone(),
            title: lesson.title.clone(),
            topic: lesson.topic.clone(),
            description: lesson.description.clone(),
            total_steps: lesson.total_steps(),
            estimated_duration: lesson.estimated_duration_minutes,
        }
    }
}

/// Body of `POST /api/gemini`.
#[derive(Deserialize, ToSchema)]
pub struct GenerateRequest {
    #[schema(example = "Explain binary in one sentence.")]
    pub prompt: String,
    #[schema(value_type = Option<Object>)]
    #[serde(default)]
    pub context: Option<RequestContext>,
}

impl From<GenerateRequest> for GatewayRequest {
    fn from(request: GenerateRequest) -> Self {
        GatewayRequest {
            prompt: request.prompt,
            context: request.context,
        }
    }
}

/// The envelope `POST /api/gemini` answers with.
#[derive(Serialize, ToSchema, Debug)]
pub struct GenerateResponse {
    pub success: bool,
    #[schema(value_type = Option<Object>)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<GatewayReply>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct HealthReport {
    pub status: String,
    pub provider: String,
    pub model: String,
    pub backend_reachable: bool,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
