//! Axum Handlers for the REST API
//!
//! Session handlers restore a [`ConversationStore`] from the database, run one
//! store operation under the session's lock, persist the resulting state and
//! answer with a [`SessionView`]. It uses `utoipa` doc comments to generate
//! OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;
use tracing::{error, info, warn};
use tutor_core::{ConversationStore, gateway::GatewayRequest};
use uuid::Uuid;

use crate::{
    models::{
        CreateSessionPayload, ErrorResponse, ExplainPayload, GenerateRequest, GenerateResponse,
        HealthReport, JumpPayload, LessonSummary, SendMessagePayload, Session, SessionView,
    },
    state::AppState,
};

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    /// The stored session no longer fits the lesson it belongs to.
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

fn user_id(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest("x-user-id header is required".to_string()))
}

fn session_not_found(id: Uuid) -> ApiError {
    ApiError::NotFound(format!("Session with id '{}' not found", id))
}

/// Restores the store of a session owned by `user_id`.
async fn load_store(
    state: &AppState,
    user_id: &str,
    id: Uuid,
) -> Result<(Session, ConversationStore), ApiError> {
    let session = state
        .db
        .get_session(id, user_id)
        .await?
        .ok_or_else(|| session_not_found(id))?;
    let saved = state
        .db
        .load_state(id)
        .await?
        .ok_or_else(|| session_not_found(id))?;
    let lesson = state.lesson(&session.lesson_id).ok_or_else(|| {
        ApiError::InternalServerError(anyhow::anyhow!(
            "Lesson '{}' of session {} is no longer served",
            session.lesson_id,
            id
        ))
    })?;
    let store = ConversationStore::restore(
        lesson,
        state.tutor.clone(),
        state.store_config.clone(),
        saved,
    )
    .map_err(|e| {
        warn!(session_id = %id, "Stored session does not fit its lesson: {}", e);
        ApiError::Conflict(e.to_string())
    })?;
    Ok((session, store))
}

/// Runs `op` against the session's store and persists the outcome.
async fn with_store<F>(
    state: &AppState,
    headers: &HeaderMap,
    id: Uuid,
    op: F,
) -> Result<Json<SessionView>, ApiError>
where
    F: for<'a> FnOnce(&'a mut ConversationStore) -> BoxFuture<'a, ()> + Send,
{
    let user_id = user_id(headers)?;
    let lock = state.session_locks.lock_for(id);
    let result = {
        let _guard = lock.lock().await;
        run_locked(state, user_id, id, op).await
    };
    drop(lock);
    state.session_locks.release(id);
    result
}

async fn run_locked<F>(
    state: &AppState,
    user_id: &str,
    id: Uuid,
    op: F,
) -> Result<Json<SessionView>, ApiError>
where
    F: for<'a> FnOnce(&'a mut ConversationStore) -> BoxFuture<'a, ()> + Send,
{
    let (_, mut store) = load_store(state, user_id, id).await?;
    op(&mut store).await;
    store.settle().await;

    let session = state.db.save_state(id, store.state()).await?;
    Ok(Json(SessionView::new(session, &store)))
}

/// Start a lesson session.
#[utoipa::path(
    post,
    path = "/sessions",
    request_body = CreateSessionPayload,
    responses(
        (status = 201, description = "Session created successfully", body = SessionView),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user creating the session")
    )
)]
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(payload): Json<CreateSessionPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = user_id(&headers)?;

    let lesson = match payload.lesson_id {
        Some(lesson_id) => state
            .lesson(&lesson_id)
            .ok_or_else(|| ApiError::BadRequest(format!("Unknown lesson '{}'", lesson_id)))?,
        None => state.lessons.first().cloned().ok_or_else(|| {
            ApiError::InternalServerError(anyhow::anyhow!("No lessons are configured"))
        })?,
    };

    let mut store = ConversationStore::new(
        lesson.clone(),
        state.tutor.clone(),
        state.store_config.clone(),
    );
    store.initialize_lesson();

    let session = state
        .db
        .create_session(user_id, &lesson.id, store.state())
        .await?;
    info!(session_id = %session.id, user_id, lesson = %lesson.id, "Session created");

    Ok((StatusCode::CREATED, Json(SessionView::new(session, &store))))
}

/// List all sessions for a user.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of sessions", body = [Session]),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn list_sessions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Session>>, ApiError> {
    let user_id = user_id(&headers)?;
    let sessions = state.db.list_sessions(user_id).await?;
    Ok(Json(sessions))
}

/// Get a session and its conversation.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    responses(
        (status = 200, description = "Session details", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    let user_id = user_id(&headers)?;
    let (session, store) = load_store(&state, user_id, id).await?;
    Ok(Json(SessionView::new(session, &store)))
}

/// Send a student message: an answer, a reflection, a continuation or a question.
#[utoipa::path(
    post,
    path = "/sessions/{id}/messages",
    request_body = SendMessagePayload,
    responses(
        (status = 200, description = "Conversation after the message", body = SessionView),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<SendMessagePayload>,
) -> Result<Json<SessionView>, ApiError> {
    if payload.text.trim().is_empty() {
        return Err(ApiError::BadRequest("text must not be empty".to_string()));
    }
    with_store(&state, &headers, id, move |store| {
        async move { store.handle_student_message(&payload.text).await }.boxed()
    })
    .await
}

/// Advance to the next lesson step.
#[utoipa::path(
    post,
    path = "/sessions/{id}/next",
    responses(
        (status = 200, description = "Conversation after advancing", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn next_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, |store| {
        async move { store.next_step() }.boxed()
    })
    .await
}

/// Step back to the previous lesson step.
#[utoipa::path(
    post,
    path = "/sessions/{id}/previous",
    responses(
        (status = 200, description = "Conversation after stepping back", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn previous_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, |store| {
        async move { store.previous_step() }.boxed()
    })
    .await
}

/// Jump to a step by index. Indexes outside the lesson are ignored.
#[utoipa::path(
    post,
    path = "/sessions/{id}/jump",
    request_body = JumpPayload,
    responses(
        (status = 200, description = "Conversation after the jump", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn jump_to_step(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<JumpPayload>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, move |store| {
        async move { store.jump_to_step(payload.step_index) }.boxed()
    })
    .await
}

/// Restart the lesson from the beginning.
#[utoipa::path(
    post,
    path = "/sessions/{id}/reset",
    responses(
        (status = 200, description = "Fresh conversation", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn reset_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, |store| {
        async move { store.reset_lesson() }.boxed()
    })
    .await
}

/// Steer an off-script conversation back to the current step.
#[utoipa::path(
    post,
    path = "/sessions/{id}/return",
    responses(
        (status = 200, description = "Conversation after the reminder", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn return_to_lesson(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, |store| {
        async move { store.return_to_lesson() }.boxed()
    })
    .await
}

/// Ask for a hint on the current step.
#[utoipa::path(
    post,
    path = "/sessions/{id}/hint",
    responses(
        (status = 200, description = "Conversation with the hint", body = SessionView),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn request_hint(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_store(&state, &headers, id, |store| {
        async move { store.request_hint().await }.boxed()
    })
    .await
}

/// Ask for an explanation of a concept.
#[utoipa::path(
    post,
    path = "/sessions/{id}/explain",
    request_body = ExplainPayload,
    responses(
        (status = 200, description = "Conversation with the explanation", body = SessionView),
        (status = 400, description = "Bad request", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse),
        (status = 409, description = "Session no longer fits its lesson", body = ErrorResponse)
    ),
    params(
        ("id" = Uuid, Path, description = "Session ID"),
        ("x-user-id" = String, Header, description = "The ID of the user")
    )
)]
pub async fn explain_concept(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
    Json(payload): Json<ExplainPayload>,
) -> Result<Json<SessionView>, ApiError> {
    if payload.concept.trim().is_empty() {
        return Err(ApiError::BadRequest("concept must not be empty".to_string()));
    }
    with_store(&state, &headers, id, move |store| {
        async move { store.explain_concept(&payload.concept).await }.boxed()
    })
    .await
}

/// List the lessons this server can run.
#[utoipa::path(
    get,
    path = "/lessons",
    responses(
        (status = 200, description = "Available lessons", body = [LessonSummary])
    )
)]
pub async fn list_lessons(State(state): State<Arc<AppState>>) -> Json<Vec<LessonSummary>> {
    Json(
        state
            .lessons
            .iter()
            .map(|lesson| LessonSummary::from(lesson.as_ref()))
            .collect(),
    )
}

/// Forward a prompt to the generative backend.
#[utoipa::path(
    post,
    path = "/api/gemini",
    request_body = GenerateRequest,
    responses(
        (status = 200, description = "Backend reply", body = GenerateResponse),
        (status = 400, description = "Missing prompt", body = GenerateResponse),
        (status = 502, description = "Backend failure", body = GenerateResponse)
    )
)]
pub async fn generate(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<GenerateRequest>,
) -> (StatusCode, Json<GenerateResponse>) {
    if payload.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(GenerateResponse {
                success: false,
                data: None,
                error: Some("Prompt is required".to_string()),
            }),
        );
    }

    let request = GatewayRequest::from(payload);
    match state.gateway.generate(&request).await {
        Ok(reply) => (
            StatusCode::OK,
            Json(GenerateResponse {
                success: true,
                data: Some(reply),
                error: None,
            }),
        ),
        Err(e) => {
            error!("Gemini API error: {}", e);
            (
                StatusCode::BAD_GATEWAY,
                Json(GenerateResponse {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                }),
            )
        }
    }
}

/// Report whether the generative backend is reachable.
#[utoipa::path(
    get,
    path = "/api/health",
    responses(
        (status = 200, description = "Backend reachable", body = HealthReport),
        (status = 503, description = "Backend unreachable", body = HealthReport)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthReport>) {
    let reachable = state.gateway.health_check().await;
    let report = HealthReport {
        status: if reachable { "ok" } else { "degraded" }.to_string(),
        provider: format!("{:?}", state.config.provider).to_lowercase(),
        model: state.config.chat_model.clone(),
        backend_reachable: reachable,
    };
    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}
