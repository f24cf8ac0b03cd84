//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the session API, the generative backend proxy, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        CreateSessionPayload, ErrorResponse, ExplainPayload, GenerateRequest, GenerateResponse,
        HealthReport, JumpPayload, LessonSummary, SendMessagePayload, Session, SessionView,
    },
    state::AppState,
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::create_session,
        handlers::list_sessions,
        handlers::get_session,
        handlers::send_message,
        handlers::next_step,
        handlers::previous_step,
        handlers::jump_to_step,
        handlers::reset_lesson,
        handlers::return_to_lesson,
        handlers::request_hint,
        handlers::explain_concept,
        handlers::list_lessons,
        handlers::generate,
        handlers::health,
    ),
    components(
        schemas(
            Session, SessionView, CreateSessionPayload, SendMessagePayload, JumpPayload,
            ExplainPayload, LessonSummary, GenerateRequest, GenerateResponse, HealthReport,
            ErrorResponse
        )
    ),
    tags(
        (name = "Tutor API", description = "Lesson sessions for the conversational tutor")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    let api_router = Router::new()
        .route(
            "/sessions",
            get(handlers::list_sessions).post(handlers::create_session),
        )
        .route("/sessions/{id}", get(handlers::get_session))
        .route("/sessions/{id}/messages", post(handlers::send_message))
        .route("/sessions/{id}/next", post(handlers::next_step))
        .route("/sessions/{id}/previous", post(handlers::previous_step))
        .route("/sessions/{id}/jump", post(handlers::jump_to_step))
        .route("/sessions/{id}/reset", post(handlers::reset_lesson))
        .route("/sessions/{id}/return", post(handlers::return_to_lesson))
        .route("/sessions/{id}/hint", post(handlers::request_hint))
        .route("/sessions/{id}/explain", post(handlers::explain_concept))
        .route("/lessons", get(handlers::list_lessons))
        .route("/api/gemini", post(handlers::generate))
        .route("/api/health", get(handlers::health))
        .with_state(app_state);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::Config,
        db::{Db, tests::memory_db},
        state::SessionLocks,
    };
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tutor_core::{
        LessonConfig, PromptLibrary, StoreConfig, TutorClient,
        gateway::{Provider, ScriptedGateway},
        lesson::number_systems,
        store::{OFF_SCRIPT_FOOTER, Pacing},
    };

    fn test_config() -> Config {
        Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            database_url: "sqlite::memory:".to_string(),
            provider: Provider::Gemini,
            openai_api_key: None,
            gemini_api_key: Some("test-key".to_string()),
            gateway_url: None,
            chat_model: "gemini-2.0-flash".to_string(),
            log_level: tracing::Level::INFO,
            prompts_path: None,
            lesson_path: None,
            pace_scale: 0.0,
            summary_every: 0,
        }
    }

    async fn test_app(gateway: Arc<ScriptedGateway>) -> Router {
        app_with(gateway, Arc::new(memory_db().await), number_systems())
    }

    fn app_with(gateway: Arc<ScriptedGateway>, db: Arc<Db>, lesson: LessonConfig) -> Router {
        let tutor = TutorClient::new(gateway.clone(), PromptLibrary::builtin());
        let state = AppState {
            db,
            gateway,
            tutor,
            lessons: Arc::new(vec![Arc::new(lesson)]),
            store_config: StoreConfig {
                pacing: Pacing::immediate(),
                summary_every: 0,
                ..StoreConfig::default()
            },
            session_locks: SessionLocks::default(),
            config: Arc::new(test_config()),
        };
        create_router(Arc::new(state))
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        user: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn create(app: &Router, user: &str) -> String {
        let (status, body) = send(app, "POST", "/sessions", Some(user), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        body["session"]["id"].as_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_create_session_starts_the_lesson() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;

        let (status, body) = send(&app, "POST", "/sessions", Some("alice"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["session"]["user_id"], "alice");
        assert_eq!(body["session"]["lesson_id"], "number_systems_intro");
        assert_eq!(body["step_index"], 0);
        assert_eq!(body["total_steps"], 13);
        assert_eq!(body["current_step"]["id"], "welcome");
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
        assert_eq!(body["messages"][0]["role"], "bot");
        assert_eq!(body["can_go_previous"], false);

        let id = body["session"]["id"].as_str().unwrap();
        let (status, fetched) = send(&app, "GET", &format!("/sessions/{}", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["messages"], body["messages"]);

        let (status, listed) = send(&app, "GET", "/sessions", Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_requests_need_a_user_and_a_known_lesson() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;

        let (status, body) = send(&app, "POST", "/sessions", None, Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].as_str().unwrap().contains("x-user-id"));

        let (status, _) = send(
            &app,
            "POST",
            "/sessions",
            Some("alice"),
            Some(json!({"lesson_id": "knitting_101"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_sessions_are_private_to_their_user() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;
        let id = create(&app, "alice").await;

        let (status, _) = send(&app, "GET", &format!("/sessions/{}", id), Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "POST", &format!("/sessions/{}/next", id), Some("bob"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (_, listed) = send(&app, "GET", "/sessions", Some("bob"), None).await;
        assert!(listed.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_navigation_is_persisted() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;
        let id = create(&app, "alice").await;

        let (status, body) = send(&app, "POST", &format!("/sessions/{}/next", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["step_index"], 1);
        assert_eq!(body["current_step"]["id"], "intro_question");
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);

        let (_, body) = send(
            &app,
            "POST",
            &format!("/sessions/{}/jump", id),
            Some("alice"),
            Some(json!({"step_index": 99})),
        )
        .await;
        assert_eq!(body["step_index"], 1);

        let (_, body) = send(
            &app,
            "POST",
            &format!("/sessions/{}/jump", id),
            Some("alice"),
            Some(json!({"step_index": 5})),
        )
        .await;
        assert_eq!(body["current_step"]["id"], "binary_quiz1");

        let (_, body) = send(&app, "POST", &format!("/sessions/{}/previous", id), Some("alice"), None).await;
        assert_eq!(body["step_index"], 4);

        let (_, fetched) = send(&app, "GET", &format!("/sessions/{}", id), Some("alice"), None).await;
        assert_eq!(fetched["step_index"], 4);

        let (_, body) = send(&app, "POST", &format!("/sessions/{}/reset", id), Some("alice"), None).await;
        assert_eq!(body["step_index"], 0);
        assert_eq!(body["messages"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_messages_route_through_the_store() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_reply("Binary is base two.");
        let app = test_app(gateway.clone()).await;
        let id = create(&app, "alice").await;
        let uri = format!("/sessions/{}/messages", id);

        let (status, body) = send(&app, "POST", &uri, Some("alice"), Some(json!({"text": "continue"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["current_step"]["id"], "intro_question");

        let (status, _) = send(&app, "POST", &uri, Some("alice"), Some(json!({"text": "   "}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(&app, "POST", &uri, Some("alice"), Some(json!({"text": "What is binary?"}))).await;
        let messages = body["messages"].as_array().unwrap();
        let reply = messages.last().unwrap()["text"].as_str().unwrap();
        assert!(reply.starts_with("Binary is base two."));
        assert!(reply.ends_with(OFF_SCRIPT_FOOTER));
        assert_eq!(body["off_script"], true);
        assert_eq!(gateway.requests().len(), 1);

        let (_, body) = send(&app, "POST", &format!("/sessions/{}/return", id), Some("alice"), None).await;
        let last = body["messages"].as_array().unwrap().last().unwrap().clone();
        assert!(last["text"].as_str().unwrap().starts_with("Let's continue with our lesson!"));
        assert_eq!(last["step_id"], "intro_question");
    }

    #[tokio::test]
    async fn test_backend_failures_surface_on_the_session() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_failure("quota exceeded");
        let app = test_app(gateway).await;
        let id = create(&app, "alice").await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/sessions/{}/messages", id),
            Some("alice"),
            Some(json!({"text": "Why do computers count?"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_lessons_are_listed() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;
        let (status, body) = send(&app, "GET", "/lessons", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], "number_systems_intro");
        assert_eq!(body[0]["total_steps"], 13);
    }

    #[tokio::test]
    async fn test_generate_wraps_backend_replies() {
        let gateway = Arc::new(ScriptedGateway::new());
        gateway.push_reply("101");
        let app = test_app(gateway.clone()).await;

        let (status, body) = send(
            &app,
            "POST",
            "/api/gemini",
            None,
            Some(json!({"prompt": "5 in binary?", "context": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["text"], "101");
        assert!(body.get("error").is_none());
        assert_eq!(gateway.requests()[0].prompt, "5 in binary?");

        let (status, body) = send(&app, "POST", "/api/gemini", None, Some(json!({"prompt": "again"}))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["success"], false);
        assert!(body["error"].is_string());

        let (status, body) = send(&app, "POST", "/api/gemini", None, Some(json!({"prompt": ""}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Prompt is required");
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let app = test_app(Arc::new(ScriptedGateway::new())).await;
        let (status, body) = send(&app, "GET", "/api/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["provider"], "gemini");
        assert_eq!(body["backend_reachable"], true);
    }

    #[test]
    fn test_openapi_lists_session_routes() {
        let doc = ApiDoc::openapi();
        for path in ["/sessions", "/sessions/{id}/messages", "/api/gemini", "/api/health"] {
            assert!(doc.paths.paths.contains_key(path), "missing {}", path);
        }
    }

    #[tokio::test]
    async fn test_session_past_the_end_of_a_shortened_lesson_is_a_conflict() {
        let db = Arc::new(memory_db().await);
        let gateway = Arc::new(ScriptedGateway::new());
        let app = app_with(gateway.clone(), db.clone(), number_systems());
        let id = create(&app, "alice").await;
        let (status, _) = send(
            &app,
            "POST",
            &format!("/sessions/{}/jump", id),
            Some("alice"),
            Some(json!({"step_index": 10})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let mut short = number_systems();
        short.steps.truncate(5);
        let app = app_with(gateway, db, short);

        let (status, body) = send(&app, "GET", &format!("/sessions/{}", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["message"].as_str().unwrap().contains("out of range"));

        let (status, _) = send(&app, "POST", &format!("/sessions/{}/next", id), Some("alice"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }
}
