//! AI Gateway Clients
//!
//! The tutor talks to a single generative backend through the [`AiGateway`]
//! trait. Two real implementations exist: [`ProxyGateway`] posts the request
//! envelope to a server-side proxy, and [`OpenAiCompatibleGateway`] calls an
//! OpenAI-compatible chat endpoint directly (OpenAI itself, or Gemini's
//! compatibility layer). [`ScriptedGateway`] replays canned replies.

use anyhow::Context;
use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info};

use crate::lesson::LessonStep;
use crate::types::Message;

pub const GEMINI_OPENAI_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/openai";
pub const OPENAI_BASE: &str = "https://api.openai.com/v1/";

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Failed to communicate with the AI gateway: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("HTTP error! status: {0}")]
    Status(u16),
    #[error("{0}")]
    Backend(String),
    #[error("AI provider error: {0}")]
    Provider(#[from] async_openai::error::OpenAIError),
    #[error("Gateway misconfigured: {0}")]
    Config(String),
    #[error("LLM response had no text content")]
    EmptyReply,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LearningStyle {
    Visual,
    Auditory,
    Kinesthetic,
    #[default]
    Mixed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StudentPreferences {
    pub pace: String,
    pub encouragement_style: String,
}

/// Optional personalization sent along with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProfile {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub preferred_language: String,
    pub learning_style: LearningStyle,
    pub current_level: String,
    #[serde(default)]
    pub completed_lessons: Vec<String>,
    pub preferences: StudentPreferences,
}

impl StudentProfile {
    /// The anonymous profile used when nothing is known about the student.
    pub fn current(level: &str) -> Self {
        Self {
            id: "current-student".to_string(),
            name: None,
            preferred_language: "en".to_string(),
            learning_style: LearningStyle::Mixed,
            current_level: level.to_string(),
            completed_lessons: Vec::new(),
            preferences: StudentPreferences {
                pace: "medium".to_string(),
                encouragement_style: "friendly".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<LessonStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_messages: Option<Vec<Message>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_profile: Option<StudentProfile>,
}

/// The request envelope understood by every gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<RequestContext>,
}

impl GatewayRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayReply {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestions: Option<Vec<String>>,
}

impl GatewayReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            confidence: None,
            suggestions: None,
        }
    }
}

/// Response envelope used by the proxy endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: None,
        }
    }
}

/// A request/response client for the generative backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Sends one prompt and returns the backend's reply.
    async fn generate(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError>;

    /// Reports whether the backend is reachable.
    async fn health_check(&self) -> bool {
        true
    }
}

/// Which backend a gateway talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Gemini,
    OpenAI,
    /// A server exposing `POST /gemini` with the [`ApiResponse`] envelope.
    Proxy,
}

impl FromStr for Provider {
    type Err = GatewayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gemini" => Ok(Provider::Gemini),
            "openai" => Ok(Provider::OpenAI),
            "proxy" => Ok(Provider::Proxy),
            other => Err(GatewayError::Config(format!("unknown provider '{}'", other))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub provider: Provider,
    /// Proxy base URL (e.g. `http://localhost:3000/api`).
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub system_prompt: String,
}

/// Builds the gateway described by `settings`.
pub fn connect(settings: &GatewaySettings) -> Result<Arc<dyn AiGateway>, GatewayError> {
    match settings.provider {
        Provider::Proxy => {
            let base = settings
                .base_url
                .as_deref()
                .ok_or_else(|| GatewayError::Config("proxy provider needs a base URL".into()))?;
            info!(base_url = %base, "Using proxy gateway.");
            Ok(Arc::new(ProxyGateway::new(base)))
        }
        Provider::Gemini | Provider::OpenAI => {
            let api_key = settings.api_key.as_deref().ok_or_else(|| {
                GatewayError::Config(format!("{:?} provider needs an API key", settings.provider))
            })?;
            let api_base = match settings.provider {
                Provider::Gemini => GEMINI_OPENAI_BASE,
                _ => OPENAI_BASE,
            };
            info!(provider = ?settings.provider, model = %settings.model, "Using OpenAI-compatible gateway.");
            let config = OpenAIConfig::new()
                .with_api_key(api_key)
                .with_api_base(api_base);
            Ok(Arc::new(OpenAiCompatibleGateway::new(
                config,
                settings.model.clone(),
                settings.system_prompt.clone(),
            )))
        }
    }
}

/// Posts requests to a server-side proxy that holds the real credentials.
pub struct ProxyGateway {
    base_url: String,
    client: reqwest::Client,
}

impl ProxyGateway {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl AiGateway for ProxyGateway {
    async fn generate(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError> {
        let response = self
            .client
            .post(format!("{}/gemini", self.base_url))
            .json(request)
            .send()
            .await
            .inspect_err(|e| error!("Gemini API error: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            error!(status = status.as_u16(), "Gemini proxy returned an error status");
            return Err(GatewayError::Status(status.as_u16()));
        }

        let envelope: ApiResponse<GatewayReply> = response.json().await?;
        if !envelope.success {
            return Err(GatewayError::Backend(
                envelope
                    .error
                    .unwrap_or_else(|| "Unknown error occurred".to_string()),
            ));
        }
        Ok(envelope
            .data
            .unwrap_or_else(|| GatewayReply::text("No response received")))
    }

    async fn health_check(&self) -> bool {
        match self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Calls any OpenAI-compatible chat completion API.
pub struct OpenAiCompatibleGateway {
    client: Client<OpenAIConfig>,
    model: String,
    system_prompt: String,
}

impl OpenAiCompatibleGateway {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `model` - The model identifier to use (e.g., "gemini-2.0-flash").
    /// * `system_prompt` - Persona instructions sent with every request.
    pub fn new(config: OpenAIConfig, model: String, system_prompt: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
            system_prompt,
        }
    }

    fn system_message(&self, context: Option<&RequestContext>) -> anyhow::Result<String> {
        match context {
            Some(ctx) => {
                let ctx_json = serde_json::to_string_pretty(ctx)
                    .context("Failed to serialize request context")?;
                Ok(format!(
                    "{}\n\n# Context for This Request\n\n```json\n{}\n```",
                    self.system_prompt, ctx_json
                ))
            }
            None => Ok(self.system_prompt.clone()),
        }
    }
}

#[async_trait]
impl AiGateway for OpenAiCompatibleGateway {
    async fn generate(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError> {
        let system = self
            .system_message(request.context.as_ref())
            .map_err(|e| GatewayError::Backend(e.to_string()))?;

        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(vec![
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(system)
                    .build()?
                    .into(),
                ChatCompletionRequestUserMessageArgs::default()
                    .content(request.prompt.clone())
                    .build()?
                    .into(),
            ])
            .build()?;

        debug!(model = %self.model, prompt_len = request.prompt.len(), "Sending chat completion");
        let response = self.client.chat().create(chat_request).await?;

        let text = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or(GatewayError::EmptyReply)?;
        Ok(GatewayReply::text(text))
    }

    async fn health_check(&self) -> bool {
        self.client.models().list().await.is_ok()
    }
}

/// A gateway that replays queued replies in order, recording every request.
///
/// Useful for tests and offline demos. When the queue runs dry every call
/// fails with a backend error.
#[derive(Default)]
pub struct ScriptedGateway {
    replies: Mutex<VecDeque<Result<String, String>>>,
    requests: Mutex<Vec<GatewayRequest>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub fn push_reply(&self, text: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Ok(text.into()));
        self
    }

    /// Queues a failure carrying `message`.
    pub fn push_failure(&self, message: impl Into<String>) -> &Self {
        self.lock_replies().push_back(Err(message.into()));
        self
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<GatewayRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn pending(&self) -> usize {
        self.lock_replies().len()
    }

    fn lock_replies(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<String, String>>> {
        self.replies
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl AiGateway for ScriptedGateway {
    async fn generate(&self, request: &GatewayRequest) -> Result<GatewayReply, GatewayError> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(request.clone());
        match self.lock_replies().pop_front() {
            Some(Ok(text)) => Ok(GatewayReply::text(text)),
            Some(Err(message)) => Err(GatewayError::Backend(message)),
            None => Err(GatewayError::Backend("scripted gateway exhausted".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_from_str() {
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAI);
        assert_eq!("PROXY".parse::<Provider>().unwrap(), Provider::Proxy);
        assert!("claude".parse::<Provider>().is_err());
    }

    #[test]
    fn test_request_serializes_camel_case_context() {
        let request = GatewayRequest {
            prompt: "Explain binary".to_string(),
            context: Some(RequestContext {
                student_profile: Some(StudentProfile::current("beginner")),
                ..Default::default()
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        let profile = &json["context"]["studentProfile"];
        assert_eq!(profile["currentLevel"], "beginner");
        assert_eq!(profile["learningStyle"], "mixed");
        assert_eq!(profile["preferences"]["encouragementStyle"], "friendly");
        assert!(json["context"].get("currentStep").is_none());
    }

    #[test]
    fn test_api_response_envelope() {
        let ok: ApiResponse<GatewayReply> =
            serde_json::from_str(r#"{"success": true, "data": {"text": "hi"}}"#).unwrap();
        assert!(ok.success);
        assert_eq!(ok.data.unwrap().text, "hi");

        let empty: ApiResponse<GatewayReply> = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(empty.data.is_none());

        let failed = serde_json::to_value(ApiResponse::<GatewayReply>::failed("quota")).unwrap();
        assert_eq!(failed["success"], false);
        assert_eq!(failed["error"], "quota");
        assert!(failed.get("data").is_none());
    }

    #[test]
    fn test_connect_validates_settings() {
        let mut settings = GatewaySettings {
            provider: Provider::Proxy,
            base_url: None,
            api_key: None,
            model: "gemini-2.0-flash".to_string(),
            system_prompt: String::new(),
        };
        assert!(matches!(connect(&settings), Err(GatewayError::Config(_))));

        settings.base_url = Some("http://localhost:3000/api/".to_string());
        assert!(connect(&settings).is_ok());

        settings.provider = Provider::Gemini;
        assert!(matches!(connect(&settings), Err(GatewayError::Config(_))));
        settings.api_key = Some("key".to_string());
        assert!(connect(&settings).is_ok());
    }

    #[tokio::test]
    async fn test_scripted_gateway_replays_in_order() {
        let gateway = ScriptedGateway::new();
        gateway.push_reply("first").push_failure("boom");

        let first = gateway.generate(&GatewayRequest::new("a")).await.unwrap();
        assert_eq!(first.text, "first");
        let second = gateway.generate(&GatewayRequest::new("b")).await;
        assert!(matches!(second, Err(GatewayError::Backend(m)) if m == "boom"));
        let third = gateway.generate(&GatewayRequest::new("c")).await;
        assert!(third.is_err());

        let prompts: Vec<_> = gateway.requests().into_iter().map(|r| r.prompt).collect();
        assert_eq!(prompts, vec!["a", "b", "c"]);
        assert_eq!(gateway.pending(), 0);
    }

    /// Serves one canned HTTP response on a local port and returns the base URL.
    async fn serve_once(status: &'static str, body: &'static str) -> String {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text[..end]
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
        });
        format!("http://{}/api", addr)
    }

    #[tokio::test]
    async fn test_proxy_gateway_unwraps_envelope() {
        let base = serve_once("200 OK", r#"{"success": true, "data": {"text": "101"}}"#).await;
        let reply = ProxyGateway::new(&base)
            .generate(&GatewayRequest::new("5 in binary?"))
            .await
            .unwrap();
        assert_eq!(reply.text, "101");
    }

    #[tokio::test]
    async fn test_proxy_gateway_failed_envelope_is_backend_error() {
        let base = serve_once("200 OK", r#"{"success": false}"#).await;
        let err = ProxyGateway::new(&base)
            .generate(&GatewayRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Backend(m) if m == "Unknown error occurred"));
    }

    #[tokio::test]
    async fn test_proxy_gateway_missing_data_yields_placeholder() {
        let base = serve_once("200 OK", r#"{"success": true}"#).await;
        let reply = ProxyGateway::new(&base)
            .generate(&GatewayRequest::new("hello"))
            .await
            .unwrap();
        assert_eq!(reply.text, "No response received");
    }

    #[tokio::test]
    async fn test_proxy_gateway_error_status() {
        let base = serve_once("429 Too Many Requests", r#"{"success": false, "error": "slow down"}"#).await;
        let err = ProxyGateway::new(&base)
            .generate(&GatewayRequest::new("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Status(429)));
    }

    #[tokio::test]
    async fn test_proxy_gateway_reports_unreachable_backend() {
        // Port 9 (discard) on localhost is not expected to serve HTTP.
        let gateway = ProxyGateway::new("http://127.0.0.1:9/api");
        assert!(!gateway.health_check().await);
        let err = gateway.generate(&GatewayRequest::new("hello")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
