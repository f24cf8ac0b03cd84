use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::Level;
use tutor_core::gateway::{GatewaySettings, Provider};

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub database_url: String,
    pub provider: Provider,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    /// Base URL of an upstream proxy when `provider` is `proxy`.
    pub gateway_url: Option<String>,
    pub chat_model: String,
    pub log_level: Level,
    /// Directory of prompt overrides; the built-in templates are used otherwise.
    pub prompts_path: Option<PathBuf>,
    /// Extra lesson file served next to the built-in lessons.
    pub lesson_path: Option<PathBuf>,
    /// Multiplier applied to the tutor's conversational pauses.
    pub pace_scale: f64,
    pub summary_every: usize,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var("BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://tutor.db?mode=rwc".to_string());

        let provider_str =
            std::env::var("TUTOR_PROVIDER").unwrap_or_else(|_| "gemini".to_string());
        let provider = provider_str
            .parse::<Provider>()
            .map_err(|e| ConfigError::InvalidValue("TUTOR_PROVIDER".to_string(), e.to_string()))?;

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let gemini_api_key = std::env::var("GEMINI_API_KEY").ok();
        let gateway_url = std::env::var("GATEWAY_URL").ok();

        let default_model = match provider {
            Provider::OpenAI => "gpt-4o-mini",
            _ => "gemini-2.0-flash",
        };
        let chat_model = std::env::var("CHAT_MODEL").unwrap_or_else(|_| default_model.to_string());

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = std::env::var("PROMPTS_PATH").ok().map(PathBuf::from);
        let lesson_path = std::env::var("LESSON_PATH").ok().map(PathBuf::from);

        let pace_scale = parse_var("PACE_SCALE", 1.0_f64)?;
        if !pace_scale.is_finite() || pace_scale < 0.0 {
            return Err(ConfigError::InvalidValue(
                "PACE_SCALE".to_string(),
                format!("{} is not a non-negative number", pace_scale),
            ));
        }
        let summary_every = parse_var("SUMMARY_EVERY", 6_usize)?;

        match provider {
            Provider::OpenAI if openai_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "OPENAI_API_KEY must be set for 'openai' provider".to_string(),
                ));
            }
            Provider::Gemini if gemini_api_key.is_none() => {
                return Err(ConfigError::MissingVar(
                    "GEMINI_API_KEY must be set for 'gemini' provider".to_string(),
                ));
            }
            Provider::Proxy if gateway_url.is_none() => {
                return Err(ConfigError::MissingVar(
                    "GATEWAY_URL must be set for 'proxy' provider".to_string(),
                ));
            }
            _ => {}
        }

        Ok(Self {
            bind_address,
            database_url,
            provider,
            openai_api_key,
            gemini_api_key,
            gateway_url,
            chat_model,
            log_level,
            prompts_path,
            lesson_path,
            pace_scale,
            summary_every,
        })
    }

    /// The gateway settings for the configured provider.
    pub fn gateway_settings(&self, system_prompt: String) -> GatewaySettings {
        let api_key = match self.provider {
            Provider::OpenAI => self.openai_api_key.clone(),
            Provider::Gemini => self.gemini_api_key.clone(),
            Provider::Proxy => None,
        };
        GatewaySettings {
            provider: self.provider,
            base_url: self.gateway_url.clone(),
            api_key,
            model: self.chat_model.clone(),
            system_prompt,
        }
    }
}
