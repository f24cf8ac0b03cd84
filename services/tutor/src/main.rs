//! Terminal front end for the tutor.
//!
//! Walks one student through a lesson on stdin/stdout and keeps the session
//! in a JSON file so it can be picked up later. Logs go to stderr.

mod command;
mod repl;
mod session_file;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{Level, info};
use tutor_core::{
    LessonConfig, Pacing, PromptKey, PromptLibrary, Provider, StoreConfig, TutorClient,
    gateway::{self, GatewaySettings},
    lesson::available_lessons,
};

#[derive(Parser)]
#[command(name = "tutor", version)]
#[command(about = "Work through a lesson with the AI tutor in your terminal", long_about = None)]
struct Cli {
    /// Generative backend: gemini, openai or proxy
    #[arg(long, env = "TUTOR_PROVIDER", default_value = "gemini")]
    provider: Provider,

    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    gemini_api_key: Option<String>,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Base URL of the proxy when the provider is `proxy`
    #[arg(long, env = "GATEWAY_URL")]
    gateway_url: Option<String>,

    #[arg(long, env = "CHAT_MODEL")]
    model: Option<String>,

    /// Lesson JSON file; the built-in lesson is used otherwise
    #[arg(long, env = "LESSON_PATH")]
    lesson: Option<PathBuf>,

    /// Directory of prompt template overrides
    #[arg(long, env = "PROMPTS_PATH")]
    prompts: Option<PathBuf>,

    /// Where the session is saved between runs
    #[arg(long, env = "TUTOR_STATE", default_value = "tutor-session.json")]
    state_file: PathBuf,

    /// Ignore any saved session and start over
    #[arg(long)]
    fresh: bool,

    /// Multiplier for the tutor's pauses; 0 answers instantly
    #[arg(long, env = "PACE_SCALE", default_value_t = 1.0)]
    pace: f64,

    /// Refresh the conversation summary every N messages; 0 disables
    #[arg(long, env = "SUMMARY_EVERY", default_value_t = 6)]
    summary_every: usize,

    #[arg(long, env = "TUTOR_LOG", default_value = "warn")]
    log_level: Level,
}

impl Cli {
    fn gateway_settings(&self, system_prompt: String) -> GatewaySettings {
        let (api_key, default_model) = match self.provider {
            Provider::OpenAI => (self.openai_api_key.clone(), "gpt-4o-mini"),
            Provider::Gemini => (self.gemini_api_key.clone(), "gemini-2.0-flash"),
            Provider::Proxy => (None, "gemini-2.0-flash"),
        };
        GatewaySettings {
            provider: self.provider,
            base_url: self.gateway_url.clone(),
            api_key,
            model: self.model.clone().unwrap_or_else(|| default_model.to_string()),
            system_prompt,
        }
    }

    fn lesson(&self) -> Result<LessonConfig> {
        match &self.lesson {
            Some(path) => Ok(LessonConfig::from_json_file(path)?),
            None => available_lessons()
                .into_iter()
                .next()
                .context("No built-in lesson available"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let prompts = match &cli.prompts {
        Some(dir) => PromptLibrary::load_dir(dir)?,
        None => PromptLibrary::builtin(),
    };
    let system_prompt = prompts.template(PromptKey::SystemPrompt).to_string();
    let gateway = gateway::connect(&cli.gateway_settings(system_prompt))
        .context("Failed to set up the generative backend")?;
    if !gateway.health_check().await {
        eprintln!("warning: the tutor backend is not reachable; answers will use fallbacks");
    }
    let tutor = TutorClient::new(gateway, prompts);

    let lesson = Arc::new(cli.lesson()?);
    let config = StoreConfig {
        pacing: Pacing::default().scaled(cli.pace),
        summary_every: cli.summary_every,
        ..StoreConfig::default()
    };
    let (store, resumed) =
        session_file::open_store(&cli.state_file, lesson, tutor, config, cli.fresh)?;
    info!(resumed, state_file = %cli.state_file.display(), "Session ready");

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut repl = repl::Repl::new(store, cli.state_file.clone(), std::io::stdout());
    repl.run(stdin).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["tutor", "--gemini-api-key", "k"]).unwrap();
        assert_eq!(cli.provider, Provider::Gemini);
        assert_eq!(cli.state_file, PathBuf::from("tutor-session.json"));
        assert!(!cli.fresh);

        let settings = cli.gateway_settings("sys".to_string());
        assert_eq!(settings.api_key.as_deref(), Some("k"));
        assert_eq!(settings.model, "gemini-2.0-flash");
        assert_eq!(cli.lesson().unwrap().id, "number_systems_intro");
    }

    #[test]
    fn test_cli_proxy_settings() {
        let cli = Cli::try_parse_from([
            "tutor",
            "--provider",
            "proxy",
            "--gateway-url",
            "http://localhost:3000/api",
            "--pace",
            "0",
            "--fresh",
        ])
        .unwrap();
        let settings = cli.gateway_settings(String::new());
        assert_eq!(settings.provider, Provider::Proxy);
        assert_eq!(settings.base_url.as_deref(), Some("http://localhost:3000/api"));
        assert_eq!(settings.api_key, None);
        assert!(cli.fresh);
    }

    #[test]
    fn test_cli_rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["tutor", "--provider", "claude"]).is_err());
    }
}
