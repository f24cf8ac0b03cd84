//! Main Entrypoint for the Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Opening the session database and running migrations.
//! 3. Building the generative backend gateway, the tutor client and the lessons.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use tutor_api::{
    config::Config,
    db::Db,
    router::create_router,
    state::{AppState, SessionLocks},
};
use tutor_core::{
    LessonConfig, Pacing, PromptKey, PromptLibrary, StoreConfig, TutorClient, gateway,
    lesson::available_lessons,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

/// The built-in lessons, with the configured lesson file taking precedence
/// over a built-in lesson of the same id.
fn load_lessons(config: &Config) -> anyhow::Result<Vec<Arc<LessonConfig>>> {
    let mut lessons = available_lessons();
    if let Some(path) = &config.lesson_path {
        let extra = LessonConfig::from_json_file(path)?;
        info!(lesson = %extra.id, path = %path.display(), "Loaded lesson file");
        lessons.retain(|l| l.id != extra.id);
        lessons.insert(0, extra);
    }
    Ok(lessons.into_iter().map(Arc::new).collect())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Database ---
    let options = SqliteConnectOptions::from_str(&config.database_url)
        .context("Invalid DATABASE_URL")?
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .context("Failed to connect to database")?;
    let db = Arc::new(Db::new(pool));
    db.run_migrations().await?;
    info!("Database connection established and migrations are up-to-date.");

    // --- 4. Initialize Shared Services ---
    let prompts = match &config.prompts_path {
        Some(dir) => PromptLibrary::load_dir(dir)?,
        None => PromptLibrary::builtin(),
    };
    let system_prompt = prompts.template(PromptKey::SystemPrompt).to_string();
    let gateway = gateway::connect(&config.gateway_settings(system_prompt))?;
    let tutor = TutorClient::new(gateway.clone(), prompts);

    let lessons = load_lessons(&config)?;
    info!(count = lessons.len(), "Lessons ready");

    let store_config = StoreConfig {
        pacing: Pacing::default().scaled(config.pace_scale),
        summary_every: config.summary_every,
        ..StoreConfig::default()
    };

    let app_state = Arc::new(AppState {
        db,
        gateway,
        tutor,
        lessons: Arc::new(lessons),
        store_config,
        session_locks: SessionLocks::default(),
        config: Arc::new(config.clone()),
    });

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 6. Start Server ---
    info!(
        provider = ?config.provider,
        model = %config.chat_model,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server has shut down.");
    Ok(())
}
