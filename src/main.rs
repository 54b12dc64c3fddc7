//! Main entry point for the generation orchestrator

use gen_orchestrator::{
    api,
    clock::SystemClock,
    config::Settings,
    generation::TemplatePromptBuilder,
    provider::ProviderRegistry,
    AppState, Stores,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Load configuration
    let settings = Settings::load()?;
    settings.validate()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.logging.level));

    if settings.logging.format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().pretty())
            .init();
    }

    info!("Starting generation orchestrator");
    info!(
        "Loaded configuration: server={}:{}, providers={}",
        settings.server.host,
        settings.server.port,
        settings.providers.len()
    );

    let addr = format!("{}:{}", settings.server.host, settings.server.port);

    let registry = Arc::new(ProviderRegistry::with_builtin(&settings.adapters)?);
    let state = Arc::new(AppState::new(
        settings,
        Stores::in_memory(),
        registry,
        Arc::new(SystemClock),
        Arc::new(TemplatePromptBuilder),
    ));
    state.seed().await?;

    // Start the job scheduler; finished jobs are swept via the admin endpoint
    let _scheduler = state.queue.start();

    // Build the router
    let app = api::create_router(state);

    info!("Server listening on {}", addr);

    // Start the server
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
