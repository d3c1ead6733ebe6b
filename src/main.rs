use std::sync::Arc;

use anyhow::Result;
use dotenv::dotenv;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bws_cache::env_config::{self, Config};
use bws_cache::handlers;
use bws_cache::metrics::Metrics;
use bws_cache::pacer::RequestPacer;
use bws_cache::refresh::{RefreshConfig, RefreshWorker};
use bws_cache::registry::Registry;
use bws_cache::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env_config::log_filter())),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    env_config::validate_env()?;
    let config = Arc::new(Config::from_env()?);
    env_config::log_env_config();

    let metrics = Arc::new(Metrics::new());
    let registry = Arc::new(Registry::new(config.auth_state_dir.clone()));
    let pacer = RequestPacer::start(config.request_interval);

    let refresh = RefreshWorker::new(
        registry.clone(),
        RefreshConfig {
            refresh_interval: config.refresh_interval,
            ..RefreshConfig::default()
        },
    );
    tokio::spawn(refresh.run());

    let state = AppState::new(config.clone(), registry, pacer, metrics);
    let app = handlers::router(state);

    // Start server
    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
