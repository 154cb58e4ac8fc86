pub mod agent;
pub mod api;
pub mod bridge;
pub mod config;
pub mod error;
pub mod state;

use agent::llm::{test_provider, LLMClient};
use error::{AppError, Result};
use state::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber, filtered by RUST_LOG (default `info`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn load_validated_config() -> Result<config::AppConfig> {
    // Never overwrite an existing file on failure
    let config = match config::load_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(
                "Failed to load config: {}. Using in-memory defaults (not saving).",
                e
            );
            config::AppConfig::default()
        }
    };
    config::validate_config(&config)?;
    Ok(config)
}

/// Serve the bridge API until interrupted
pub async fn run() -> Result<()> {
    let config = load_validated_config()?;
    if !config.api.enabled {
        return Err(AppError::Config(
            "api.enabled is false; there is nothing to serve".to_string(),
        ));
    }
    if config.ai.default_llm.is_none() {
        tracing::warn!("No default LLM configured; queries will fail until ai.default_llm is set");
    }

    let state = Arc::new(AppState::new(&config));
    let result = api::run_server(
        Arc::clone(&state),
        config.api.port,
        config.api.api_key.clone(),
    )
    .await;

    tracing::info!("Closing browser...");
    state.shutdown().await;
    result
}

/// Probe the default LLM provider once and report the outcome
pub async fn check() -> Result<()> {
    let config = load_validated_config()?;
    let client = LLMClient::new(config.ai.clone());
    let timeout = Duration::from_secs(config.ai.request_timeout_seconds);

    let response = test_provider(&client, timeout)
        .await
        .map_err(|e| AppError::Config(format!("Provider check failed: {}", e)))?;
    tracing::info!(
        "Provider check passed: model {} replied {:?} ({} tokens)",
        response.model,
        response.content.trim(),
        response.usage.total_tokens
    );
    Ok(())
}
