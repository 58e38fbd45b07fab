//! Relay Gateway - Main entry point.

use anyhow::Result;
use relay_common::config::Config;
use relay_common::logging::init_logging_with_exclusions;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration, environment overrides included
    let config = Config::load_and_validate()?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    tracing::info!("Chat relay v{}", env!("CARGO_PKG_VERSION"));

    if config.api_key().is_none() {
        tracing::warn!("OPENAI_API_KEY is not set; the completion API may reject requests");
    }
    tracing::info!(
        upstream = %config.upstream.base_url,
        model = %config.upstream.model,
        backend = ?config.storage.backend,
        chats_dir = %config.storage.chats_dir().display(),
        "Relay configured"
    );

    relay_gateway::start_server(&config).await
}
