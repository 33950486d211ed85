//! KeyRelay Server - Headless Daemon
//!
//! A pure Rust HTTP server that:
//! - Serves the OpenAI-compatible gateway on /v1/* (key pool, retry, streaming)
//! - Provides an admin REST API on /api/* (credentials, rate limits, usage, models)
//!
//! Access via: http://localhost:7861

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod cli;
mod router;
mod server_utils;
mod state;

#[cfg(test)]
mod test_helpers;

use cli::{Cli, Commands};
use keyrelay_core::modules::config::default_config_path;
use keyrelay_core::modules::{load_config, validate_config};
use keyrelay_types::models::mask_secret;
use keyrelay_types::GatewayConfig;
use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut config = load_config(Some(&config_path))
        .map_err(|e| anyhow::anyhow!("Failed to load {}: {}", config_path.display(), e))?;
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(host) = cli.host.clone() {
        config.server.host = host;
    }
    validate_config(&config).map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    match cli.command {
        Some(Commands::CheckConfig { json }) => check_config(&config, &config_path, json),
        Some(Commands::Serve) | None => serve(config, config_path).await,
    }
}

async fn serve(config: GatewayConfig, config_path: PathBuf) -> Result<()> {
    info!("🚀 KeyRelay starting on {}...", config.server.socket_addr());

    let listener = server_utils::create_listener(&config.server).await?;
    let port = config.server.port;
    let state = AppState::bootstrap(config, config_path).await?;

    info!("✅ Application state initialized");
    info!("🗄️ State backend: {}", state.gateway().store.backend());
    info!("🔑 {} upstream credentials loaded", state.gateway().pool.len());

    let app = router::build_router(state);

    info!("🔀 Gateway endpoints at http://localhost:{}/v1/", port);
    info!("🔌 Admin API available at http://localhost:{}/api/", port);

    axum::serve(listener, app).with_graceful_shutdown(server_utils::shutdown_signal()).await?;

    info!("👋 Server stopped");
    Ok(())
}

#[allow(clippy::print_stdout, reason = "CLI output")]
fn check_config(config: &GatewayConfig, path: &std::path::Path, json: bool) -> Result<()> {
    let mut redacted = config.clone();
    redacted.server.api_key = mask_secret(&redacted.server.api_key);
    redacted.server.admin_key = redacted.server.admin_key.as_deref().map(mask_secret);
    for credential in &mut redacted.credentials {
        credential.key = mask_secret(&credential.key);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&redacted)?);
        return Ok(());
    }

    println!("Config file:     {}", path.display());
    println!("Listen:          {}", redacted.server.socket_addr());
    println!("Upstream:        {}", redacted.upstream.endpoint);
    println!("Credentials:     {}", config.resolved_credentials().len());
    for credential in &redacted.credentials {
        println!("  - {} {}", credential.key, credential.label.as_deref().unwrap_or(""));
    }
    println!("Models:          {}", redacted.upstream.models.join(", "));
    println!("Streaming:       {}", redacted.streaming.mode);
    println!(
        "Retry:           {} ({} attempts, {} ms)",
        if redacted.retry.enabled { "on" } else { "off" },
        redacted.retry.max_attempts,
        redacted.retry.interval_ms
    );
    println!("Auto-ban:        {}", redacted.ban.auto_ban);
    Ok(())
}
