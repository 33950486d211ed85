//! Admin API Routes
//!
//! Operator endpoints for the key pool, usage accounting and the model list.

mod credentials;
mod models;
mod rate_limits;
mod usage;

#[cfg(test)]
mod credentials_tests;
#[cfg(test)]
mod models_tests;
#[cfg(test)]
mod usage_tests;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{delete, get, post},
    Router,
};
use serde::Serialize;

use keyrelay_core::StorageBackend;
use keyrelay_types::StreamingMode;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        // Status
        .route("/status", get(get_status))
        // Credentials
        .route("/credentials", get(credentials::list_credentials))
        .route("/credentials/reload", post(credentials::reload_credentials))
        .route("/credentials/:id/unban", post(credentials::unban_credential))
        .route("/credentials/:id/enabled", post(credentials::set_credential_enabled))
        // Rate limits
        .route("/rate-limits", get(rate_limits::get_rate_limits))
        .route("/rate-limits/:id", delete(rate_limits::clear_rate_limit))
        // Usage
        .route("/usage", get(usage::get_usage))
        .route("/usage/record", post(usage::record_usage))
        // Models
        .route("/models", get(models::get_models).put(models::update_models))
        .route("/models/refresh", post(models::refresh_models))
        // API fallback: return 404 for unknown API endpoints
        .fallback(api_not_found)
}

async fn api_not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(serde_json::json!({"error": "Not found"})))
}

#[derive(Serialize)]
struct StatusResponse {
    version: String,
    backend: StorageBackend,
    credentials_total: usize,
    credentials_usable: usize,
    credentials_banned: usize,
    streaming_mode: StreamingMode,
    max_attempts: u32,
}

async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let gateway = state.gateway();
    let credentials = gateway.pool.credentials();
    let banned = credentials.iter().filter(|c| gateway.pool.is_banned(&c.id)).count();
    let usable = credentials
        .iter()
        .filter(|c| gateway.pool.is_enabled(c) && !gateway.pool.is_banned(&c.id))
        .count();
    let streaming_mode = gateway.config.read().await.streaming.mode;

    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: gateway.store.backend(),
        credentials_total: credentials.len(),
        credentials_usable: usable,
        credentials_banned: banned,
        streaming_mode,
        max_attempts: gateway.orchestrator.max_attempts(),
    })
}
