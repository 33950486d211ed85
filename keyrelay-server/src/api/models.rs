//! Enabled model list handlers

use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Deserialize)]
pub struct UpdateModelsRequest {
    pub models: Vec<String>,
}

pub async fn get_models(State(state): State<AppState>) -> Json<ModelsResponse> {
    let models = state.gateway().config.read().await.upstream.models.clone();
    Json(ModelsResponse { models })
}

/// Replace the list served on `/v1/models`.
pub async fn update_models(
    State(state): State<AppState>,
    Json(payload): Json<UpdateModelsRequest>,
) -> Result<Json<ModelsResponse>, (StatusCode, String)> {
    let models = normalize_models(payload.models);
    if models.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "model list must not be empty".to_string()));
    }
    store_models(&state, models).await.map(Json)
}

/// Pull the list from the upstream models endpoint with the first usable key.
pub async fn refresh_models(
    State(state): State<AppState>,
) -> Result<Json<ModelsResponse>, (StatusCode, String)> {
    let gateway = state.gateway();
    let credential = gateway
        .pool
        .credentials()
        .into_iter()
        .find(|c| gateway.pool.is_enabled(c) && !gateway.pool.is_banned(&c.id))
        .ok_or_else(|| (StatusCode::CONFLICT, "no usable credential configured".to_string()))?;

    let fetched = gateway.transport.fetch_models(&credential.secret).await.map_err(|e| {
        tracing::warn!("Model refresh with {} failed: {}", credential.masked(), e);
        (StatusCode::BAD_GATEWAY, e.to_string())
    })?;

    let models = normalize_models(fetched);
    if models.is_empty() {
        return Err((StatusCode::BAD_GATEWAY, "upstream returned no models".to_string()));
    }
    tracing::info!("Refreshed model list: {} models", models.len());
    store_models(&state, models).await.map(Json)
}

async fn store_models(
    state: &AppState,
    models: Vec<String>,
) -> Result<ModelsResponse, (StatusCode, String)> {
    let _edit = state.lock_admin_edits().await;
    state.gateway().config.write().await.upstream.models.clone_from(&models);
    state.persist_config().await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    Ok(ModelsResponse { models })
}

/// Trimmed, non-empty, first occurrence wins.
fn normalize_models(models: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    models
        .into_iter()
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty() && seen.insert(m.clone()))
        .collect()
}
