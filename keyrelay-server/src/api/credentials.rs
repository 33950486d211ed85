//! Credential administration handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use keyrelay_core::proxy::ReloadSummary;
use keyrelay_types::{CredentialConfig, KeyStats};

use crate::state::AppState;

#[derive(Serialize)]
pub struct CredentialView {
    pub id: String,
    pub masked_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub capacity_per_minute: u32,
    pub enabled: bool,
    pub banned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ban_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<KeyStats>,
}

pub async fn list_credentials(State(state): State<AppState>) -> Json<Vec<CredentialView>> {
    let gateway = state.gateway();
    let mut views = Vec::new();
    for credential in gateway.pool.credentials() {
        let key_state = gateway.pool.state_of(&credential.id);
        let stats = gateway.usage.key_stats(&credential.id).await.unwrap_or_else(|e| {
            tracing::warn!("Failed to read stats for {}: {}", credential.masked(), e);
            None
        });
        views.push(CredentialView {
            enabled: gateway.pool.is_enabled(&credential),
            masked_key: credential.masked(),
            id: credential.id,
            label: credential.label,
            capacity_per_minute: credential.capacity_per_minute,
            banned: key_state.banned,
            ban_reason: key_state.ban_reason,
            banned_at: key_state.banned_at,
            stats,
        });
    }
    Json(views)
}

#[derive(Deserialize)]
pub struct ReloadCredentialsRequest {
    /// Bare key strings or `{key, label, capacity_per_minute, enabled}` objects
    pub credentials: Vec<CredentialConfig>,
    /// Write the new list back to the config file
    #[serde(default = "default_persist")]
    pub persist: bool,
}

fn default_persist() -> bool {
    true
}

/// Replace the credential list. Every listed key starts unbanned.
pub async fn reload_credentials(
    State(state): State<AppState>,
    Json(payload): Json<ReloadCredentialsRequest>,
) -> Result<Json<ReloadSummary>, (StatusCode, String)> {
    if payload.credentials.iter().any(|c| c.key.trim().is_empty()) {
        return Err((StatusCode::BAD_REQUEST, "credential keys must not be empty".to_string()));
    }

    let _edit = state.lock_admin_edits().await;
    let resolved = {
        let mut config = state.gateway().config.write().await;
        config.credentials = payload.credentials;
        config.resolved_credentials()
    };
    let summary = state.gateway().pool.reload_credentials(resolved).await;

    if payload.persist {
        state.persist_config().await.map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e))?;
    }
    Ok(Json(summary))
}

pub async fn unban_credential(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<bool>, StatusCode> {
    if state.gateway().pool.unban(&id).await {
        Ok(Json(true))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}

#[derive(Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

pub async fn set_credential_enabled(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<SetEnabledRequest>,
) -> Result<Json<bool>, StatusCode> {
    if state.gateway().pool.set_enabled(&id, payload.enabled).await {
        tracing::info!("Credential {} enabled={}", id, payload.enabled);
        Ok(Json(payload.enabled))
    } else {
        Err(StatusCode::NOT_FOUND)
    }
}
