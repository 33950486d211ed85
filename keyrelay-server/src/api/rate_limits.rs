//! Rate-limit window handlers

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};

use keyrelay_types::RateLimitSnapshot;

use crate::state::AppState;

/// Every credential's current window, banned and disabled keys included.
pub async fn get_rate_limits(State(state): State<AppState>) -> Json<Vec<RateLimitSnapshot>> {
    Json(state.gateway().pool.snapshot().await)
}

pub async fn clear_rate_limit(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    match state.gateway().pool.clear_rate_limit(&id).await {
        Ok(true) => StatusCode::OK,
        Ok(false) => StatusCode::NOT_FOUND,
        Err(e) => {
            tracing::warn!("Failed to clear rate limit for {}: {}", id, e);
            StatusCode::SERVICE_UNAVAILABLE
        },
    }
}
