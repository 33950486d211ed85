//! Usage accounting handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use keyrelay_types::models::{next_usage_reset, usage_day};
use keyrelay_types::protocol::Usage;
use keyrelay_types::UsageRecord;

use crate::state::AppState;

#[derive(Deserialize)]
pub struct UsageQuery {
    /// `YYYY-MM-DD`, defaults to the current usage day
    pub date: Option<String>,
}

#[derive(Serialize)]
pub struct UsageReport {
    pub date: String,
    pub records: Vec<UsageRecord>,
    pub total_success: u64,
    pub total_failure: u64,
    /// Unix seconds of the next 07:00 UTC boundary
    pub next_reset_at: i64,
}

pub async fn get_usage(
    State(state): State<AppState>,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageReport>, (StatusCode, String)> {
    let now = Utc::now();
    let day = match query.date.as_deref().filter(|d| !d.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .map_err(|_| (StatusCode::BAD_REQUEST, format!("invalid date '{}'", raw)))?,
        None => usage_day(now),
    };

    let records = state
        .gateway()
        .usage
        .usage_for_day(day)
        .await
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;

    Ok(Json(UsageReport {
        date: day.to_string(),
        total_success: records.iter().map(|r| r.success_count).sum(),
        total_failure: records.iter().map(|r| r.failure_count).sum(),
        records,
        next_reset_at: next_usage_reset(now).timestamp(),
    }))
}

#[derive(Deserialize)]
pub struct RecordUsageRequest {
    pub model: String,
    pub success: bool,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

/// Count one call against today's record for `model`.
pub async fn record_usage(
    State(state): State<AppState>,
    Json(payload): Json<RecordUsageRequest>,
) -> Result<Json<UsageRecord>, (StatusCode, String)> {
    let model = payload.model.trim();
    if model.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "model is required".to_string()));
    }
    let usage = Usage {
        prompt_tokens: payload.prompt_tokens,
        completion_tokens: payload.completion_tokens,
        total_tokens: payload.prompt_tokens + payload.completion_tokens,
    };

    state
        .gateway()
        .usage
        .record_usage_at(model, payload.success, Some(&usage), Utc::now())
        .await
        .map(Json)
        .map_err(|e| (StatusCode::SERVICE_UNAVAILABLE, e.to_string()))
}
