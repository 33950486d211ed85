//! Usage accounting models.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Usage day boundary.
pub const USAGE_RESET_HOUR_UTC: i64 = 7;

/// Usage day a timestamp belongs to. Days start at 07:00 UTC.
pub fn usage_day(now: DateTime<Utc>) -> NaiveDate {
    (now - Duration::hours(USAGE_RESET_HOUR_UTC)).date_naive()
}

/// Start of the next usage day.
pub fn next_usage_reset(now: DateTime<Utc>) -> DateTime<Utc> {
    let next_day = usage_day(now) + Duration::days(1);
    next_day.and_time(chrono::NaiveTime::MIN).and_utc() + Duration::hours(USAGE_RESET_HOUR_UTC)
}

/// Calls per usage day and model. Reporting only, never used for admission.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub date: String,
    pub model: String,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub last_call_at: Option<i64>,
}

impl UsageRecord {
    pub fn total_calls(&self) -> u64 {
        self.success_count + self.failure_count
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCounts {
    pub ok: u64,
    pub fail: u64,
}

/// Lifetime call statistics of one credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyStats {
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub model_counts: BTreeMap<String, ModelCounts>,
    #[serde(default)]
    pub last_call_at: Option<i64>,
    #[serde(default)]
    pub last_status: Option<u16>,
}

impl KeyStats {
    pub fn record(&mut self, model: &str, success: bool, status: Option<u16>, now: i64) {
        let counts = self.model_counts.entry(model.to_string()).or_default();
        if success {
            self.success_count += 1;
            counts.ok += 1;
        } else {
            self.failure_count += 1;
            counts.fail += 1;
        }
        self.last_call_at = Some(now);
        self.last_status = status;
    }
}
