//! Per-credential rate-limit window.

use serde::{Deserialize, Serialize};

/// Window length used when upstream does not report a reset time.
pub const WINDOW_SECS: i64 = 60;

/// `(limit, used, reset_at)` triple describing a credential's throttling state.
///
/// Timestamps are unix seconds. Once `now >= reset_at` the window is expired and
/// the credential counts as fully available until the next observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub limit: u32,
    pub used: u32,
    pub reset_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl RateLimitWindow {
    /// Empty window starting at `now`.
    pub fn fresh(limit: u32, now: i64) -> Self {
        Self { limit: limit.max(1), used: 0, reset_at: now + WINDOW_SECS, updated_at: now }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        now >= self.reset_at
    }

    pub fn is_usable(&self, now: i64) -> bool {
        self.is_expired(now) || self.used < self.limit
    }

    /// Calls left in the window, clamped to `capacity`.
    pub fn remaining(&self, now: i64, capacity: u32) -> u32 {
        if self.is_expired(now) {
            return capacity;
        }
        self.limit.saturating_sub(self.used).min(capacity)
    }

    /// `used / limit`; an expired window counts as empty.
    pub fn usage_ratio(&self, now: i64) -> f64 {
        if self.is_expired(now) || self.limit == 0 {
            return 0.0;
        }
        f64::from(self.used) / f64::from(self.limit)
    }

    /// Seconds until reset, zero once expired.
    pub fn reset_in(&self, now: i64) -> i64 {
        (self.reset_at - now).max(0)
    }
}

/// Per-credential view for the admin dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub id: String,
    pub masked_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub limit: u32,
    pub used: u32,
    pub remaining: u32,
    /// `None` until the first observation
    pub reset_at: Option<i64>,
    pub reset_in_secs: i64,
    pub banned: bool,
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expired_window_is_usable() {
        let window = RateLimitWindow { limit: 30, used: 30, reset_at: 100, updated_at: 40 };
        assert!(!window.is_usable(99));
        assert!(window.is_usable(100));
        assert_eq!(window.remaining(99, 30), 0);
        assert_eq!(window.remaining(100, 30), 30);
    }

    #[test]
    fn test_remaining_clamped_to_capacity() {
        let window = RateLimitWindow { limit: 100, used: 10, reset_at: 1_000, updated_at: 0 };
        assert_eq!(window.remaining(0, 60), 60);
        assert_eq!(window.reset_in(990), 10);
        assert_eq!(window.reset_in(2_000), 0);
    }

    #[test]
    fn test_usage_ratio() {
        let window = RateLimitWindow { limit: 30, used: 15, reset_at: 60, updated_at: 0 };
        assert!((window.usage_ratio(0) - 0.5).abs() < f64::EPSILON);
        assert!(window.usage_ratio(60).abs() < f64::EPSILON);
    }
}
