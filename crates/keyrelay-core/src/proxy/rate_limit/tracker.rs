use chrono::Utc;
use reqwest::header::HeaderMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use keyrelay_types::{Credential, RateLimitWindow};
use keyrelay_types::models::WINDOW_SECS;

use super::parser::{parse_retry_after, RateLimitHeaders};
use crate::store::{self, EntityKind, StateStore, StoreResult};

/// What one upstream call told us about a credential's window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Observation {
    /// `None` for transport failures (timeouts)
    pub status: Option<u16>,
    pub headers: RateLimitHeaders,
    pub retry_after_secs: Option<u64>,
}

impl Observation {
    pub fn from_response(status: u16, headers: &HeaderMap, body: Option<&str>) -> Self {
        Self {
            status: Some(status),
            headers: RateLimitHeaders::from_headers(headers),
            retry_after_secs: if status == 429 { parse_retry_after(headers, body) } else { None },
        }
    }

    /// A call that never produced a status.
    pub fn transport_failure() -> Self {
        Self::default()
    }

    pub fn is_throttled(&self) -> bool {
        self.status == Some(429) || self.headers.is_exhausted()
    }
}

/// Longest reset horizon accepted from upstream hints.
pub const MAX_RESET_SECS: i64 = 24 * 60 * 60;

/// Remaining calls and reset countdown for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemainingCapacity {
    pub remaining: u32,
    pub reset_in_secs: i64,
}

/// Take one slot of the window if it has one left.
///
/// An expired or missing window restarts with this call as its first. Returns
/// the next window and whether the slot was granted; a full window comes back
/// unchanged.
pub fn apply_reservation(
    current: Option<RateLimitWindow>,
    capacity: u32,
    now: i64,
) -> (RateLimitWindow, bool) {
    let mut window = current
        .filter(|w| !w.is_expired(now))
        .unwrap_or_else(|| RateLimitWindow::fresh(capacity, now));
    if window.used >= window.limit {
        return (window, false);
    }
    window.used += 1;
    window.updated_at = now;
    (window, true)
}

/// `now + secs`, with `secs` capped at [`MAX_RESET_SECS`].
fn reset_after(now: i64, secs: i64) -> i64 {
    now.saturating_add(secs.clamp(0, MAX_RESET_SECS))
}

/// Fold one observation into the current window.
///
/// The call itself was already counted by [`apply_reservation`]. Upstream
/// headers win when present. Otherwise a 429 fills the window and any other
/// outcome only counts a call when the reserved window has since expired.
pub fn apply_observation(
    current: Option<RateLimitWindow>,
    capacity: u32,
    observation: &Observation,
    now: i64,
) -> RateLimitWindow {
    let live = current.filter(|w| !w.is_expired(now));
    let headers = &observation.headers;

    if headers.is_authoritative() {
        let limit = headers
            .limit
            .or_else(|| live.map(|w| w.limit))
            .unwrap_or(capacity)
            .max(1);
        let used = match headers.remaining {
            Some(remaining) => limit.saturating_sub(remaining),
            None => live.map_or(1, |w| w.used),
        }
        .min(limit);
        let reset_at = match headers.reset_secs {
            Some(secs) if secs > 0 => reset_after(now, secs),
            _ => live.map_or(now + WINDOW_SECS, |w| w.reset_at),
        };
        return RateLimitWindow { limit, used, reset_at, updated_at: now };
    }

    let mut window = match live {
        Some(window) => window,
        None => RateLimitWindow { used: 1, ..RateLimitWindow::fresh(capacity, now) },
    };
    if observation.status == Some(429) {
        window.used = window.limit;
        if let Some(secs) = observation.retry_after_secs.filter(|s| *s > 0) {
            window.reset_at = reset_after(now, i64::try_from(secs).unwrap_or(i64::MAX));
        }
    }
    window.used = window.used.min(window.limit);
    window.updated_at = now;
    window
}

pub struct RateLimitTracker {
    store: Arc<dyn StateStore>,
}

impl RateLimitTracker {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    pub async fn observe(
        &self,
        credential: &Credential,
        observation: &Observation,
    ) -> StoreResult<RateLimitWindow> {
        self.observe_at(credential, observation, Utc::now().timestamp()).await
    }

    pub async fn observe_at(
        &self,
        credential: &Credential,
        observation: &Observation,
        now: i64,
    ) -> StoreResult<RateLimitWindow> {
        let capacity = credential.capacity_per_minute;
        let observation = *observation;
        let window = store::update(
            self.store.as_ref(),
            EntityKind::RateLimit,
            &credential.id,
            move |current: Option<RateLimitWindow>| {
                apply_observation(current, capacity, &observation, now)
            },
        )
        .await?;

        tracing::debug!(
            "Rate limit window for {}: {}/{} (resets in {}s)",
            credential.masked(),
            window.used,
            window.limit,
            window.reset_in(now)
        );
        Ok(window)
    }

    /// Atomically claim one call of `credential`'s window.
    ///
    /// `Ok(None)` when the window is already full.
    pub async fn reserve_at(
        &self,
        credential: &Credential,
        now: i64,
    ) -> StoreResult<Option<RateLimitWindow>> {
        let capacity = credential.capacity_per_minute;
        let granted = AtomicBool::new(false);
        let window = store::update(
            self.store.as_ref(),
            EntityKind::RateLimit,
            &credential.id,
            |current: Option<RateLimitWindow>| {
                let (next, ok) = apply_reservation(current, capacity, now);
                granted.store(ok, Ordering::SeqCst);
                next
            },
        )
        .await?;
        Ok(granted.load(Ordering::SeqCst).then_some(window))
    }

    pub async fn window(&self, credential: &Credential) -> StoreResult<Option<RateLimitWindow>> {
        store::load(self.store.as_ref(), EntityKind::RateLimit, &credential.id).await
    }

    pub async fn is_usable(&self, credential: &Credential, now: i64) -> StoreResult<bool> {
        Ok(self.window(credential).await?.map_or(true, |w| w.is_usable(now)))
    }

    pub async fn remaining(
        &self,
        credential: &Credential,
        now: i64,
    ) -> StoreResult<RemainingCapacity> {
        let capacity = credential.capacity_per_minute;
        Ok(match self.window(credential).await? {
            Some(window) => RemainingCapacity {
                remaining: window.remaining(now, capacity),
                reset_in_secs: window.reset_in(now),
            },
            None => RemainingCapacity { remaining: capacity, reset_in_secs: 0 },
        })
    }

    /// Mark the window expired so the credential is fully available again.
    pub async fn clear(&self, credential: &Credential) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        let window = RateLimitWindow {
            limit: credential.capacity_per_minute,
            used: 0,
            reset_at: now,
            updated_at: now,
        };
        store::save(self.store.as_ref(), EntityKind::RateLimit, &credential.id, &window).await
    }
}
