//! Credential pool: the configured keys, their ban state and selection.

mod selection;


pub use selection::{Candidate, KeySelector};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use keyrelay_types::{
    BanConfig, Credential, GatewayError, KeyState, RateLimitSnapshot, RateLimitWindow,
    RotationConfig,
};

use crate::proxy::rate_limit::{Observation, RateLimitTracker};
use crate::store::{self, EntityKind, StateStore};

/// Outcome of a credential reload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReloadSummary {
    pub total: usize,
    pub added: usize,
    pub removed: usize,
    pub unbanned: usize,
}

pub struct KeyPool {
    credentials: RwLock<Vec<Credential>>,
    states: DashMap<String, KeyState>,
    store: Arc<dyn StateStore>,
    tracker: Arc<RateLimitTracker>,
    selector: KeySelector,
    ban: BanConfig,
}

impl KeyPool {
    pub fn new(
        credentials: Vec<Credential>,
        store: Arc<dyn StateStore>,
        rotation: RotationConfig,
        ban: BanConfig,
    ) -> Self {
        Self {
            credentials: RwLock::new(credentials),
            states: DashMap::new(),
            tracker: Arc::new(RateLimitTracker::new(Arc::clone(&store))),
            store,
            selector: KeySelector::new(rotation),
            ban,
        }
    }

    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    pub fn ban_config(&self) -> &BanConfig {
        &self.ban
    }

    pub fn credentials(&self) -> Vec<Credential> {
        self.credentials.read().clone()
    }

    pub fn len(&self) -> usize {
        self.credentials.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.read().is_empty()
    }

    pub fn get(&self, id: &str) -> Option<Credential> {
        self.credentials.read().iter().find(|c| c.id == id).cloned()
    }

    pub fn state_of(&self, id: &str) -> KeyState {
        self.states.get(id).map(|s| s.value().clone()).unwrap_or_default()
    }

    pub fn is_banned(&self, id: &str) -> bool {
        self.states.get(id).is_some_and(|s| s.banned)
    }

    /// Configured as enabled and not disabled by an admin.
    pub fn is_enabled(&self, credential: &Credential) -> bool {
        credential.enabled && !self.states.get(&credential.id).is_some_and(|s| s.disabled)
    }

    /// Load persisted ban/disable state for every configured credential.
    ///
    /// Returns how many credentials came back banned.
    pub async fn restore_state(&self) -> usize {
        let mut banned = 0;
        for credential in self.credentials() {
            match store::load::<KeyState>(self.store.as_ref(), EntityKind::KeyState, &credential.id)
                .await
            {
                Ok(Some(state)) => {
                    if state.banned {
                        banned += 1;
                        tracing::info!(
                            "Restored ban for {}: {}",
                            credential.masked(),
                            state.ban_reason.as_deref().unwrap_or("no reason")
                        );
                    }
                    self.states.insert(credential.id.clone(), state);
                },
                Ok(None) => {},
                Err(e) => {
                    tracing::warn!("Failed to restore state for {}: {}", credential.masked(), e);
                },
            }
        }
        banned
    }

    pub async fn select(&self, excluding: &HashSet<String>) -> Result<Credential, GatewayError> {
        self.select_at(excluding, Utc::now().timestamp()).await
    }

    /// Pick the least-loaded usable credential not in `excluding` and reserve
    /// one call of its window.
    ///
    /// The reservation goes through `compare_and_update`, so two concurrent
    /// selections can never both take the last slot of a key. A candidate that
    /// filled up since its window was read is dropped and the pick repeats.
    /// Store failures fail the selection instead of guessing.
    pub async fn select_at(
        &self,
        excluding: &HashSet<String>,
        now: i64,
    ) -> Result<Credential, GatewayError> {
        let eligible: Vec<Credential> = self
            .credentials()
            .into_iter()
            .filter(|c| !excluding.contains(&c.id) && !self.is_banned(&c.id) && self.is_enabled(c))
            .collect();

        let mut usable = Vec::with_capacity(eligible.len());
        for credential in eligible {
            let window = self.tracker.window(&credential).await?;
            if window.is_some_and(|w| !w.is_usable(now)) {
                continue;
            }
            let ratio = window.map_or(0.0, |w| w.usage_ratio(now));
            usable.push((credential, ratio));
        }

        loop {
            let candidates: Vec<Candidate<'_>> = usable
                .iter()
                .map(|(credential, ratio)| Candidate { credential, ratio: *ratio })
                .collect();
            let Some(index) = self.selector.pick(&candidates) else {
                return Err(GatewayError::NoUsableKey { tried: excluding.len() });
            };
            let ratio = candidates[index].ratio;
            let remaining = candidates.len();
            drop(candidates);

            let (credential, _) = usable.swap_remove(index);
            match self.tracker.reserve_at(&credential, now).await? {
                Some(window) => {
                    tracing::debug!(
                        "Selected {} (ratio {:.2}, {} candidates, {}/{} used)",
                        credential.masked(),
                        ratio,
                        remaining,
                        window.used,
                        window.limit
                    );
                    return Ok(credential);
                },
                None => {
                    tracing::debug!("{} filled up during selection", credential.masked());
                },
            }
        }
    }

    /// Fold an upstream outcome into the credential's window. Best effort.
    pub async fn observe(
        &self,
        credential: &Credential,
        observation: &Observation,
    ) -> Option<RateLimitWindow> {
        match self.tracker.observe(credential, observation).await {
            Ok(window) => Some(window),
            Err(e) => {
                tracing::warn!("Failed to record rate limit for {}: {}", credential.masked(), e);
                None
            },
        }
    }

    /// Ban `credential` if auto-ban is on and `status` is ban-listed.
    pub async fn maybe_ban(&self, credential: &Credential, status: u16) -> bool {
        if !self.ban.auto_ban || !self.ban.is_ban_status(status) {
            return false;
        }
        self.ban(credential, format!("upstream returned {}", status)).await;
        true
    }

    pub async fn ban(&self, credential: &Credential, reason: String) {
        let now = Utc::now().timestamp();
        tracing::warn!("Banning credential {}: {}", credential.masked(), reason);
        let state = self
            .persist_state(&credential.id, move |state| {
                state.banned = true;
                state.ban_reason = Some(reason.clone());
                state.banned_at = Some(now);
            })
            .await;
        self.states.insert(credential.id.clone(), state);
    }

    /// Returns `false` for an unknown id.
    pub async fn unban(&self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        let state = self.persist_state(id, clear_ban).await;
        self.states.insert(id.to_string(), state);
        tracing::info!("Credential {} unbanned", id);
        true
    }

    /// Returns `false` for an unknown id.
    pub async fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        let state = self.persist_state(id, move |state| state.disabled = !enabled).await;
        self.states.insert(id.to_string(), state);
        true
    }

    /// Replace the credential list. Listed keys lose any ban.
    pub async fn reload_credentials(&self, credentials: Vec<Credential>) -> ReloadSummary {
        let new_ids: HashSet<String> = credentials.iter().map(|c| c.id.clone()).collect();
        let old_ids: HashSet<String> = self.credentials().into_iter().map(|c| c.id).collect();

        let mut summary = ReloadSummary {
            total: credentials.len(),
            added: new_ids.difference(&old_ids).count(),
            removed: old_ids.difference(&new_ids).count(),
            unbanned: 0,
        };

        for credential in &credentials {
            let stored = store::load::<KeyState>(
                self.store.as_ref(),
                EntityKind::KeyState,
                &credential.id,
            )
            .await
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to read state for {}: {}", credential.masked(), e);
                None
            });
            let was_banned = self.is_banned(&credential.id) || stored.as_ref().is_some_and(|s| s.banned);
            let state = if was_banned {
                summary.unbanned += 1;
                self.persist_state(&credential.id, clear_ban).await
            } else {
                stored.unwrap_or_default()
            };
            self.states.insert(credential.id.clone(), state);
        }
        self.states.retain(|id, _| new_ids.contains(id));

        *self.credentials.write() = credentials;
        self.selector.reset();

        tracing::info!(
            "Reloaded credentials: {} total, {} added, {} removed, {} unbanned",
            summary.total,
            summary.added,
            summary.removed,
            summary.unbanned
        );
        summary
    }

    /// Reset the window of one credential. Returns `Ok(false)` for an unknown id.
    pub async fn clear_rate_limit(&self, id: &str) -> Result<bool, GatewayError> {
        let Some(credential) = self.get(id) else {
            return Ok(false);
        };
        self.tracker.clear(&credential).await?;
        Ok(true)
    }

    pub async fn snapshot(&self) -> Vec<RateLimitSnapshot> {
        self.snapshot_at(Utc::now().timestamp()).await
    }

    /// Per-credential view, banned keys included.
    pub async fn snapshot_at(&self, now: i64) -> Vec<RateLimitSnapshot> {
        let mut snapshots = Vec::new();
        for credential in self.credentials() {
            let window = self.tracker.window(&credential).await.unwrap_or_else(|e| {
                tracing::warn!("Failed to read window for {}: {}", credential.masked(), e);
                None
            });
            let capacity = credential.capacity_per_minute;
            let live = window.filter(|w| !w.is_expired(now));
            snapshots.push(RateLimitSnapshot {
                id: credential.id.clone(),
                masked_key: credential.masked(),
                label: credential.label.clone(),
                limit: live.map_or(capacity, |w| w.limit),
                used: live.map_or(0, |w| w.used),
                remaining: window.map_or(capacity, |w| w.remaining(now, capacity)),
                reset_at: window.map(|w| w.reset_at),
                reset_in_secs: window.map_or(0, |w| w.reset_in(now)),
                banned: self.is_banned(&credential.id),
                enabled: self.is_enabled(&credential),
            });
        }
        snapshots
    }

    /// Merge into the stored state; falls back to the local copy if the store is down.
    async fn persist_state<F>(&self, id: &str, edit: F) -> KeyState
    where
        F: Fn(&mut KeyState) + Send + Sync,
    {
        let result = store::update(
            self.store.as_ref(),
            EntityKind::KeyState,
            id,
            |current: Option<KeyState>| {
                let mut state = current.unwrap_or_default();
                edit(&mut state);
                state
            },
        )
        .await;
        match result {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!("Failed to persist state for {}: {}", id, e);
                let mut state = self.state_of(id);
                edit(&mut state);
                state
            },
        }
    }
}

fn clear_ban(state: &mut KeyState) {
    state.banned = false;
    state.ban_reason = None;
    state.banned_at = None;
}
