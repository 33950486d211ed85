use parking_lot::Mutex;
use rand::Rng;

use keyrelay_types::{AggregationMode, Credential, RotationConfig};

const RATIO_EPSILON: f64 = 1e-9;

/// A credential that already passed the usability filter, with its current
/// `used / limit` ratio.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub credential: &'a Credential,
    pub ratio: f64,
}

#[derive(Debug, Default)]
struct RotationState {
    counter: usize,
    pinned: Option<String>,
    pinned_calls: u32,
}

/// Least-loaded selection with forced rotation and a tie-break counter.
///
/// Holds only in-memory bookkeeping; the lock is never held across an await.
pub struct KeySelector {
    config: RotationConfig,
    state: Mutex<RotationState>,
}

impl KeySelector {
    pub fn new(config: RotationConfig) -> Self {
        Self { config, state: Mutex::new(RotationState::default()) }
    }

    /// Pick one of `candidates`, returning its index.
    pub fn pick(&self, candidates: &[Candidate<'_>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let mut state = self.state.lock();

        // Drop the pinned key for one round once it has served its quota.
        let rotate_out = match state.pinned.as_deref() {
            Some(pinned)
                if candidates.len() > 1
                    && state.pinned_calls >= self.config.calls_per_rotation.max(1) =>
            {
                Some(pinned.to_string())
            },
            _ => None,
        };

        let pool: Vec<usize> = (0..candidates.len())
            .filter(|&i| rotate_out.as_deref() != Some(candidates[i].credential.id.as_str()))
            .collect();
        let pool = if pool.is_empty() { (0..candidates.len()).collect() } else { pool };

        let best = pool
            .iter()
            .map(|&i| candidates[i].ratio)
            .fold(f64::INFINITY, f64::min);
        let ties: Vec<usize> = pool
            .into_iter()
            .filter(|&i| candidates[i].ratio - best <= RATIO_EPSILON)
            .collect();

        let chosen = match self.config.mode {
            AggregationMode::RoundRobin => {
                let slot = state.counter % ties.len();
                state.counter = state.counter.wrapping_add(1);
                ties[slot]
            },
            AggregationMode::Random => ties[rand::thread_rng().gen_range(0..ties.len())],
        };

        let chosen_id = &candidates[chosen].credential.id;
        if state.pinned.as_deref() == Some(chosen_id.as_str()) {
            state.pinned_calls = state.pinned_calls.saturating_add(1);
        } else {
            state.pinned = Some(chosen_id.clone());
            state.pinned_calls = 1;
        }

        Some(chosen)
    }

    /// Forget the pin, e.g. after the credential list changed.
    pub fn reset(&self) {
        *self.state.lock() = RotationState::default();
    }
}
