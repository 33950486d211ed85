//! Per-credential rate-limit tracking.
//!
//! Windows live in the state store under `ratelimit:{credential_id}` and are
//! only ever mutated through `compare_and_update`, so concurrent requests (and
//! other gateway processes on the same backend) never double-count.

mod parser;
mod tracker;


pub use parser::{
    parse_retry_after, parse_retry_time_from_body, RateLimitHeaders, LIMIT_HEADER,
    REMAINING_HEADER, RESET_HEADER,
};
pub use tracker::{
    apply_observation, apply_reservation, Observation, RateLimitTracker, RemainingCapacity,
    MAX_RESET_SECS,
};
