//! Core domain models for KeyRelay.

mod config;
mod credential;
mod rate_limit;
mod usage;

pub use config::{
    AggregationMode, BanConfig, CredentialConfig, GatewayConfig, MaxTokensMode, RetryConfig,
    RotationConfig, ServerConfig, StorageConfig, StreamingConfig, StreamingMode, UpstreamConfig,
    DEFAULT_CAPACITY_PER_MINUTE, DEFAULT_MODELS,
};
pub use credential::{credential_id, mask_secret, Credential, KeyState};
pub use rate_limit::{RateLimitSnapshot, RateLimitWindow, WINDOW_SECS};
pub use usage::{next_usage_reset, usage_day, KeyStats, ModelCounts, UsageRecord, USAGE_RESET_HOUR_UTC};
