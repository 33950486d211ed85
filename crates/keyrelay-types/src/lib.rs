//! # KeyRelay Types
//!
//! Core types, models, and error definitions for KeyRelay.
//!
//! - **`error`** - Typed error hierarchy for the gateway and configuration
//! - **`models`** - Domain models (Credential, RateLimitWindow, UsageRecord, Config)
//! - **`protocol`** - OpenAI chat-completion wire types
//!
//! ## Architecture Role
//!
//! ```text
//!        keyrelay-types (this crate)
//!                │
//!                ▼
//!          keyrelay-core
//!                │
//!                ▼
//!         keyrelay-server
//! ```

pub mod error;
pub mod models;
pub mod protocol;

pub use error::{ConfigError, GatewayError, Result};

pub use models::{
    AggregationMode, BanConfig, Credential, CredentialConfig, GatewayConfig, KeyState, KeyStats,
    MaxTokensMode, RateLimitSnapshot, RateLimitWindow, RetryConfig, RotationConfig, ServerConfig,
    StorageConfig, StreamingConfig, StreamingMode, UpstreamConfig, UsageRecord,
};
