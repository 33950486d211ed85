//! # KeyRelay Core
//!
//! Gateway logic for KeyRelay.
//!
//! ## Architecture
//!
//! ```text
//! keyrelay-core/src/
//! ├── store/            # StateStore trait, Redis/Postgres/Mongo/file/memory backends
//! ├── modules/          # config loading, usage accounting
//! └── proxy/
//!     ├── rate_limit/   # per-key windows from upstream headers
//!     ├── key_pool/     # selection, rotation, bans
//!     ├── retry/        # per-request failover state machine
//!     ├── upstream/     # HTTP transport to the aggregation endpoint
//!     ├── mappers/      # OpenAI request/response, SSE relay, fake streaming
//!     ├── handlers/     # /v1/models, /v1/chat/completions
//!     ├── middleware/   # API key auth
//!     └── server.rs     # AppState and router
//! ```

#![allow(
    clippy::significant_drop_tightening,
    reason = "RwLock guards in async code require careful lifetime management"
)]
#![allow(clippy::map_err_ignore, reason = "Error context is provided in the replacement message")]
#![allow(
    clippy::redundant_else,
    reason = "Explicit else blocks improve readability in complex control flow"
)]
#![allow(
    clippy::derive_partial_eq_without_eq,
    reason = "Some types intentionally don't implement Eq"
)]
// Test-only lints: allow panic!, println!, etc. in test code
#![cfg_attr(
    test,
    allow(
        clippy::panic,
        clippy::print_stdout,
        clippy::float_cmp,
        clippy::unwrap_used,
        clippy::needless_collect,
        clippy::assertions_on_result_states
    )
)]

pub mod error;
pub mod modules;
pub mod proxy;
pub mod store;

// Re-export commonly used types
pub use error::{AppError, AppResult};
pub use modules::{load_config, UsageRecorder};
pub use proxy::{build_proxy_router, AppState};
pub use store::{StateStore, StorageBackend};
