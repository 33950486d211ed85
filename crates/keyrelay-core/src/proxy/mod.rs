//! Proxy module - OpenAI-compatible gateway
//!
//! - Credential pool with per-key rate-limit windows
//! - Retry and failover across keys
//! - OpenAI protocol mapping, SSE relay and fake streaming

pub mod handlers;
pub mod key_pool;
pub mod mappers;
pub mod middleware;
pub mod rate_limit;
pub mod retry;
pub mod server;
pub mod upstream;

#[cfg(test)]
mod tests;

pub use key_pool::{KeyPool, ReloadSummary};
pub use rate_limit::RateLimitTracker;
pub use retry::{RequestContext, RetryOrchestrator};
pub use server::{build_proxy_router, AppState};
pub use upstream::{UpstreamClient, UpstreamTransport};
