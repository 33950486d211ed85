//! Test helpers for keyrelay-server unit tests.

use std::sync::Arc;

use tempfile::TempDir;

use keyrelay_core::proxy::upstream::build_http_client;
use keyrelay_core::proxy::{UpstreamClient, UpstreamTransport};
use keyrelay_core::store::{MemoryStore, StateStore};
use keyrelay_core::AppState as GatewayState;
use keyrelay_types::{CredentialConfig, GatewayConfig};

use crate::state::AppState;

pub const TEST_KEYS: &[&str] = &["sk-test-aaaa-0001", "sk-test-bbbb-0002"];

/// Config with [`TEST_KEYS`] pointed at `upstream_base` (any URL works when
/// the test never reaches upstream).
pub fn test_config(upstream_base: &str) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.upstream.endpoint = format!("{}/v1/chat/completions", upstream_base);
    config.credentials = TEST_KEYS.iter().map(|k| CredentialConfig::new(*k)).collect();
    config.retry.interval_ms = 10;
    config
}

/// Create an `AppState` over an in-memory store.
///
/// Returns `(AppState, TempDir)` — keep `TempDir` alive for the test duration;
/// the config file is saved inside it.
pub fn test_app_state_with(config: GatewayConfig) -> (AppState, TempDir) {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
    let transport: Arc<dyn UpstreamTransport> = Arc::new(UpstreamClient::new(
        build_http_client(5, None).expect("failed to build HTTP client"),
        &config.upstream,
    ));
    let gateway = GatewayState::new(config, store, transport);
    let state = AppState::new(gateway, temp_dir.path().join("config.json"));
    (state, temp_dir)
}

pub fn test_app_state() -> (AppState, TempDir) {
    test_app_state_with(test_config("http://127.0.0.1:9"))
}
