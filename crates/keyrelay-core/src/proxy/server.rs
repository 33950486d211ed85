use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;

use keyrelay_types::GatewayConfig;

use crate::error::AppResult;
use crate::modules::usage::UsageRecorder;
use crate::proxy::key_pool::KeyPool;
use crate::proxy::retry::RetryOrchestrator;
use crate::proxy::upstream::{build_http_client, UpstreamClient, UpstreamTransport};
use crate::store::{self, StateStore};

/// Shared handler state. Every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Live configuration; admin endpoints edit the model list and keys here
    pub config: Arc<RwLock<GatewayConfig>>,
    pub store: Arc<dyn StateStore>,
    pub pool: Arc<KeyPool>,
    pub usage: Arc<UsageRecorder>,
    pub transport: Arc<dyn UpstreamTransport>,
    pub orchestrator: Arc<RetryOrchestrator>,
}

impl AppState {
    /// Wire the components around an already chosen store and transport.
    pub fn new(
        config: GatewayConfig,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn UpstreamTransport>,
    ) -> Self {
        let pool = Arc::new(KeyPool::new(
            config.resolved_credentials(),
            Arc::clone(&store),
            config.rotation.clone(),
            config.ban.clone(),
        ));
        let usage = Arc::new(UsageRecorder::new(Arc::clone(&store)));
        let orchestrator = Arc::new(RetryOrchestrator::new(
            Arc::clone(&pool),
            Arc::clone(&transport),
            Arc::clone(&usage),
            config.retry.clone(),
            Duration::from_secs(config.upstream.timeout_secs.max(1)),
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            store,
            pool,
            usage,
            transport,
            orchestrator,
        }
    }

    /// Select the storage backend, build the upstream client and restore
    /// persisted key state.
    pub async fn bootstrap(config: GatewayConfig) -> AppResult<Self> {
        let store = store::select_backend(&config.storage).await?;
        let http_client = build_http_client(
            config.storage.connect_timeout_secs,
            config.upstream.proxy_url.as_deref(),
        )?;
        let transport: Arc<dyn UpstreamTransport> =
            Arc::new(UpstreamClient::new(http_client, &config.upstream));

        let state = Self::new(config, store, transport);
        let banned = state.pool.restore_state().await;
        tracing::info!(
            "Key pool ready: {} credentials ({} banned), backend {}",
            state.pool.len(),
            banned,
            state.store.backend()
        );
        if state.pool.is_empty() {
            tracing::warn!("No upstream credentials configured; chat requests will fail with 429");
        }
        Ok(state)
    }
}

/// Public gateway surface: `/v1/*` behind the client API key, `/health` open.
pub fn build_proxy_router(state: AppState) -> Router<()> {
    use crate::proxy::handlers;

    let v1 = Router::new()
        .route("/v1/models", get(handlers::openai::handle_list_models))
        .route("/v1/chat/completions", post(handlers::openai::handle_chat_completions))
        .layer(DefaultBodyLimit::max(100 * 1024 * 1024))
        .layer(axum::middleware::from_fn_with_state(
            Arc::clone(&state.config),
            crate::proxy::middleware::auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_check_handler))
        .merge(v1)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

