use axum::{http::StatusCode, middleware, response::IntoResponse, routing::get, Router};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::api;
use crate::state::AppState;
use keyrelay_core::proxy::build_proxy_router;
use keyrelay_core::proxy::middleware::admin_auth_middleware;

/// `/api/*` behind the admin key, merged with the public gateway router.
pub fn build_router(state: AppState) -> Router {
    let proxy_router = build_proxy_router(state.gateway().clone());
    let auth_config = Arc::clone(&state.gateway().config);

    let protected_api = Router::<AppState>::new()
        .nest("/api", api::router())
        .layer(middleware::from_fn_with_state(auth_config, admin_auth_middleware));

    let public_routes = Router::<AppState>::new()
        .route("/healthz", get(health_check))
        .route("/version", get(version_info));

    // Resolve AppState first so both sides are Router<()>
    protected_api
        .merge(public_routes)
        .with_state(state)
        .merge(proxy_router)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}

async fn version_info() -> impl IntoResponse {
    (
        StatusCode::OK,
        axum::Json(serde_json::json!({
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        })),
    )
}
