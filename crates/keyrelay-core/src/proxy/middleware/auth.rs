use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

use keyrelay_types::GatewayConfig;

/// Client authentication for `/v1/*` with the configured API key.
pub async fn auth_middleware(
    state: State<Arc<RwLock<GatewayConfig>>>,
    request: Request,
    next: Next,
) -> Response {
    auth_middleware_internal(state, request, next, false).await
}

/// Admin authentication for `/api/*`; the admin key falls back to the API key.
pub async fn admin_auth_middleware(
    state: State<Arc<RwLock<GatewayConfig>>>,
    request: Request,
    next: Next,
) -> Response {
    auth_middleware_internal(state, request, next, true).await
}

fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// `Authorization: Bearer <key>` (or a bare value), then `x-api-key`.
pub fn extract_api_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s).trim())
        .filter(|s| !s.is_empty())
        .or_else(|| headers.get("x-api-key").and_then(|h| h.to_str().ok()).map(str::trim))
}

async fn auth_middleware_internal(
    State(config): State<Arc<RwLock<GatewayConfig>>>,
    request: Request,
    next: Next,
    admin: bool,
) -> Response {
    if request.method() == axum::http::Method::OPTIONS {
        return next.run(request).await;
    }

    let expected = {
        let config = config.read().await;
        if admin {
            config.server.effective_admin_key().to_string()
        } else {
            config.server.api_key.clone()
        }
    };

    if expected.is_empty() {
        tracing::error!("Auth is required but no key is configured; denying {}", request.uri().path());
        return unauthorized();
    }

    let authorized =
        extract_api_key(request.headers()).is_some_and(|k| constant_time_compare(k, &expected));
    if !authorized {
        tracing::warn!("Rejected unauthenticated {} {}", request.method(), request.uri().path());
        return unauthorized();
    }

    next.run(request).await
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({
            "error": {
                "message": "Invalid API key",
                "type": "invalid_request_error",
                "code": "invalid_api_key",
            }
        })),
    )
        .into_response()
}
