//! Unified error types for KeyRelay Core.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use keyrelay_types::{ConfigError, GatewayError};

use crate::store::StoreError;

/// Main error type for core operations and HTTP handlers.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AppError {
    /// Request-path failure with a defined client-facing shape.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// Configuration loading or validation failed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// State store failure outside the request path.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Network request failed (HTTP client).
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// File system I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Unclassified error with message.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

/// Result type alias for core operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(s: String) -> Self {
        AppError::Unknown(s)
    }
}

impl From<&str> for AppError {
    fn from(s: &str) -> Self {
        AppError::Unknown(s.to_string())
    }
}

/// Response for a gateway error: its HTTP status and the OpenAI envelope.
pub fn gateway_error_response(err: &GatewayError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(err.to_openai_body())).into_response()
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Gateway(err) => gateway_error_response(&err),
            AppError::Store(err) => gateway_error_response(&GatewayError::from(err)),
            AppError::Config(err) => {
                gateway_error_response(&GatewayError::InvalidRequest { message: err.to_string() })
            },
            other => {
                tracing::error!("Internal error: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({
                        "error": {
                            "message": other.to_string(),
                            "type": "server_error",
                            "code": "internal_error",
                        }
                    })),
                )
                    .into_response()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_error_status() {
        let response = AppError::from(GatewayError::NoUsableKey { tried: 1 }).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

        let response = AppError::from(GatewayError::UpstreamFatal {
            status: Some(418),
            message: "teapot".to_string(),
        })
        .into_response();
        assert_eq!(response.status().as_u16(), 418);
    }

    #[test]
    fn test_unknown_is_internal() {
        let response = AppError::from("boom").into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
