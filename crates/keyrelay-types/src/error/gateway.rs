//! Gateway request errors.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// Errors that can occur while serving a chat-completion request.
#[derive(Debug, Clone, Error, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "details")]
pub enum GatewayError {
    /// Upstream signaled capacity exhaustion for a credential
    #[error("Credential {credential} throttled: {message}")]
    Throttled { credential: String, message: String },

    /// 400 from upstream with no clear client-side fault
    #[error("Ambiguous bad request: {message}")]
    AmbiguousBadRequest { message: String },

    /// Credential is banned and needs reconfiguration
    #[error("Credential {credential} is banned")]
    CredentialBanned { credential: String },

    /// Every credential is excluded, banned or exhausted
    #[error("No usable key available ({tried} already tried)")]
    NoUsableKey { tried: usize },

    /// Retry budget spent on throttled or ambiguous attempts
    #[error("All accounts exhausted after {attempts} attempts. Last error: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    /// State store backend unreachable
    #[error("State store unavailable: {message}")]
    StorageUnavailable { message: String },

    /// Non-retryable upstream error, passed through to the caller
    #[error("Upstream error{}: {message}", status.map(|s| format!(" ({})", s)).unwrap_or_default())]
    UpstreamFatal { status: Option<u16>, message: String },

    /// Caller or network disconnect mid-stream
    #[error("Stream interrupted: {message}")]
    StreamInterrupted { message: String },

    /// Inbound request failed validation
    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

impl GatewayError {
    /// Whether the orchestrator rotates to another credential on this error.
    pub fn should_rotate_key(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::AmbiguousBadRequest { .. } | Self::CredentialBanned { .. }
        )
    }

    /// Whether the caller sees a rate-limit class error.
    pub fn is_rate_limit(&self) -> bool {
        matches!(
            self,
            Self::Throttled { .. } | Self::NoUsableKey { .. } | Self::RetriesExhausted { .. }
        )
    }

    /// Get HTTP status code for this error.
    pub fn http_status_code(&self) -> u16 {
        match self {
            Self::Throttled { .. } | Self::NoUsableKey { .. } | Self::RetriesExhausted { .. } => 429,
            Self::AmbiguousBadRequest { .. } | Self::InvalidRequest { .. } => 400,
            Self::CredentialBanned { .. } => 403,
            Self::StorageUnavailable { .. } => 503,
            Self::UpstreamFatal { status, .. } => match status {
                Some(code) if (400..600).contains(code) => *code,
                _ => 502,
            },
            Self::StreamInterrupted { .. } => 499,
        }
    }

    /// OpenAI `error.type` value.
    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Throttled { .. } | Self::NoUsableKey { .. } | Self::RetriesExhausted { .. } => {
                "rate_limit_error"
            },
            Self::AmbiguousBadRequest { .. } | Self::InvalidRequest { .. } => {
                "invalid_request_error"
            },
            Self::CredentialBanned { .. } => "permission_error",
            Self::StorageUnavailable { .. } => "service_unavailable",
            Self::UpstreamFatal { .. } => "upstream_error",
            Self::StreamInterrupted { .. } => "stream_error",
        }
    }

    /// OpenAI `error.code` value.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Throttled { .. } => "throttled",
            Self::AmbiguousBadRequest { .. } => "ambiguous_bad_request",
            Self::CredentialBanned { .. } => "credential_banned",
            Self::NoUsableKey { .. } => "no_usable_key",
            Self::RetriesExhausted { .. } => "retries_exhausted",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::UpstreamFatal { .. } => "upstream_fatal",
            Self::StreamInterrupted { .. } => "stream_interrupted",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }

    /// Body returned to the caller.
    ///
    /// An upstream JSON error that already carries an `error` object is passed
    /// through verbatim; everything else is wrapped in the OpenAI envelope.
    pub fn to_openai_body(&self) -> Value {
        if let Self::UpstreamFatal { message, .. } = self {
            if let Ok(upstream) = serde_json::from_str::<Value>(message) {
                if upstream.get("error").is_some_and(Value::is_object) {
                    return upstream;
                }
            }
        }
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.error_code(),
            }
        })
    }
}
