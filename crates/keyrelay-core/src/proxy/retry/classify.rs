use serde_json::Value;

use keyrelay_types::{BanConfig, RetryConfig};

use crate::proxy::rate_limit::RateLimitHeaders;

const RATE_LIMIT_KEYWORDS: &[&str] = &["rate", "limit", "quota", "too many"];
const REQUEST_FAULT_KEYWORDS: &[&str] =
    &["too large", "too long", "token", "context", "length", "processing error"];

/// Where one upstream reply sends the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Success,
    /// Rotate: the credential is out of capacity
    Throttled,
    /// Rotate: ambiguous 400 that may be credential specific
    Malformed,
    /// Rotate after banning the credential
    Banned,
    /// Pass the reply through to the caller
    Fatal,
}

pub fn classify_status(
    status: u16,
    headers: &RateLimitHeaders,
    body: &str,
    retry: &RetryConfig,
    ban: &BanConfig,
) -> Disposition {
    match status {
        200..=299 => Disposition::Success,
        429 => Disposition::Throttled,
        _ if ban.is_ban_status(status) => {
            if ban.auto_ban {
                Disposition::Banned
            } else {
                Disposition::Fatal
            }
        },
        400 => classify_bad_request(headers, body, retry.rotate_on_bad_request),
        400..=499 if headers.is_exhausted() => Disposition::Throttled,
        _ => Disposition::Fatal,
    }
}

/// Split an upstream 400 into throttling, a genuine request fault, or neither.
pub fn classify_bad_request(
    headers: &RateLimitHeaders,
    body: &str,
    rotate_on_bad_request: bool,
) -> Disposition {
    if headers.is_nearly_exhausted() {
        return Disposition::Throttled;
    }
    let message = extract_error_message(body).to_lowercase();
    if RATE_LIMIT_KEYWORDS.iter().any(|k| message.contains(k)) {
        return Disposition::Throttled;
    }
    if REQUEST_FAULT_KEYWORDS.iter().any(|k| message.contains(k)) {
        return Disposition::Fatal;
    }
    if rotate_on_bad_request {
        Disposition::Malformed
    } else {
        Disposition::Fatal
    }
}

/// Human readable message out of an upstream error body.
///
/// Looks at `message`, then `error.message`, then a string `error`, and falls
/// back to the raw body.
pub fn extract_error_message(body: &str) -> String {
    let Ok(json) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    json.get("message")
        .and_then(Value::as_str)
        .or_else(|| json.pointer("/error/message").and_then(Value::as_str))
        .or_else(|| json.get("error").and_then(Value::as_str))
        .map_or_else(|| body.trim().to_string(), str::to_string)
}
