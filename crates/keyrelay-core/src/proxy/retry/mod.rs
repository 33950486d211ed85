//! Per-request retry loop across credentials.
//!
//! `Selecting -> Calling -> {Success, Throttled, Malformed, Exhausted, Fatal}`.
//! A failed attempt is a [`GatewayError`]; the ones for which
//! [`GatewayError::should_rotate_key`] holds exclude the credential for the rest
//! of the request, sleep the fixed interval and go back to selection until the
//! call budget is spent.

mod classify;


pub use classify::{classify_bad_request, classify_status, extract_error_message, Disposition};

use chrono::Utc;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use keyrelay_types::{Credential, GatewayError, RetryConfig};

use crate::modules::usage::UsageRecorder;
use crate::proxy::key_pool::KeyPool;
use crate::proxy::rate_limit::Observation;
use crate::proxy::upstream::{TransportError, UpstreamReply, UpstreamTransport};

/// Request-local bookkeeping, never shared between requests.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub model: String,
    pub stream: bool,
    pub attempt: u32,
    pub tried: HashSet<String>,
}

impl RequestContext {
    pub fn new(model: impl Into<String>, stream: bool) -> Self {
        Self {
            trace_id: format!("oai_{}", Utc::now().timestamp_micros()),
            model: model.into(),
            stream,
            attempt: 0,
            tried: HashSet::new(),
        }
    }
}

/// A successful upstream reply and the credential that produced it.
#[derive(Debug)]
pub struct Dispatched {
    pub credential: Credential,
    pub reply: UpstreamReply,
    pub attempts: u32,
}

pub struct RetryOrchestrator {
    pool: Arc<KeyPool>,
    transport: Arc<dyn UpstreamTransport>,
    usage: Arc<UsageRecorder>,
    config: RetryConfig,
    timeout: Duration,
}

impl RetryOrchestrator {
    pub fn new(
        pool: Arc<KeyPool>,
        transport: Arc<dyn UpstreamTransport>,
        usage: Arc<UsageRecorder>,
        config: RetryConfig,
        timeout: Duration,
    ) -> Self {
        Self { pool, transport, usage, config, timeout }
    }

    /// Total upstream calls allowed for one request.
    pub fn max_attempts(&self) -> u32 {
        if self.config.enabled {
            self.config.max_attempts.max(1)
        } else {
            1
        }
    }

    pub async fn execute(
        &self,
        ctx: &mut RequestContext,
        body: &Value,
    ) -> Result<Dispatched, GatewayError> {
        let max_attempts = self.max_attempts();
        let interval = Duration::from_millis(self.config.interval_ms);
        let mut last_failure: Option<GatewayError> = None;

        loop {
            let credential = match self.pool.select(&ctx.tried).await {
                Ok(credential) => credential,
                Err(GatewayError::NoUsableKey { tried }) => {
                    tracing::warn!(
                        "[{}] No usable key left ({} tried, attempt {})",
                        ctx.trace_id,
                        tried,
                        ctx.attempt
                    );
                    return Err(exhausted(ctx, last_failure, tried));
                },
                Err(e) => {
                    tracing::error!("[{}] Key selection failed: {}", ctx.trace_id, e);
                    return Err(e);
                },
            };

            ctx.attempt += 1;
            tracing::info!(
                "[{}] REQ model={} key={} attempt={}/{}",
                ctx.trace_id,
                ctx.model,
                credential.masked(),
                ctx.attempt,
                max_attempts
            );

            let failure = match self.call(ctx, &credential, body).await {
                Ok(reply) => {
                    return Ok(Dispatched { credential, reply, attempts: ctx.attempt });
                },
                Err(err) if err.should_rotate_key() => err,
                Err(err) => return Err(err),
            };

            ctx.tried.insert(credential.id.clone());
            tracing::warn!(
                "[{}] Rotating away from {}: {} ({}/{})",
                ctx.trace_id,
                credential.masked(),
                failure,
                ctx.attempt,
                max_attempts
            );
            last_failure = Some(failure);
            if ctx.attempt >= max_attempts {
                return Err(exhausted(ctx, last_failure, ctx.tried.len()));
            }
            tokio::time::sleep(interval).await;
        }
    }

    async fn call(
        &self,
        ctx: &RequestContext,
        credential: &Credential,
        body: &Value,
    ) -> Result<UpstreamReply, GatewayError> {
        let sent = tokio::time::timeout(
            self.timeout,
            self.transport.send(&credential.secret, body, ctx.stream),
        )
        .await
        .unwrap_or_else(|_| {
            Err(TransportError::Timeout(format!(
                "no response within {}s",
                self.timeout.as_secs()
            )))
        });

        let reply = match sent {
            Ok(reply) => reply,
            Err(err) => {
                self.pool.observe(credential, &Observation::transport_failure()).await;
                self.usage.record_key_call(credential, &ctx.model, None).await;
                if err.is_timeout() {
                    return Err(GatewayError::Throttled {
                        credential: credential.masked(),
                        message: err.to_string(),
                    });
                }
                tracing::error!("[{}] {}", ctx.trace_id, err);
                return Err(GatewayError::UpstreamFatal { status: None, message: err.to_string() });
            },
        };

        let status = reply.status;
        self.usage.record_key_call(credential, &ctx.model, Some(status)).await;

        if reply.is_success() {
            let observation = Observation::from_response(status, &reply.headers, None);
            self.pool.observe(credential, &observation).await;
            tracing::info!(
                "[{}] RES model={} key={} status={}",
                ctx.trace_id,
                ctx.model,
                credential.masked(),
                status
            );
            return Ok(reply);
        }

        let headers = reply.headers.clone();
        let text = match tokio::time::timeout(self.timeout, reply.into_bytes()).await {
            Ok(Ok(bytes)) => String::from_utf8_lossy(&bytes).into_owned(),
            Ok(Err(e)) => e.to_string(),
            Err(_) => String::new(),
        };

        let mut observation = Observation::from_response(status, &headers, Some(&text));
        let disposition = classify_status(
            status,
            &observation.headers,
            &text,
            &self.config,
            self.pool.ban_config(),
        );
        if disposition == Disposition::Throttled {
            observation.status = Some(429);
        }
        self.pool.observe(credential, &observation).await;

        tracing::debug!(
            "[{}] Upstream {} classified as {:?}: {}",
            ctx.trace_id,
            status,
            disposition,
            text
        );

        Err(match disposition {
            Disposition::Throttled => {
                let message = match extract_error_message(&text) {
                    message if message.is_empty() => format!("{} from upstream", status),
                    message => format!("{}: {}", status, message),
                };
                GatewayError::Throttled { credential: credential.masked(), message }
            },
            Disposition::Malformed => GatewayError::AmbiguousBadRequest { message: text },
            Disposition::Banned => {
                self.pool.ban(credential, format!("upstream returned {}", status)).await;
                GatewayError::CredentialBanned { credential: credential.masked() }
            },
            Disposition::Success | Disposition::Fatal => {
                tracing::warn!(
                    "[{}] Upstream {} is not retryable for {}",
                    ctx.trace_id,
                    status,
                    credential.masked()
                );
                GatewayError::UpstreamFatal { status: Some(status), message: text }
            },
        })
    }
}

/// Terminal error once the budget is spent or no key is left.
///
/// An ambiguous 400 hands the caller the upstream body it last saw.
fn exhausted(
    ctx: &RequestContext,
    last_failure: Option<GatewayError>,
    tried: usize,
) -> GatewayError {
    match last_failure {
        Some(GatewayError::AmbiguousBadRequest { message }) => {
            GatewayError::UpstreamFatal { status: Some(400), message }
        },
        Some(failure) => GatewayError::RetriesExhausted {
            attempts: ctx.attempt,
            last_error: failure.to_string(),
        },
        None => GatewayError::NoUsableKey { tried },
    }
}
