//! Outbound calls to the aggregation endpoint.
//!
//! [`UpstreamTransport`] is the seam between the retry loop and the network so
//! the orchestrator can be driven by a scripted transport in tests.

mod client;


pub use client::{build_http_client, UpstreamClient};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::header::HeaderMap;
use serde_json::Value;

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Connect or response deadline passed; the retry loop rotates keys
    #[error("Upstream timed out: {0}")]
    Timeout(String),
    #[error("Upstream request failed: {0}")]
    Other(String),
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else {
            Self::Other(err.to_string())
        }
    }
}

pub enum ReplyBody {
    Complete(Bytes),
    Stream(ByteStream),
}

/// Status, headers and body of one upstream call.
pub struct UpstreamReply {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: ReplyBody,
}

impl UpstreamReply {
    pub fn new(status: u16, headers: HeaderMap, body: Bytes) -> Self {
        Self { status, headers, body: ReplyBody::Complete(body) }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, HeaderMap::new(), Bytes::from(value.to_string()))
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into memory.
    pub async fn into_bytes(self) -> Result<Bytes, TransportError> {
        match self.body {
            ReplyBody::Complete(bytes) => Ok(bytes),
            ReplyBody::Stream(mut stream) => {
                let mut buffer = Vec::new();
                while let Some(chunk) = stream.next().await {
                    buffer.extend_from_slice(&chunk?);
                }
                Ok(Bytes::from(buffer))
            },
        }
    }
}

impl std::fmt::Debug for UpstreamReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let body = match &self.body {
            ReplyBody::Complete(bytes) => format!("{} bytes", bytes.len()),
            ReplyBody::Stream(_) => "stream".to_string(),
        };
        f.debug_struct("UpstreamReply")
            .field("status", &self.status)
            .field("body", &body)
            .finish()
    }
}

#[async_trait]
pub trait UpstreamTransport: Send + Sync {
    /// POST `body` with `api_key` as the credential.
    ///
    /// With `stream` set, a successful reply carries a [`ReplyBody::Stream`].
    async fn send(
        &self,
        api_key: &str,
        body: &Value,
        stream: bool,
    ) -> Result<UpstreamReply, TransportError>;

    /// Model ids advertised by upstream.
    async fn fetch_models(&self, api_key: &str) -> Result<Vec<String>, TransportError>;
}
