use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;

use keyrelay_types::UpstreamConfig;

use super::{ReplyBody, TransportError, UpstreamReply, UpstreamTransport};

/// Build the shared HTTP client.
///
/// No overall request timeout: the retry loop bounds the wait for headers and
/// buffered bodies, and long streams must not be cut off mid-flight.
///
/// A configured proxy that cannot be parsed is an error, never a silent
/// direct connection.
pub fn build_http_client(
    connect_timeout_secs: u64,
    proxy_url: Option<&str>,
) -> Result<Client, String> {
    let mut builder = Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs.max(1)))
        .tcp_nodelay(true);

    if let Some(url) = proxy_url.map(str::trim).filter(|u| !u.is_empty()) {
        let proxy = reqwest::Proxy::all(url).map_err(|e| format!("Invalid proxy URL: {}", e))?;
        builder = builder.proxy(proxy);
        tracing::info!(host = %proxy_host(url), "HTTP client: upstream proxy enabled");
    }

    builder.build().map_err(|e| format!("Failed to build HTTP client: {}", e))
}

/// Scheme, host and port only; proxy credentials stay out of the logs.
fn proxy_host(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(parsed) => format!(
            "{}://{}:{}",
            parsed.scheme(),
            parsed.host_str().unwrap_or("?"),
            parsed.port_or_known_default().map_or_else(|| "?".to_string(), |p| p.to_string())
        ),
        Err(_) => "<unparsable>".to_string(),
    }
}

pub struct UpstreamClient {
    http_client: Client,
    endpoint: String,
    models_endpoint: String,
}

impl UpstreamClient {
    pub fn new(http_client: Client, config: &UpstreamConfig) -> Self {
        Self {
            http_client,
            endpoint: config.endpoint.clone(),
            models_endpoint: config.effective_models_endpoint(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl UpstreamTransport for UpstreamClient {
    async fn send(
        &self,
        api_key: &str,
        body: &Value,
        stream: bool,
    ) -> Result<UpstreamReply, TransportError> {
        let mut request = self
            .http_client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, api_key)
            .json(body);
        if stream {
            request = request.header(reqwest::header::ACCEPT, "text/event-stream");
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();

        let body = if stream && response.status().is_success() {
            ReplyBody::Stream(
                response.bytes_stream().map(|chunk| chunk.map_err(TransportError::from)).boxed(),
            )
        } else {
            ReplyBody::Complete(response.bytes().await?)
        };

        Ok(UpstreamReply { status, headers, body })
    }

    async fn fetch_models(&self, api_key: &str) -> Result<Vec<String>, TransportError> {
        let response = self
            .http_client
            .get(&self.models_endpoint)
            .header(reqwest::header::AUTHORIZATION, api_key)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Other(format!(
                "models endpoint returned {}",
                status.as_u16()
            )));
        }
        let body: Value = response.json().await?;
        Ok(parse_model_ids(&body))
    }
}

/// Accepts `{"data":[{"id":..}]}`, `{"models":[..]}` or a bare array of ids
/// or objects.
pub(crate) fn parse_model_ids(body: &Value) -> Vec<String> {
    let list = body
        .get("data")
        .or_else(|| body.get("models"))
        .unwrap_or(body)
        .as_array()
        .cloned()
        .unwrap_or_default();

    let mut seen = HashSet::new();
    let ids: Vec<String> = list
        .iter()
        .filter_map(|entry| match entry {
            Value::String(id) => Some(id.clone()),
            Value::Object(obj) => obj
                .get("id")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect();
    ids
}
