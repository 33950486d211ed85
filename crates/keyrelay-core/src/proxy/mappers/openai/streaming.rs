// Upstream SSE -> OpenAI chat.completion.chunk relay
use bytes::BytesMut;
use futures::future::BoxFuture;
use futures::StreamExt;
use serde_json::Value;
use tracing::debug;

use keyrelay_types::protocol::Usage;
use keyrelay_types::GatewayError;

use super::response::{extract_usage, normalize_tool_calls};
use super::sse::{done_line, error_line, sse_line, ChunkMeta, SseStream};
use crate::proxy::upstream::ByteStream;

/// Runs once the upstream stream finished, with its success flag and usage.
/// Dropped unrun when the caller disconnects first.
pub type CompletionHook = Box<dyn FnOnce(bool, Option<Usage>) -> BoxFuture<'static, ()> + Send>;

/// One parsed SSE line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Chunk(Value),
    Error(Value),
    Done,
    Skip,
}

pub fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        return SseEvent::Skip;
    };
    let payload = payload.trim();
    if payload == "[DONE]" {
        return SseEvent::Done;
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(json) if json.get("error").is_some_and(|e| !e.is_null()) => SseEvent::Error(json),
        Ok(json) if json.is_object() => SseEvent::Chunk(json),
        _ => {
            debug!("[OpenAI-SSE] Skipping non-JSON data line: {}", payload);
            SseEvent::Skip
        },
    }
}

/// Bring one upstream chunk into OpenAI shape: fixed id/created/model,
/// stringified tool-call arguments.
fn normalize_chunk(chunk: &mut Value, meta: &ChunkMeta) {
    let Some(obj) = chunk.as_object_mut() else {
        return;
    };
    obj.insert("id".to_string(), Value::from(meta.id.clone()));
    obj.insert("object".to_string(), Value::from("chat.completion.chunk"));
    obj.insert("created".to_string(), Value::from(meta.created));
    obj.insert("model".to_string(), Value::from(meta.model.clone()));

    if let Some(choices) = obj.get_mut("choices").and_then(Value::as_array_mut) {
        for choice in choices {
            if let Some(calls) = choice.pointer_mut("/delta/tool_calls").and_then(Value::as_array_mut) {
                normalize_tool_calls(calls);
            }
        }
    }
}

/// Relay an upstream SSE body as OpenAI chunks ending in exactly one `[DONE]`.
///
/// An upstream `error` event or a broken connection becomes a terminal error
/// frame before `[DONE]`.
pub fn create_openai_sse_stream(
    mut upstream: ByteStream,
    model: String,
    on_complete: CompletionHook,
) -> SseStream {
    let meta = ChunkMeta::new(model);

    let stream = async_stream::stream! {
        let mut buffer = BytesMut::new();
        let mut usage: Option<Usage> = None;
        let mut chunks = 0usize;
        let mut failure: Option<GatewayError> = None;
        let mut finished = false;

        'read: while let Some(item) = upstream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    failure = Some(GatewayError::StreamInterrupted { message: e.to_string() });
                    break;
                },
            };
            buffer.extend_from_slice(&bytes);

            while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                let line_raw = buffer.split_to(pos + 1);
                let line = String::from_utf8_lossy(&line_raw);
                match parse_sse_line(&line) {
                    SseEvent::Skip => {},
                    SseEvent::Done => {
                        finished = true;
                        break 'read;
                    },
                    SseEvent::Error(json) => {
                        failure = Some(GatewayError::UpstreamFatal { status: None, message: json.to_string() });
                        break 'read;
                    },
                    SseEvent::Chunk(mut json) => {
                        if let Some(found) = json.get("usage").and_then(extract_usage) {
                            usage = Some(found);
                        }
                        normalize_chunk(&mut json, &meta);
                        chunks += 1;
                        yield Ok::<_, String>(sse_line(&json));
                    },
                }
            }
        }

        // Trailing line without a newline
        if !finished && failure.is_none() && !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            match parse_sse_line(&line) {
                SseEvent::Chunk(mut json) => {
                    if let Some(found) = json.get("usage").and_then(extract_usage) {
                        usage = Some(found);
                    }
                    normalize_chunk(&mut json, &meta);
                    chunks += 1;
                    yield Ok(sse_line(&json));
                },
                SseEvent::Error(json) => {
                    failure = Some(GatewayError::UpstreamFatal { status: None, message: json.to_string() });
                },
                SseEvent::Done | SseEvent::Skip => {},
            }
        }

        match &failure {
            Some(err) => {
                tracing::warn!("[OpenAI-SSE] Stream for {} failed after {} chunks: {}", meta.model, chunks, err);
                yield Ok(error_line(err));
            },
            None => debug!("[OpenAI-SSE] Stream for {} finished with {} chunks", meta.model, chunks),
        }
        on_complete(failure.is_none(), usage).await;
        yield Ok(done_line());
    };

    Box::pin(stream)
}
