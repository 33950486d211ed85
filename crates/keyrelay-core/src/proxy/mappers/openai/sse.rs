// OpenAI SSE frame helpers
use bytes::Bytes;
use chrono::Utc;
use futures::stream::BoxStream;
use serde_json::{json, Value};
use uuid::Uuid;

use keyrelay_types::protocol::{ChatCompletionResponse, Usage};
use keyrelay_types::GatewayError;

/// Body stream handed to axum.
pub type SseStream = BoxStream<'static, Result<Bytes, String>>;

pub const DONE_LINE: &str = "data: [DONE]\n\n";

/// Format an SSE data line
#[inline]
pub fn sse_line(data: &Value) -> Bytes {
    Bytes::from(format!("data: {}\n\n", serde_json::to_string(data).unwrap_or_default()))
}

#[inline]
pub fn done_line() -> Bytes {
    Bytes::from_static(DONE_LINE.as_bytes())
}

/// Terminal error frame, same envelope as a non-streamed error body.
pub fn error_line(err: &GatewayError) -> Bytes {
    sse_line(&err.to_openai_body())
}

/// Shared `id`/`created`/`model` of every chunk in one stream.
#[derive(Debug, Clone)]
pub struct ChunkMeta {
    pub id: String,
    pub created: i64,
    pub model: String,
}

impl ChunkMeta {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            created: Utc::now().timestamp(),
            model: model.into(),
        }
    }

    fn chunk(&self, index: u32, delta: Value, finish_reason: Option<&str>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": index,
                "delta": delta,
                "finish_reason": finish_reason
            }]
        })
    }

    /// Keep-alive frame: assistant role with empty content.
    pub fn heartbeat(&self) -> Value {
        self.chunk(0, json!({ "role": "assistant", "content": "" }), None)
    }

    pub fn content(&self, index: u32, content: &str) -> Value {
        self.chunk(index, json!({ "role": "assistant", "content": content }), None)
    }

    pub fn reasoning(&self, index: u32, reasoning_content: &str) -> Value {
        self.chunk(index, json!({ "role": "assistant", "reasoning_content": reasoning_content }), None)
    }

    pub fn tool_calls(&self, index: u32, tool_calls: Value) -> Value {
        self.chunk(index, json!({ "role": "assistant", "tool_calls": tool_calls }), None)
    }

    /// Empty delta carrying the finish reason and, when known, usage.
    pub fn finish(&self, index: u32, finish_reason: &str, usage: Option<&Usage>) -> Value {
        let mut chunk = self.chunk(index, json!({}), Some(finish_reason));
        if let (Some(usage), Some(obj)) = (usage, chunk.as_object_mut()) {
            obj.insert("usage".to_string(), json!(usage));
        }
        chunk
    }
}

/// Frames replaying a complete answer: reasoning, content and tool calls per
/// choice, then one finish frame per choice.
pub fn completion_frames(meta: &ChunkMeta, response: &ChatCompletionResponse) -> Vec<Bytes> {
    let mut frames = Vec::new();
    for choice in &response.choices {
        let message = &choice.message;
        if let Some(reasoning) = message.reasoning_content.as_deref().filter(|r| !r.is_empty()) {
            frames.push(sse_line(&meta.reasoning(choice.index, reasoning)));
        }
        let content = message.content.as_ref().map(|c| c.to_text()).unwrap_or_default();
        if !content.is_empty() || message.tool_calls.is_none() {
            frames.push(sse_line(&meta.content(choice.index, &content)));
        }
        if let Some(calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
            let indexed: Vec<Value> = calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    json!({
                        "index": i,
                        "id": call.id,
                        "type": call.r#type,
                        "function": { "name": call.function.name, "arguments": call.function.arguments }
                    })
                })
                .collect();
            frames.push(sse_line(&meta.tool_calls(choice.index, Value::Array(indexed))));
        }
    }
    for choice in &response.choices {
        let reason = choice.finish_reason.as_deref().unwrap_or("stop");
        frames.push(sse_line(&meta.finish(choice.index, reason, response.usage.as_ref())));
    }
    frames
}
