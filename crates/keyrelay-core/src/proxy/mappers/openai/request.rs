// OpenAI request -> upstream request body
use serde_json::{json, Map, Value};
use std::collections::HashMap;

use keyrelay_types::protocol::{ChatCompletionRequest, ChatMessage, ContentPart, MessageContent};

/// Upstream rejects larger completion budgets.
pub const MAX_TOKENS_CAP: u32 = 65_535;

/// Result of model name resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedModel {
    /// Name the caller sent, fake-stream prefix removed
    pub requested: String,
    /// Name forwarded upstream after `model_mapping`
    pub upstream: String,
    /// The fake-stream prefix was present
    pub force_fake_stream: bool,
}

pub fn resolve_model(
    model: &str,
    fake_stream_prefix: &str,
    mapping: &HashMap<String, String>,
) -> ResolvedModel {
    let trimmed = model.trim();
    let (requested, force_fake_stream) =
        match trimmed.strip_prefix(fake_stream_prefix).filter(|_| !fake_stream_prefix.is_empty()) {
            Some(rest) => (rest.to_string(), true),
            None => (trimmed.to_string(), false),
        };
    let upstream = mapping.get(&requested).cloned().unwrap_or_else(|| requested.clone());
    ResolvedModel { requested, upstream, force_fake_stream }
}

/// Messages in the shape upstream accepts.
///
/// Multimodal content collapses to its text parts joined by `\n`, null content
/// becomes `""`. Empty user/system turns are dropped; assistant and tool turns,
/// and anything carrying tool calls, are always kept.
pub fn sanitize_messages(messages: &[ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .filter(|message| keep_message(message))
        .map(|message| {
            let content = message.content.as_ref().map(MessageContent::to_text).unwrap_or_default();
            let mut out = Map::new();
            out.insert("role".to_string(), json!(message.role));
            out.insert("content".to_string(), json!(content));
            if let Some(name) = &message.name {
                out.insert("name".to_string(), json!(name));
            }
            if let Some(tool_calls) = message.tool_calls.as_ref().filter(|c| !c.is_empty()) {
                out.insert("tool_calls".to_string(), json!(tool_calls));
            }
            if let Some(id) = message.tool_call_id.as_ref().filter(|id| !id.is_empty()) {
                out.insert("tool_call_id".to_string(), json!(id));
            }
            Value::Object(out)
        })
        .collect()
}

fn keep_message(message: &ChatMessage) -> bool {
    if message.tool_calls.as_ref().is_some_and(|c| !c.is_empty()) {
        return true;
    }
    if matches!(message.role.as_str(), "assistant" | "tool") {
        return true;
    }
    match &message.content {
        Some(MessageContent::Text(text)) => !text.trim().is_empty(),
        Some(MessageContent::Parts(parts)) => parts.iter().any(|part| match part {
            ContentPart::Text { text } => !text.trim().is_empty(),
            ContentPart::ImageUrl { image_url } => image_url
                .get("url")
                .and_then(Value::as_str)
                .is_some_and(|url| !url.is_empty()),
            ContentPart::Unsupported => false,
        }),
        None => false,
    }
}

/// Full upstream body. `stream` asks upstream for SSE.
pub fn build_upstream_request(
    request: &ChatCompletionRequest,
    model: &ResolvedModel,
    stream: bool,
) -> Value {
    let mut body = Map::new();
    body.insert("model".to_string(), json!(model.upstream));
    body.insert("messages".to_string(), Value::Array(sanitize_messages(&request.messages)));
    if stream {
        body.insert("stream".to_string(), Value::Bool(true));
    }

    let mut passthrough = |key: &str, value: Option<Value>| {
        if let Some(value) = value.filter(|v| !v.is_null()) {
            body.insert(key.to_string(), value);
        }
    };
    passthrough("temperature", request.temperature.map(Value::from));
    passthrough("top_p", request.top_p.map(Value::from));
    passthrough("max_tokens", request.max_tokens.map(|t| Value::from(t.min(MAX_TOKENS_CAP))));
    passthrough("stop", request.stop.clone());
    passthrough("frequency_penalty", request.frequency_penalty.map(Value::from));
    passthrough("presence_penalty", request.presence_penalty.map(Value::from));
    passthrough("n", request.n.map(Value::from));
    passthrough("seed", request.seed.map(Value::from));
    passthrough("response_format", request.response_format.clone());
    passthrough("tools", request.tools.clone().filter(|t| !t.is_empty()).map(Value::Array));
    passthrough("tool_choice", request.tool_choice.clone());
    passthrough("user", request.user.clone().map(Value::from));

    Value::Object(body)
}
