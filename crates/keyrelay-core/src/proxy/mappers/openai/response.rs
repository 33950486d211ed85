// Upstream completion -> OpenAI chat.completion
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use keyrelay_types::protocol::{
    ChatCompletionResponse, ChatMessage, Choice, MessageContent, ToolCall, ToolFunction, Usage,
};
use keyrelay_types::GatewayError;

use super::xml_tools::extract_xml_tool_calls;

/// Map a buffered upstream body into an OpenAI completion.
///
/// Non-JSON bodies become the assistant content; an SSE transcript is reduced
/// to its last JSON event. A JSON body carrying a non-200 `code` is an error.
pub fn transform_completion(body: &[u8], model: &str) -> Result<ChatCompletionResponse, GatewayError> {
    let text = String::from_utf8_lossy(body);
    let parsed = serde_json::from_str::<Value>(text.trim())
        .ok()
        .or_else(|| last_sse_event(&text));

    let Some(upstream) = parsed.filter(Value::is_object) else {
        return Ok(text_completion(model, text.trim().to_string()));
    };

    if let Some(code) = upstream.get("code").and_then(Value::as_u64).filter(|c| *c != 200) {
        let message = upstream
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Unknown error")
            .to_string();
        let status = u16::try_from(code).ok().filter(|c| (400..600).contains(c));
        return Err(GatewayError::UpstreamFatal { status, message });
    }
    if upstream.get("error").is_some_and(Value::is_object) {
        return Err(GatewayError::UpstreamFatal { status: None, message: upstream.to_string() });
    }

    let mut choices: Vec<Choice> = upstream
        .get("choices")
        .and_then(Value::as_array)
        .map(|list| list.iter().enumerate().map(|(i, c)| map_choice(i, c)).collect())
        .unwrap_or_default();

    if choices.is_empty() {
        let fallback = upstream
            .get("output_text")
            .or_else(|| upstream.get("text"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        choices.push(Choice {
            index: 0,
            message: ChatMessage::new("assistant", fallback),
            finish_reason: Some("stop".to_string()),
        });
    }

    Ok(ChatCompletionResponse {
        id: upstream
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| format!("chatcmpl-{}", Uuid::new_v4()), str::to_string),
        object: "chat.completion".to_string(),
        created: upstream.get("created").and_then(Value::as_i64).unwrap_or_else(|| Utc::now().timestamp()),
        model: model.to_string(),
        choices,
        usage: upstream.get("usage").and_then(extract_usage),
    })
}

fn text_completion(model: &str, content: String) -> ChatCompletionResponse {
    let (content, tool_calls) = extract_xml_tool_calls(&content);
    let finish_reason = finish_reason(None, !tool_calls.is_empty());
    ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                ..ChatMessage::new("assistant", content)
            },
            finish_reason: Some(finish_reason),
        }],
        usage: None,
    }
}

fn map_choice(position: usize, choice: &Value) -> Choice {
    let message = choice.get("message").or_else(|| choice.get("delta"));
    let text = |key: &str| {
        message.and_then(|m| m.get(key)).and_then(Value::as_str).map(str::to_string)
    };

    let mut tool_calls: Vec<ToolCall> = message
        .and_then(|m| m.get("tool_calls"))
        .and_then(Value::as_array)
        .map(|calls| calls.iter().filter_map(parse_tool_call).collect())
        .unwrap_or_default();
    let (content, xml_calls) = extract_xml_tool_calls(&text("content").unwrap_or_default());
    tool_calls.extend(xml_calls);
    let upstream_reason = choice.get("finish_reason").and_then(Value::as_str);
    let has_tool_calls = !tool_calls.is_empty();

    Choice {
        index: choice
            .get("index")
            .and_then(Value::as_u64)
            .and_then(|i| u32::try_from(i).ok())
            .unwrap_or(position as u32),
        message: ChatMessage {
            role: text("role").unwrap_or_else(|| "assistant".to_string()),
            content: Some(MessageContent::Text(content)),
            reasoning_content: text("reasoning_content"),
            tool_calls: has_tool_calls.then_some(tool_calls),
            ..ChatMessage::default()
        },
        finish_reason: Some(finish_reason(upstream_reason, has_tool_calls)),
    }
}

/// `tool_calls` when calls are present and upstream reported a plain stop;
/// `length` and filter stops are kept.
fn finish_reason(upstream: Option<&str>, has_tool_calls: bool) -> String {
    match upstream {
        None | Some("stop" | "tool_use" | "tool_calls") if has_tool_calls => "tool_calls".to_string(),
        None | Some("tool_use") => "stop".to_string(),
        Some(reason) => reason.to_string(),
    }
}

fn parse_tool_call(call: &Value) -> Option<ToolCall> {
    let function = call.get("function")?;
    Some(ToolCall {
        id: call
            .get("id")
            .and_then(Value::as_str)
            .map_or_else(|| format!("call_{}", Uuid::new_v4().simple()), str::to_string),
        r#type: call.get("type").and_then(Value::as_str).unwrap_or("function").to_string(),
        function: ToolFunction {
            name: function.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            arguments: stringify_arguments(function.get("arguments")),
        },
    })
}

/// Tool arguments must reach OpenAI clients as a JSON string.
pub fn stringify_arguments(arguments: Option<&Value>) -> String {
    match arguments {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "{}".to_string(),
        Some(other) => other.to_string(),
    }
}

/// Stringify object arguments inside raw `tool_calls` values in place.
pub fn normalize_tool_calls(calls: &mut [Value]) {
    for call in calls {
        if let Some(function) = call.get_mut("function").and_then(Value::as_object_mut) {
            if let Some(args) = function.get("arguments").filter(|a| !a.is_string() && !a.is_null()) {
                let text = args.to_string();
                function.insert("arguments".to_string(), Value::String(text));
            }
        }
    }
}

/// Reads `prompt_tokens`/`completion_tokens` or `input_tokens`/`output_tokens`.
pub fn extract_usage(usage: &Value) -> Option<Usage> {
    if !usage.is_object() {
        return None;
    }
    let field = |a: &str, b: &str| {
        usage.get(a).or_else(|| usage.get(b)).and_then(Value::as_u64).unwrap_or(0)
    };
    let prompt_tokens = field("prompt_tokens", "input_tokens");
    let completion_tokens = field("completion_tokens", "output_tokens");
    let total_tokens = usage
        .get("total_tokens")
        .and_then(Value::as_u64)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(Usage { prompt_tokens, completion_tokens, total_tokens })
}

fn last_sse_event(text: &str) -> Option<Value> {
    text.lines()
        .rev()
        .filter_map(|line| line.trim().strip_prefix("data:"))
        .map(str::trim)
        .filter(|payload| *payload != "[DONE]")
        .find_map(|payload| serde_json::from_str::<Value>(payload).ok())
}
