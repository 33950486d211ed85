// Tool calls written as XML inside assistant text
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;
use uuid::Uuid;

use keyrelay_types::protocol::{ToolCall, ToolFunction};

static BLOCK_REGEX: OnceLock<Regex> = OnceLock::new();
static INVOKE_REGEX: OnceLock<Regex> = OnceLock::new();
static PARAMETER_REGEX: OnceLock<Regex> = OnceLock::new();

fn get_block_regex() -> &'static Regex {
    BLOCK_REGEX.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?function_calls>(.*?)</(?:\w+:)?function_calls>")
            .expect("Function calls regex is valid")
    })
}

fn get_invoke_regex() -> &'static Regex {
    INVOKE_REGEX.get_or_init(|| {
        Regex::new(r#"(?s)<(?:\w+:)?invoke name="([^"]*)">(.*?)</(?:\w+:)?invoke>"#)
            .expect("Invoke regex is valid")
    })
}

fn get_parameter_regex() -> &'static Regex {
    PARAMETER_REGEX.get_or_init(|| {
        Regex::new(r#"(?s)<(?:\w+:)?parameter name="([^"]*)">(.*?)</(?:\w+:)?parameter>"#)
            .expect("Parameter regex is valid")
    })
}

/// Split `content` into plain text and the tool calls in its
/// `<function_calls>` blocks.
///
/// Tags may carry any `prefix:` namespace. Parameter values are trimmed
/// strings. Content without a block comes back unchanged.
pub fn extract_xml_tool_calls(content: &str) -> (String, Vec<ToolCall>) {
    let blocks = get_block_regex();
    if !blocks.is_match(content) {
        return (content.to_string(), Vec::new());
    }

    let calls: Vec<ToolCall> = blocks
        .captures_iter(content)
        .flat_map(|block| {
            let inner = block.get(1).map_or("", |m| m.as_str());
            get_invoke_regex().captures_iter(inner).map(|invoke| parse_invoke(&invoke)).collect::<Vec<_>>()
        })
        .collect();

    let cleaned = blocks.replace_all(content, "").trim().to_string();
    (cleaned, calls)
}

fn parse_invoke(invoke: &regex::Captures<'_>) -> ToolCall {
    let name = invoke.get(1).map_or("", |m| m.as_str());
    let body = invoke.get(2).map_or("", |m| m.as_str());

    let mut arguments = Map::new();
    for parameter in get_parameter_regex().captures_iter(body) {
        let key = parameter.get(1).map_or("", |m| m.as_str());
        let value = parameter.get(2).map_or("", |m| m.as_str().trim());
        arguments.insert(key.to_string(), Value::String(value.to_string()));
    }

    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(24);
    ToolCall {
        id: format!("call_{}", id),
        r#type: "function".to_string(),
        function: ToolFunction { name: name.to_string(), arguments: Value::Object(arguments).to_string() },
    }
}
