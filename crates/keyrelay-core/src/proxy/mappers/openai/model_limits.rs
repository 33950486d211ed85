// Per-model completion limits for the max_tokens rewrite
use std::cmp::Reverse;
use std::collections::HashMap;

use keyrelay_types::MaxTokensMode;

/// Limit for models matching nothing in the table.
pub const DEFAULT_MAX_TOKENS: u32 = 8192;

const DEFAULT_MODEL_LIMITS: &[(&str, u32)] = &[
    ("gpt-5", 16384),
    ("gpt-5-mini", 16384),
    ("gpt-5-nano", 8192),
    ("gpt-4.1", 32768),
    ("gpt-4.1-mini", 16384),
    ("gpt-4.1-nano", 8192),
    ("gpt-oss-120b", 8192),
    ("gpt-oss-20b", 8192),
    ("chatgpt-4o", 16384),
    ("claude-4-opus", 8192),
    ("claude-4.5-sonnet", 8192),
    ("claude-4-sonnet", 8192),
    ("claude-4.5-haiku", 8192),
    ("claude-3.5-haiku", 8192),
    ("claude-3-haiku", 4096),
    ("gemini-3-pro", 65536),
    ("gemini-2.5-pro", 65536),
    ("gemini-2.5-flash", 65536),
    ("gemini-2.5-flash-lite", 32768),
];

/// Lowercase, `-` for spaces and underscores, known aliases folded.
pub fn normalize_model_id(model: &str) -> String {
    let normalized = model.trim().to_lowercase().replace([' ', '_'], "-");
    match normalized.as_str() {
        "chatgpt-4o-latest" => "chatgpt-4o".to_string(),
        _ => normalized,
    }
}

/// Completion limit for `model`.
///
/// Exact matches win, `overrides` before the built-in table. Otherwise the
/// longest table entry that contains or is contained in the id is used, so
/// dated names like `claude-4.5-sonnet-20250929` resolve to their family.
pub fn model_max_tokens(model: &str, overrides: &HashMap<String, u32>) -> u32 {
    let id = normalize_model_id(model);
    if id.is_empty() {
        return DEFAULT_MAX_TOKENS;
    }
    let overrides: Vec<(String, u32)> =
        overrides.iter().map(|(name, limit)| (normalize_model_id(name), *limit)).collect();

    if let Some((_, limit)) = overrides.iter().find(|(name, _)| *name == id) {
        return *limit;
    }
    if let Some((_, limit)) = DEFAULT_MODEL_LIMITS.iter().find(|(name, _)| *name == id) {
        return *limit;
    }

    overrides
        .iter()
        .map(|(name, limit)| (name.as_str(), *limit, 0u8))
        .chain(DEFAULT_MODEL_LIMITS.iter().map(|(name, limit)| (*name, *limit, 1u8)))
        .filter(|(name, _, _)| id.contains(name) || name.contains(id.as_str()))
        .min_by_key(|(name, _, source)| (Reverse(name.len()), *source, *name))
        .map_or(DEFAULT_MAX_TOKENS, |(_, limit, _)| limit)
}

/// `max_tokens` to send under `mode`, or `None` to keep the client's value.
pub fn adaptive_max_tokens(
    mode: MaxTokensMode,
    model: &str,
    overrides: &HashMap<String, u32>,
) -> Option<u32> {
    match mode {
        MaxTokensMode::Off => None,
        _ => mode.target(model_max_tokens(model, overrides)),
    }
}
