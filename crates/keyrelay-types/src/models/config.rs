//! Gateway configuration models.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use validator::Validate;

/// Declared capacity for keys without an explicit one.
pub const DEFAULT_CAPACITY_PER_MINUTE: u32 = 30;

/// Models exposed on `/v1/models` until configured otherwise.
pub const DEFAULT_MODELS: &[&str] = &[
    "gpt-5",
    "gpt-5-nano",
    "gpt-5-mini",
    "gpt-4.1",
    "claude-4.5-sonnet-20250929",
    "claude-4-sonnet-20250514",
    "claude-3.5-haiku-20241022",
    "gemini-2.5-pro",
    "gemini-2.5-flash",
    "gemini-2.5-flash-lite",
];

// ============================================================================
// Enums
// ============================================================================

/// Tie-break strategy between equally loaded keys.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AggregationMode {
    #[default]
    RoundRobin,
    Random,
}

impl fmt::Display for AggregationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregationMode::RoundRobin => write!(f, "round_robin"),
            AggregationMode::Random => write!(f, "random"),
        }
    }
}

/// How `stream=true` requests are served.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StreamingMode {
    /// Synchronous upstream call with heartbeat frames
    #[default]
    Fake,
    /// Relay the upstream SSE stream
    Real,
}

impl StreamingMode {
    /// Parse from string.
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "real" | "true" => StreamingMode::Real,
            _ => StreamingMode::Fake,
        }
    }
}

impl fmt::Display for StreamingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamingMode::Fake => write!(f, "fake"),
            StreamingMode::Real => write!(f, "real"),
        }
    }
}

/// How the gateway rewrites `max_tokens` from the model's completion limit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MaxTokensMode {
    /// Leave the client's value alone
    #[default]
    Off,
    /// At most 4096 tokens
    Low,
    /// Half the model limit
    Medium,
    /// The full model limit
    High,
}

impl MaxTokensMode {
    /// Parse from string; unknown values turn the rewrite off.
    pub fn from_string(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => MaxTokensMode::Low,
            "medium" => MaxTokensMode::Medium,
            "high" => MaxTokensMode::High,
            _ => MaxTokensMode::Off,
        }
    }

    /// `max_tokens` to send for a model whose limit is `model_max`.
    pub fn target(self, model_max: u32) -> Option<u32> {
        match self {
            MaxTokensMode::Off => None,
            MaxTokensMode::Low => Some(model_max.min(4096)),
            MaxTokensMode::Medium => Some(model_max / 2),
            MaxTokensMode::High => Some(model_max),
        }
    }
}

impl fmt::Display for MaxTokensMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaxTokensMode::Off => write!(f, "off"),
            MaxTokensMode::Low => write!(f, "low"),
            MaxTokensMode::Medium => write!(f, "medium"),
            MaxTokensMode::High => write!(f, "high"),
        }
    }
}

// ============================================================================
// Sections
// ============================================================================

/// Inbound listener and client authentication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[validate(range(min = 1))]
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bearer token clients present on `/v1/*`
    #[validate(length(min = 1))]
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Token for `/api/*`; falls back to `api_key` when unset
    #[serde(default)]
    pub admin_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: default_api_key(),
            admin_key: None,
        }
    }
}

impl ServerConfig {
    pub fn effective_admin_key(&self) -> &str {
        self.admin_key.as_deref().filter(|k| !k.is_empty()).unwrap_or(&self.api_key)
    }

    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    7861
}

fn default_api_key() -> String {
    "pwd".to_string()
}

/// Upstream aggregation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct UpstreamConfig {
    #[validate(length(min = 1))]
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Derived from `endpoint` when unset
    #[serde(default)]
    pub models_endpoint: Option<String>,
    /// Wall-clock timeout for one upstream call, in seconds
    #[validate(range(min = 1, max = 3600))]
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Models listed on `/v1/models`
    #[serde(default = "default_models")]
    pub models: Vec<String>,
    /// Requested model -> upstream model
    #[serde(default)]
    pub model_mapping: HashMap<String, String>,
    /// Outbound proxy (`http`, `https`, `socks5`, `socks5h`)
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub max_tokens_mode: MaxTokensMode,
    /// Completion limits that override the built-in table
    #[serde(default)]
    pub model_limits: HashMap<String, u32>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            models_endpoint: None,
            timeout_secs: default_timeout_secs(),
            models: default_models(),
            model_mapping: HashMap::new(),
            proxy_url: None,
            max_tokens_mode: MaxTokensMode::Off,
            model_limits: HashMap::new(),
        }
    }
}

impl UpstreamConfig {
    pub fn effective_models_endpoint(&self) -> String {
        if let Some(endpoint) = self.models_endpoint.as_ref().filter(|e| !e.is_empty()) {
            return endpoint.clone();
        }
        match self.endpoint.strip_suffix("/chat/completions") {
            Some(base) => format!("{}/models", base),
            None => format!("{}/models", self.endpoint.trim_end_matches('/')),
        }
    }
}

fn default_endpoint() -> String {
    "https://llm-gateway.assemblyai.com/v1/chat/completions".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_models() -> Vec<String> {
    DEFAULT_MODELS.iter().map(|m| (*m).to_string()).collect()
}

/// One configured credential.
///
/// Accepts either a bare string or an object in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(from = "CredentialEntry")]
pub struct CredentialConfig {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity_per_minute: Option<u32>,
    pub enabled: bool,
}

impl CredentialConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), label: None, capacity_per_minute: None, enabled: true }
    }

    /// Parse a comma separated key list.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        raw.split(',').map(str::trim).filter(|k| !k.is_empty()).map(Self::new).collect()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CredentialEntry {
    Plain(String),
    Detailed {
        key: String,
        #[serde(default)]
        label: Option<String>,
        #[serde(default)]
        capacity_per_minute: Option<u32>,
        #[serde(default = "default_true")]
        enabled: bool,
    },
}

impl From<CredentialEntry> for CredentialConfig {
    fn from(entry: CredentialEntry) -> Self {
        match entry {
            CredentialEntry::Plain(key) => Self::new(key),
            CredentialEntry::Detailed { key, label, capacity_per_minute, enabled } => {
                Self { key, label, capacity_per_minute, enabled }
            },
        }
    }
}

/// Key rotation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct RotationConfig {
    /// Consecutive picks of one key before a forced rotation
    #[validate(range(min = 1))]
    #[serde(default = "default_calls_per_rotation")]
    pub calls_per_rotation: u32,
    #[serde(default)]
    pub mode: AggregationMode,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self { calls_per_rotation: default_calls_per_rotation(), mode: AggregationMode::default() }
    }
}

fn default_calls_per_rotation() -> u32 {
    100
}

/// Retry budget and fixed delay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct RetryConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total upstream calls per request, the first one included
    #[validate(range(min = 1, max = 100))]
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_interval_ms")]
    pub interval_ms: u64,
    /// Rotate keys on ambiguous upstream 400s
    #[serde(default = "default_true")]
    pub rotate_on_bad_request: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            interval_ms: default_retry_interval_ms(),
            rotate_on_bad_request: true,
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// Automatic ban policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct BanConfig {
    #[serde(default)]
    pub auto_ban: bool,
    #[serde(default = "default_ban_codes")]
    pub status_codes: Vec<u16>,
}

impl Default for BanConfig {
    fn default() -> Self {
        Self { auto_ban: false, status_codes: default_ban_codes() }
    }
}

impl BanConfig {
    pub fn is_ban_status(&self, status: u16) -> bool {
        self.status_codes.contains(&status)
    }
}

fn default_ban_codes() -> Vec<u16> {
    vec![401, 403]
}

/// Streaming behavior.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct StreamingConfig {
    #[serde(default)]
    pub mode: StreamingMode,
    #[validate(range(min = 100))]
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Model prefix forcing fake streaming regardless of `mode`
    #[serde(default = "default_fake_stream_prefix")]
    pub fake_stream_prefix: String,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            mode: StreamingMode::default(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            fake_stream_prefix: default_fake_stream_prefix(),
        }
    }
}

fn default_heartbeat_interval_ms() -> u64 {
    3000
}

fn default_fake_stream_prefix() -> String {
    "fake-stream/".to_string()
}

/// Backend candidates, tried in order Redis, Postgres, MongoDB, file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct StorageConfig {
    #[serde(default)]
    pub redis_url: Option<String>,
    #[serde(default)]
    pub postgres_url: Option<String>,
    #[serde(default)]
    pub mongodb_uri: Option<String>,
    #[serde(default)]
    pub mongodb_database: Option<String>,
    /// Directory of the file backend; platform data dir when unset
    #[serde(default)]
    pub data_dir: Option<String>,
    /// Seconds to wait for each backend during startup
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            redis_url: None,
            postgres_url: None,
            mongodb_uri: None,
            mongodb_database: None,
            data_dir: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn mongodb_database_name(&self) -> &str {
        self.mongodb_database.as_deref().filter(|d| !d.is_empty()).unwrap_or("keyrelay")
    }
}

fn default_connect_timeout_secs() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Main Configuration
// ============================================================================

/// Full gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Validate)]
pub struct GatewayConfig {
    #[serde(default)]
    #[validate(nested)]
    pub server: ServerConfig,
    #[serde(default)]
    #[validate(nested)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub credentials: Vec<CredentialConfig>,
    #[serde(default = "default_capacity")]
    pub default_capacity_per_minute: u32,
    #[serde(default)]
    #[validate(nested)]
    pub rotation: RotationConfig,
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetryConfig,
    #[serde(default)]
    #[validate(nested)]
    pub ban: BanConfig,
    #[serde(default)]
    #[validate(nested)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    #[validate(nested)]
    pub storage: StorageConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            upstream: UpstreamConfig::default(),
            credentials: Vec::new(),
            default_capacity_per_minute: default_capacity(),
            rotation: RotationConfig::default(),
            retry: RetryConfig::default(),
            ban: BanConfig::default(),
            streaming: StreamingConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

impl GatewayConfig {
    /// Resolve configured credentials, dropping duplicates and empty keys.
    pub fn resolved_credentials(&self) -> Vec<super::Credential> {
        let mut seen = std::collections::HashSet::new();
        self.credentials
            .iter()
            .filter(|c| !c.key.trim().is_empty())
            .map(|c| super::Credential::from_config(c, self.default_capacity_per_minute))
            .filter(|c| seen.insert(c.id.clone()))
            .collect()
    }
}

fn default_capacity() -> u32 {
    DEFAULT_CAPACITY_PER_MINUTE
}
