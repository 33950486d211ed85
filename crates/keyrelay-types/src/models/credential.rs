//! Upstream credential model.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::config::CredentialConfig;

/// An upstream-issued secret with its own rate-limit capacity.
///
/// The secret never appears in `Debug` output; use [`Credential::masked`]
/// for anything that reaches a log line or an API response.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    /// Stable id derived from the secret
    pub id: String,
    pub secret: String,
    pub label: Option<String>,
    /// Declared calls per minute, used until upstream headers say otherwise
    pub capacity_per_minute: u32,
    /// Disabled in configuration
    pub enabled: bool,
}

impl Credential {
    pub fn new(secret: impl Into<String>, capacity_per_minute: u32) -> Self {
        let secret = secret.into();
        Self {
            id: credential_id(&secret),
            secret,
            label: None,
            capacity_per_minute: capacity_per_minute.max(1),
            enabled: true,
        }
    }

    pub fn from_config(config: &CredentialConfig, default_capacity: u32) -> Self {
        let mut credential =
            Self::new(config.key.trim(), config.capacity_per_minute.unwrap_or(default_capacity));
        credential.label.clone_from(&config.label);
        credential.enabled = config.enabled;
        credential
    }

    pub fn masked(&self) -> String {
        mask_secret(&self.secret)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("secret", &self.masked())
            .field("label", &self.label)
            .field("capacity_per_minute", &self.capacity_per_minute)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// First 16 hex chars of the SHA-256 of the secret.
pub fn credential_id(secret: &str) -> String {
    let digest = Sha256::digest(secret.as_bytes());
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// `abcd...wxyz`, or `ab***` for short secrets.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        let head: String = chars.iter().take(2).collect();
        return format!("{}***", head);
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}...{}", head, tail)
}

/// Persisted administrative state of a credential.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyState {
    #[serde(default)]
    pub banned: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ban_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banned_at: Option<i64>,
    /// Admin toggle; overrides `enabled` from configuration
    #[serde(default)]
    pub disabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credential_id_is_stable() {
        let a = credential_id("sk-live-123456789");
        let b = credential_id("sk-live-123456789");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, credential_id("sk-live-987654321"));
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd...mnop");
        assert_eq!(mask_secret("short"), "sh***");
        assert_eq!(mask_secret("12345678"), "12***");
    }

    #[test]
    fn test_debug_hides_secret() {
        let credential = Credential::new("super-secret-value-0001", 30);
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("super-secret-value-0001"));
        assert!(debug.contains("supe...0001"));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        assert_eq!(Credential::new("k", 0).capacity_per_minute, 1);
    }
}
