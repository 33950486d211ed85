//! Typed error definitions for KeyRelay.
//!
//! All errors are serializable for admin API responses and matchable for
//! retry decisions.

mod config;
mod gateway;

pub use config::ConfigError;
pub use gateway::GatewayError;

/// Standard Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_serialization() {
        let err = GatewayError::NoUsableKey { tried: 3 };

        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("NoUsableKey"));

        let deserialized: GatewayError = serde_json::from_str(&json).unwrap();
        assert_eq!(err, deserialized);
    }

    #[test]
    fn test_error_display() {
        let err = GatewayError::RetriesExhausted {
            attempts: 5,
            last_error: "HTTP 429".to_string(),
        };

        let msg = format!("{}", err);
        assert!(msg.contains('5'));
        assert!(msg.contains("HTTP 429"));
    }
}
