//! Bridge configuration.

use ensayo_common::{Error, PeerMetadata, Result, KDF_CONTEXT, PAIRING_SCHEME};
use serde::{Deserialize, Serialize};
use std::path::Path;
use url::Url;

/// Relay used when none is configured.
pub const DEFAULT_RELAY_URL: &str = "ws://localhost:8080";

/// Decryption failures tolerated before a session is torn down.
pub const DEFAULT_MAX_DECRYPT_FAILURES: u32 = 3;

/// Settings shared by requester and responder endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket relay base URL; the session id is appended as `?session=`.
    pub relay_url: String,
    /// Scheme of pairing descriptor URIs.
    pub pairing_scheme: String,
    /// HKDF info string. Both peers must agree on it.
    pub context_label: String,
    /// Total `DecryptionFailed` events after which the session ends.
    pub max_decrypt_failures: u32,
    /// What this endpoint announces about itself.
    pub metadata: PeerMetadata,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            pairing_scheme: PAIRING_SCHEME.to_string(),
            context_label: KDF_CONTEXT.to_string(),
            max_decrypt_failures: DEFAULT_MAX_DECRYPT_FAILURES,
            metadata: PeerMetadata::named("Ensayo"),
        }
    }
}

impl BridgeConfig {
    pub fn with_metadata(mut self, metadata: PeerMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_relay_url(mut self, relay_url: impl Into<String>) -> Self {
        self.relay_url = relay_url.into();
        self
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("reading {}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| Error::config(format!("parsing {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let relay = Url::parse(&self.relay_url)
            .map_err(|e| Error::config(format!("invalid relay_url {:?}: {}", self.relay_url, e)))?;
        if !matches!(relay.scheme(), "ws" | "wss") {
            return Err(Error::config(format!(
                "relay_url must be ws:// or wss://, got {}",
                relay.scheme()
            )));
        }
        if self.pairing_scheme.is_empty() || self.pairing_scheme.contains(':') {
            return Err(Error::config("pairing_scheme must be a bare, non-empty scheme"));
        }
        if self.context_label.is_empty() {
            return Err(Error::config("context_label must not be empty"));
        }
        if self.max_decrypt_failures == 0 {
            return Err(Error::config("max_decrypt_failures must be at least 1"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BridgeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pairing_scheme, "tdea-ensayo");
        assert_eq!(config.context_label, "tdea-bridge");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let json = r#"{"relay_url": "wss://relay.example/ws", "metadata": {"name": "dapp"}}"#;
        let config: BridgeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.relay_url, "wss://relay.example/ws");
        assert_eq!(config.metadata.name, "dapp");
        assert_eq!(config.max_decrypt_failures, DEFAULT_MAX_DECRYPT_FAILURES);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let bad_url = BridgeConfig::default().with_relay_url("http://relay");
        assert!(matches!(bad_url.validate(), Err(Error::Config(_))));

        let mut zero = BridgeConfig::default();
        zero.max_decrypt_failures = 0;
        assert!(zero.validate().is_err());

        let mut label = BridgeConfig::default();
        label.context_label.clear();
        assert!(label.validate().is_err());

        let mut scheme = BridgeConfig::default();
        scheme.pairing_scheme = "a:b".into();
        assert!(scheme.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let err = BridgeConfig::load("/nonexistent/ensayo.json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
