//! Error taxonomy for the bridge protocol.

use thiserror::Error;

/// Result type alias using the bridge error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for bridge operations.
///
/// `Clone` so that a single disconnect can reject every pending call with
/// the same cause.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    /// Public key bytes are not a usable X25519 point. Rejects that input only.
    #[error("malformed public key: {0}")]
    MalformedKey(String),

    /// Diffie-Hellman or HKDF failed. Fatal to the session.
    #[error("key agreement failed: {0}")]
    KeyAgreementFailed(String),

    /// Authentication tag did not verify under the session context.
    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    /// Counter did not advance past the last accepted value.
    #[error("replay detected: counter {counter} <= last accepted {last_accepted}")]
    ReplayDetected { counter: u64, last_accepted: u64 },

    /// Decryption succeeded but the plaintext is not a valid message.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    /// Transport closed or the session was disconnected.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// Response for an id with no matching pending call.
    #[error("no pending call with id {0}")]
    UnknownPendingId(String),

    /// Operation needs an established session.
    #[error("session not established")]
    NotEstablished,

    /// Operation is not valid in the current session state.
    #[error("invalid session state: {0}")]
    InvalidState(String),

    /// Error value returned by the peer for one specific call.
    #[error("remote error: {0}")]
    Remote(serde_json::Value),

    /// Relay transport failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Caller-level deadline elapsed.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Serialization/deserialization error outside of an encrypted payload.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create a malformed key error from any displayable type.
    pub fn malformed_key(msg: impl std::fmt::Display) -> Self {
        Self::MalformedKey(msg.to_string())
    }

    /// Create a key agreement error from any displayable type.
    pub fn key_agreement(msg: impl std::fmt::Display) -> Self {
        Self::KeyAgreementFailed(msg.to_string())
    }

    /// Create a decryption error from any displayable type.
    pub fn decryption(msg: impl std::fmt::Display) -> Self {
        Self::DecryptionFailed(msg.to_string())
    }

    /// Create a malformed payload error from any displayable type.
    pub fn malformed_payload(msg: impl std::fmt::Display) -> Self {
        Self::MalformedPayload(msg.to_string())
    }

    /// Create a transport error from any displayable type.
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Self::Transport(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Whether this error ends the session when it occurs.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Self::KeyAgreementFailed(_) | Self::PeerDisconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replay_message_names_both_counters() {
        let err = Error::ReplayDetected {
            counter: 3,
            last_accepted: 7,
        };
        assert_eq!(err.to_string(), "replay detected: counter 3 <= last accepted 7");
    }

    #[test]
    fn test_fatality() {
        assert!(Error::key_agreement("zero").is_session_fatal());
        assert!(Error::PeerDisconnected.is_session_fatal());
        assert!(!Error::decryption("tag").is_session_fatal());
        assert!(!Error::malformed_key("len").is_session_fatal());
    }
}
