//! Wire frames and plaintext message schemas.
//!
//! Frames travel through the relay as JSON text:
//!
//! ```text
//! { "type": "session_proposal",   "payload": { "publicKey": "...", "metadata": {...} } }
//! { "type": "encrypted_request",  "payload": <envelope> }
//! { "type": "encrypted_response", "payload": <envelope> }
//!
//! envelope = { "iv": "...", "ct": "...", "counter": 1, "senderPub": "..." }
//! ```
//!
//! All binary fields are base64url strings. The plaintext inside `ct` is a
//! [`Request`] or a [`Response`] serialized as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::pairing::PeerMetadata;

/// URI scheme of pairing descriptors.
pub const PAIRING_SCHEME: &str = "tdea-ensayo";

/// HKDF info string binding derived keys to this protocol.
pub const KDF_CONTEXT: &str = "tdea-bridge";

/// Reserved response id carrying the responder's acceptance of a session.
pub const SESSION_ACCEPT_ID: &str = "session_accept";

/// Method asking the responder for the accounts it exposes.
pub const METHOD_REQUEST_ACCOUNTS: &str = "request_accounts";

/// Method asking the responder to sign a batch of encoded transactions.
pub const METHOD_SIGN_TRANSACTIONS: &str = "sign_transactions";

/// Responder's answer to a pairing descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionProposal {
    pub public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<PeerMetadata>,
}

/// Encoded AEAD envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPayload {
    pub iv: String,
    pub ct: String,
    pub counter: u64,
    pub sender_pub: String,
}

/// A frame exchanged through the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WireFrame {
    SessionProposal(SessionProposal),
    EncryptedRequest(EncryptedPayload),
    EncryptedResponse(EncryptedPayload),
}

impl WireFrame {
    /// Parse a frame from relay text.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(Error::serialization)
    }

    /// Serialize a frame for the relay.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::serialization)
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionProposal(_) => "session_proposal",
            Self::EncryptedRequest(_) => "encrypted_request",
            Self::EncryptedResponse(_) => "encrypted_response",
        }
    }
}

/// Method call from requester to responder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

/// Answer to a [`Request`], carrying either `result` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl Response {
    pub fn ok(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: Value) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Collapse into the call outcome. An explicit `error` wins over `result`;
    /// a response with neither resolves to `null`.
    pub fn into_outcome(self) -> std::result::Result<Value, Value> {
        match (self.error, self.result) {
            (Some(error), _) => Err(error),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_shape_matches_relay_format() {
        let frame = WireFrame::EncryptedRequest(EncryptedPayload {
            iv: "aXY".into(),
            ct: "Y3Q".into(),
            counter: 4,
            sender_pub: "cHVi".into(),
        });
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "encrypted_request",
                "payload": { "iv": "aXY", "ct": "Y3Q", "counter": 4, "senderPub": "cHVi" }
            })
        );
    }

    #[test]
    fn test_proposal_without_metadata() {
        let frame =
            WireFrame::from_json(r#"{"type":"session_proposal","payload":{"publicKey":"abc"}}"#)
                .unwrap();
        assert_eq!(
            frame,
            WireFrame::SessionProposal(SessionProposal {
                public_key: "abc".into(),
                metadata: None,
            })
        );
        assert_eq!(frame.kind(), "session_proposal");
    }

    #[test]
    fn test_unknown_frame_type_rejected() {
        let err = WireFrame::from_json(r#"{"type":"hello","payload":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_response_outcome() {
        let ok: Response =
            serde_json::from_value(json!({"id": "a", "result": {"accounts": ["X"]}})).unwrap();
        assert_eq!(ok.into_outcome(), Ok(json!({"accounts": ["X"]})));

        let err: Response =
            serde_json::from_value(json!({"id": "b", "error": "user rejected"})).unwrap();
        assert_eq!(err.into_outcome(), Err(json!("user rejected")));

        let empty: Response = serde_json::from_value(json!({"id": "c"})).unwrap();
        assert_eq!(empty.into_outcome(), Ok(Value::Null));
    }

    #[test]
    fn test_request_params_default_to_null() {
        let req: Request =
            serde_json::from_value(json!({"id": "1", "method": "request_accounts"})).unwrap();
        assert_eq!(req.params, Value::Null);
    }
}
