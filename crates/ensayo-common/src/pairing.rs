//! Pairing descriptor: what the requester hands out of band (URI / QR code).
//!
//! ```text
//! tdea-ensayo:?session=<uuid>&pub=<base64url x25519>&name=<display name>[&url=..][&icon=..]
//! ```

use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::error::{Error, Result};
use crate::protocol::PAIRING_SCHEME;

/// Display information a peer announces about itself.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PeerMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl PeerMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Session id, requester public key and requester metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairingDescriptor {
    pub session_id: String,
    /// Base64url-encoded X25519 public key.
    pub public_key: String,
    pub metadata: PeerMetadata,
}

impl PairingDescriptor {
    /// Encode with the default scheme.
    pub fn to_uri(&self) -> String {
        self.to_uri_with_scheme(PAIRING_SCHEME)
    }

    pub fn to_uri_with_scheme(&self, scheme: &str) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query
            .append_pair("session", &self.session_id)
            .append_pair("pub", &self.public_key)
            .append_pair("name", &self.metadata.name);
        if let Some(url) = &self.metadata.url {
            query.append_pair("url", url);
        }
        if let Some(icon) = &self.metadata.icon {
            query.append_pair("icon", icon);
        }
        format!("{}:?{}", scheme, query.finish())
    }

    /// Parse a URI with the default scheme.
    pub fn parse(uri: &str) -> Result<Self> {
        Self::parse_with_scheme(uri, PAIRING_SCHEME)
    }

    pub fn parse_with_scheme(uri: &str, scheme: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix(scheme)
            .and_then(|r| r.strip_prefix(':'))
            .ok_or_else(|| Error::malformed_payload(format!("pairing uri must use {scheme}:")))?;
        let query = rest.strip_prefix('?').unwrap_or(rest);

        let mut session_id = None;
        let mut public_key = None;
        let mut metadata = PeerMetadata::default();
        let mut has_name = false;

        for (key, value) in form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "session" => session_id = Some(value.into_owned()),
                "pub" => public_key = Some(value.into_owned()),
                "name" => {
                    metadata.name = value.into_owned();
                    has_name = true;
                }
                "url" => metadata.url = Some(value.into_owned()),
                "icon" => metadata.icon = Some(value.into_owned()),
                _ => {}
            }
        }

        let session_id = session_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::malformed_payload("pairing uri missing session"))?;
        let public_key = public_key
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::malformed_payload("pairing uri missing pub"))?;
        if !has_name {
            return Err(Error::malformed_payload("pairing uri missing name"));
        }

        Ok(Self {
            session_id,
            public_key,
            metadata,
        })
    }
}
