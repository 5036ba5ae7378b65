//! X25519 key agreement and session key derivation.
//!
//! Each pairing uses fresh ephemeral keys on both ends. The raw
//! Diffie-Hellman output is never used directly:
//!
//! ```text
//! ikm         = X25519(local_secret, peer_public)
//! session_key = HKDF-SHA256(salt = session_id, ikm, info = context_label)[..32]
//! ```
//!
//! Salting with the session id means two sessions derive different keys even
//! if a caller bug reuses the same pair of keys.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ensayo_common::{Error, Result};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use std::fmt;
use x25519_dalek::{EphemeralSecret, PublicKey as X25519Public};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of public keys and session keys in bytes.
pub const KEY_LEN: usize = 32;

/// Encode bytes as unpadded base64url.
pub fn encode_b64(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, accepting padded input as well.
pub fn decode_b64(s: &str) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(s.trim_end_matches('='))
}

/// Raw X25519 public key, ours or the peer's.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; KEY_LEN]);

impl PublicKey {
    /// Reconstruct a public key received from a peer.
    ///
    /// # Errors
    /// `MalformedKey` if the input is not exactly 32 bytes or is the
    /// all-zero point.
    pub fn import(bytes: &[u8]) -> Result<Self> {
        let raw: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            Error::malformed_key(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        if raw.iter().all(|b| *b == 0) {
            return Err(Error::malformed_key("all-zero public key"));
        }
        Ok(Self(raw))
    }

    /// Parse the base64url form used in descriptors and frames.
    pub fn from_base64(s: &str) -> Result<Self> {
        let bytes = decode_b64(s).map_err(|e| Error::malformed_key(format!("bad base64url: {e}")))?;
        Self::import(&bytes)
    }

    pub fn to_base64(&self) -> String {
        encode_b64(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_base64())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Ephemeral X25519 keypair.
///
/// The secret half is consumed by [`derive_shared_key`], so it can only ever
/// take part in one agreement. The secret is zeroized on drop.
pub struct EphemeralKeypair {
    secret: EphemeralSecret,
    public: PublicKey,
}

impl EphemeralKeypair {
    /// Generate a new keypair using the OS CSPRNG.
    pub fn generate() -> Self {
        let secret = EphemeralSecret::random_from_rng(OsRng);
        let public = PublicKey(X25519Public::from(&secret).to_bytes());
        Self { secret, public }
    }

    /// Exported public key for transmission.
    pub fn public(&self) -> PublicKey {
        self.public
    }
}

impl fmt::Debug for EphemeralKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralKeypair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// 256-bit symmetric key for envelope encryption. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKey([u8; KEY_LEN]);

impl SessionKey {
    /// Wrap existing key bytes (test vectors, interop).
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// True once the key has been wiped. Derivation never yields all zeros.
    pub fn is_zeroed(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionKey([REDACTED])")
    }
}

/// Run X25519 with the peer key and stretch the result into a session key.
///
/// Consumes `local` so its secret is wiped as soon as the agreement is done.
///
/// # Errors
/// `KeyAgreementFailed` if the exchange is non-contributory (low-order peer
/// point), if HKDF fails, or if the output is all zero. No key is returned
/// in any of those cases.
pub fn derive_shared_key(
    local: EphemeralKeypair,
    peer: &PublicKey,
    session_id: &str,
    context_label: &str,
) -> Result<SessionKey> {
    let peer_point = X25519Public::from(*peer.as_bytes());
    let shared = local.secret.diffie_hellman(&peer_point);
    if !shared.was_contributory() {
        return Err(Error::key_agreement("non-contributory peer public key"));
    }

    let hkdf = Hkdf::<Sha256>::new(Some(session_id.as_bytes()), shared.as_bytes());
    let mut okm = [0u8; KEY_LEN];
    if let Err(e) = hkdf.expand(context_label.as_bytes(), &mut okm) {
        okm.zeroize();
        return Err(Error::key_agreement(format!("HKDF expand failed: {e}")));
    }

    let key = SessionKey(okm);
    okm.zeroize();
    if key.0.iter().all(|b| *b == 0) {
        return Err(Error::key_agreement("derived an all-zero key"));
    }
    Ok(key)
}
