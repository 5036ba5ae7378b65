//! AES-256-GCM envelopes bound to session, sender and counter.
//!
//! # Wire Format
//!
//! ```text
//! iv        = 12 random bytes, fresh per envelope
//! ct        = AES-256-GCM(key, iv, plaintext, aad) with the 16-byte tag appended
//! aad       = utf8("{session_id}|{sender_pub_b64url}|{counter}")
//! ```
//!
//! Moving an envelope to another session, swapping the sender key, or
//! changing the counter changes the AAD, so the tag no longer verifies.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Key, Nonce,
};
use ensayo_common::{EncryptedPayload, Error, Result};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Serialize};

use crate::keys::{decode_b64, encode_b64, PublicKey, SessionKey};

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM tag length.
pub const TAG_LEN: usize = 16;

/// Decoded form of an [`EncryptedPayload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
    pub counter: u64,
    pub sender: PublicKey,
}

impl Envelope {
    pub fn to_wire(&self) -> EncryptedPayload {
        EncryptedPayload {
            iv: encode_b64(&self.nonce),
            ct: encode_b64(&self.ciphertext),
            counter: self.counter,
            sender_pub: self.sender.to_base64(),
        }
    }

    /// Decode the transmissible strings.
    ///
    /// # Errors
    /// `DecryptionFailed` for a sender key, iv or ciphertext that could never
    /// authenticate. A mangled sender key is relay tampering like any other.
    pub fn from_wire(payload: &EncryptedPayload) -> Result<Self> {
        let sender = PublicKey::from_base64(&payload.sender_pub)
            .map_err(|e| Error::decryption(format!("bad sender key: {e}")))?;
        let nonce: [u8; NONCE_LEN] = decode_b64(&payload.iv)
            .map_err(|e| Error::decryption(format!("bad iv encoding: {e}")))?
            .try_into()
            .map_err(|_| Error::decryption("iv must be 12 bytes"))?;
        let ciphertext = decode_b64(&payload.ct)
            .map_err(|e| Error::decryption(format!("bad ciphertext encoding: {e}")))?;
        if ciphertext.len() < TAG_LEN {
            return Err(Error::decryption("ciphertext shorter than tag"));
        }
        Ok(Self {
            nonce,
            ciphertext,
            counter: payload.counter,
            sender,
        })
    }
}

/// Build the associated data for one envelope.
pub fn associated_data(session_id: &str, sender: &PublicKey, counter: u64) -> Vec<u8> {
    format!("{}|{}|{}", session_id, sender.to_base64(), counter).into_bytes()
}

fn cipher(key: &SessionKey) -> Aes256Gcm {
    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()))
}

/// Encrypt `plaintext` under a fresh random nonce.
///
/// The caller must never pass the same `counter` twice under one key.
pub fn encrypt(
    key: &SessionKey,
    plaintext: &[u8],
    session_id: &str,
    sender: &PublicKey,
    counter: u64,
) -> Result<Envelope> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let aad = associated_data(session_id, sender, counter);
    let ciphertext = cipher(key)
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| Error::malformed_payload(format!("AES-GCM encryption failed: {e}")))?;

    Ok(Envelope {
        nonce,
        ciphertext,
        counter,
        sender: *sender,
    })
}

/// Authenticate and decrypt an envelope claimed to come from `expected_sender`.
///
/// # Errors
/// `DecryptionFailed` if the claimed sender is not the expected one or the
/// tag does not verify. Nothing about the plaintext is revealed either way.
pub fn decrypt(
    key: &SessionKey,
    envelope: &Envelope,
    session_id: &str,
    expected_sender: &PublicKey,
) -> Result<Vec<u8>> {
    if envelope.sender != *expected_sender {
        return Err(Error::decryption("envelope sender is not the session peer"));
    }

    let aad = associated_data(session_id, &envelope.sender, envelope.counter);
    cipher(key)
        .decrypt(
            Nonce::from_slice(&envelope.nonce),
            Payload {
                msg: &envelope.ciphertext,
                aad: &aad,
            },
        )
        .map_err(|_| Error::decryption("authentication tag mismatch"))
}

/// Serialize a message as JSON and encrypt it.
pub fn seal_json<T: Serialize>(
    key: &SessionKey,
    message: &T,
    session_id: &str,
    sender: &PublicKey,
    counter: u64,
) -> Result<Envelope> {
    let plaintext = serde_json::to_vec(message).map_err(Error::serialization)?;
    encrypt(key, &plaintext, session_id, sender, counter)
}

/// Parse decrypted bytes. A failure here is `MalformedPayload`, never a
/// cryptographic error.
pub fn parse_json<T: DeserializeOwned>(plaintext: &[u8]) -> Result<T> {
    serde_json::from_slice(plaintext).map_err(Error::malformed_payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::EphemeralKeypair;
    use serde_json::{json, Value};
    use std::collections::HashSet;

    fn key() -> SessionKey {
        SessionKey::from_bytes([0x42; 32])
    }

    fn sender() -> PublicKey {
        EphemeralKeypair::generate().public()
    }

    #[test]
    fn test_roundtrip() {
        let (key, sender) = (key(), sender());
        let env = encrypt(&key, b"hello bridge", "s1", &sender, 1).unwrap();
        assert_eq!(env.ciphertext.len(), b"hello bridge".len() + TAG_LEN);

        let plaintext = decrypt(&key, &env, "s1", &sender).unwrap();
        assert_eq!(plaintext, b"hello bridge");
    }

    #[test]
    fn test_wrong_session_fails() {
        let (key, sender) = (key(), sender());
        let env = encrypt(&key, b"x", "s1", &sender, 1).unwrap();
        assert!(matches!(
            decrypt(&key, &env, "s2", &sender),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_counter_is_authenticated() {
        let (key, sender) = (key(), sender());
        let mut env = encrypt(&key, b"x", "s1", &sender, 7).unwrap();
        env.counter = 8;
        assert!(decrypt(&key, &env, "s1", &sender).is_err());
    }

    #[test]
    fn test_sender_substitution_fails() {
        let (key, sender, other) = (key(), sender(), sender());
        let mut env = encrypt(&key, b"x", "s1", &sender, 1).unwrap();

        // Relay claims a different sender that the receiver expects.
        env.sender = other;
        assert!(decrypt(&key, &env, "s1", &other).is_err());
        // Or keeps the sender but the receiver expects someone else.
        env.sender = sender;
        assert!(decrypt(&key, &env, "s1", &other).is_err());
    }

    #[test]
    fn test_bit_flip_fails() {
        let (key, sender) = (key(), sender());
        let mut env = encrypt(&key, b"sign these", "s1", &sender, 1).unwrap();
        env.ciphertext[0] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &env, "s1", &sender),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_nonces_are_fresh() {
        let (key, sender) = (key(), sender());
        let mut seen = HashSet::new();
        for counter in 1..=500 {
            let env = encrypt(&key, b"same plaintext", "s1", &sender, counter).unwrap();
            assert!(seen.insert(env.nonce), "nonce reused at counter {}", counter);
        }
    }

    #[test]
    fn test_wire_roundtrip_and_validation() {
        let (key, sender) = (key(), sender());
        let env = encrypt(&key, b"x", "s1", &sender, 3).unwrap();
        let wire = env.to_wire();
        assert_eq!(Envelope::from_wire(&wire).unwrap(), env);

        let mut short_iv = wire.clone();
        short_iv.iv = encode_b64(&[0u8; 8]);
        assert!(matches!(
            Envelope::from_wire(&short_iv),
            Err(Error::DecryptionFailed(_))
        ));

        let mut bad_sender = wire;
        bad_sender.sender_pub = "AAAA".into();
        assert!(matches!(
            Envelope::from_wire(&bad_sender),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_json_helpers() {
        let (key, sender) = (key(), sender());
        let env = seal_json(&key, &json!({"id": "1"}), "s1", &sender, 1).unwrap();
        let plaintext = decrypt(&key, &env, "s1", &sender).unwrap();
        let value: Value = parse_json(&plaintext).unwrap();
        assert_eq!(value, json!({"id": "1"}));

        assert!(matches!(
            parse_json::<Value>(b"{not json"),
            Err(Error::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_associated_data_layout() {
        let sender = PublicKey::import(&[1u8; 32]).unwrap();
        let aad = associated_data("abc", &sender, 12);
        assert_eq!(
            String::from_utf8(aad).unwrap(),
            format!("abc|{}|12", sender.to_base64())
        );
    }
}
