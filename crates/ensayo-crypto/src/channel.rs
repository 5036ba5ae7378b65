//! Encrypted channel for one established session.
//!
//! Combines the derived session key with counter tracking:
//! - Outbound counters start at 1 and are reserved before encryption
//! - Inbound envelopes are authenticated first, then replay-checked, then parsed
//!
//! Dropping the channel zeroizes the session key; [`Zeroize::zeroize`] wipes
//! it in place, after which the channel refuses to seal or open.

use ensayo_common::{EncryptedPayload, Error, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::debug;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::envelope::{self, Envelope};
use crate::keys::{derive_shared_key, EphemeralKeypair, PublicKey, SessionKey};
use crate::replay::{Direction, ReplayGuard};

/// Session-scoped encryption state shared by requester and responder.
pub struct SecureChannel {
    session_id: String,
    local_public: PublicKey,
    peer_public: PublicKey,
    key: SessionKey,
    guard: ReplayGuard,
}

impl SecureChannel {
    /// Run key agreement and build the channel.
    ///
    /// The local keypair is consumed; its secret is gone once this returns.
    pub fn establish(
        local: EphemeralKeypair,
        peer_public: PublicKey,
        session_id: impl Into<String>,
        context_label: &str,
    ) -> Result<Self> {
        let session_id = session_id.into();
        let local_public = local.public();
        let key = derive_shared_key(local, &peer_public, &session_id, context_label)?;
        debug!("session {} keyed with peer {}", session_id, peer_public);

        Ok(Self {
            session_id,
            local_public,
            peer_public,
            key,
            guard: ReplayGuard::new(),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn local_public(&self) -> &PublicKey {
        &self.local_public
    }

    pub fn peer_public(&self) -> &PublicKey {
        &self.peer_public
    }

    /// Encrypt a message with the next outbound counter.
    pub fn seal<T: Serialize>(&mut self, message: &T) -> Result<EncryptedPayload> {
        self.ensure_keyed()?;
        let counter = self.guard.next_outbound()?;
        let env = envelope::seal_json(
            &self.key,
            message,
            &self.session_id,
            &self.local_public,
            counter,
        )?;
        Ok(env.to_wire())
    }

    /// Decrypt a peer envelope with replay protection.
    ///
    /// # Errors
    /// - `DecryptionFailed`: counter state untouched
    /// - `ReplayDetected`: authentic but not newer than the last accepted
    /// - `MalformedPayload`: authentic and fresh, but not a `T`
    pub fn open<T: DeserializeOwned>(&mut self, payload: &EncryptedPayload) -> Result<T> {
        self.ensure_keyed()?;
        let env = Envelope::from_wire(payload)?;
        let plaintext = envelope::decrypt(&self.key, &env, &self.session_id, &self.peer_public)?;

        // Only update after successful decryption
        self.guard.check_and_advance(Direction::Inbound, env.counter)?;

        envelope::parse_json(&plaintext)
    }

    /// Whether the session key has been wiped.
    pub fn is_wiped(&self) -> bool {
        self.key.is_zeroed()
    }

    fn ensure_keyed(&self) -> Result<()> {
        if self.is_wiped() {
            return Err(Error::PeerDisconnected);
        }
        Ok(())
    }

    /// Highest inbound counter accepted so far.
    pub fn last_inbound_counter(&self) -> u64 {
        self.guard.last_accepted(Direction::Inbound)
    }
}

impl Zeroize for SecureChannel {
    fn zeroize(&mut self) {
        self.key.zeroize();
    }
}

// The only secret field is a `SessionKey`, which wipes itself on drop.
impl ZeroizeOnDrop for SecureChannel {}

impl std::fmt::Debug for SecureChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecureChannel")
            .field("session_id", &self.session_id)
            .field("local_public", &self.local_public)
            .field("peer_public", &self.peer_public)
            .field("guard", &self.guard)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ensayo_common::{Request, Response};
    use serde_json::json;

    fn create_channel_pair() -> (SecureChannel, SecureChannel) {
        let requester = EphemeralKeypair::generate();
        let responder = EphemeralKeypair::generate();
        let (req_pub, resp_pub) = (requester.public(), responder.public());

        let a = SecureChannel::establish(requester, resp_pub, "sess", "tdea-bridge").unwrap();
        let b = SecureChannel::establish(responder, req_pub, "sess", "tdea-bridge").unwrap();
        (a, b)
    }

    fn request(id: &str) -> Request {
        Request {
            id: id.into(),
            method: "request_accounts".into(),
            params: json!({}),
        }
    }

    #[test]
    fn test_request_response_exchange() {
        let (mut requester, mut responder) = create_channel_pair();

        let wire = requester.seal(&request("a")).unwrap();
        assert_eq!(wire.counter, 1);
        let received: Request = responder.open(&wire).unwrap();
        assert_eq!(received, request("a"));

        let wire = responder
            .seal(&Response::ok("a", json!({"accounts": ["ADDR1"]})))
            .unwrap();
        let answer: Response = requester.open(&wire).unwrap();
        assert_eq!(answer.into_outcome(), Ok(json!({"accounts": ["ADDR1"]})));
    }

    #[test]
    fn test_replay_protection() {
        let (mut requester, mut responder) = create_channel_pair();

        let wire = requester.seal(&request("a")).unwrap();
        let _: Request = responder.open(&wire).unwrap();

        let replay = responder.open::<Request>(&wire);
        assert!(matches!(replay, Err(Error::ReplayDetected { counter: 1, .. })));
    }

    #[test]
    fn test_wiped_channel_refuses_traffic() {
        let (mut requester, mut responder) = create_channel_pair();
        let wire = requester.seal(&request("a")).unwrap();
        assert!(!responder.is_wiped());

        responder.zeroize();
        assert!(responder.is_wiped());
        assert_eq!(responder.open::<Request>(&wire), Err(Error::PeerDisconnected));
        assert_eq!(
            responder.seal(&request("b")).map(|_| ()),
            Err(Error::PeerDisconnected)
        );
    }

    #[test]
    fn test_counters_increase() {
        let (mut requester, _) = create_channel_pair();

        let c1 = requester.seal(&request("1")).unwrap().counter;
        let c2 = requester.seal(&request("2")).unwrap().counter;
        let c3 = requester.seal(&request("3")).unwrap().counter;

        assert_eq!((c1, c2, c3), (1, 2, 3));
    }

    #[test]
    fn test_forged_envelope_does_not_move_counter() {
        let (mut requester, mut responder) = create_channel_pair();

        let mut wire = requester.seal(&request("a")).unwrap();
        wire.counter = 50;
        assert!(matches!(
            responder.open::<Request>(&wire),
            Err(Error::DecryptionFailed(_))
        ));
        assert_eq!(responder.last_inbound_counter(), 0);
    }

    #[test]
    fn test_own_envelope_reflected_back_fails() {
        let (mut requester, _) = create_channel_pair();

        // The relay echoes our own request back at us.
        let wire = requester.seal(&request("a")).unwrap();
        assert!(matches!(
            requester.open::<Response>(&wire),
            Err(Error::DecryptionFailed(_))
        ));
    }

    #[test]
    fn test_wrong_shape_is_malformed_payload() {
        let (mut requester, mut responder) = create_channel_pair();

        let wire = requester.seal(&json!({"unexpected": true})).unwrap();
        assert!(matches!(
            responder.open::<Request>(&wire),
            Err(Error::MalformedPayload(_))
        ));
        // Authentic envelope still consumed its counter.
        assert_eq!(responder.last_inbound_counter(), 1);
    }
}
