//! Requester session state machine.
//!
//! `SessionContext` owns every piece of per-session state: the ephemeral
//! keypair while pairing, the keyed [`SecureChannel`] once established, and
//! the decryption-failure budget. It performs no I/O. Each input goes through
//! [`SessionContext::dispatch`], which updates the state and returns the
//! effects the driver must carry out, in order.
//!
//! ```text
//! Idle --Start--> Pairing --SessionProposal--> Established
//!   \                \                             /
//!    +--------------- +--- Disconnect / fatal ----+--> Ended
//! ```
//!
//! `Ended` is terminal. Pairing again needs a new context.

use ensayo_common::{
    EncryptedPayload, Error, PairingDescriptor, Request, Response, Result, SessionProposal,
    WireFrame, SESSION_ACCEPT_ID,
};
use ensayo_crypto::{EphemeralKeypair, PublicKey, SecureChannel};
use serde_json::Value;
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::BridgeConfig;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pairing,
    Established,
    Ended,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Pairing => "pairing",
            Self::Established => "established",
            Self::Ended => "ended",
        };
        f.write_str(name)
    }
}

/// Lifecycle event surfaced to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Descriptor ready to be shown out of band.
    PairingReady {
        uri: String,
        descriptor: PairingDescriptor,
    },
    /// Shared key derived from the responder's proposal.
    Established { peer: SessionProposal },
    /// Responder accepted the session, with its acceptance data.
    Accepted(Value),
    /// Session ended; no further events follow.
    Disconnected { reason: String },
    /// Session-level failure not attributable to any pending call.
    Error(Error),
}

/// Work the driver performs after a dispatch.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    OpenTransport { session_id: String },
    Emit(SessionEvent),
    /// Hand an authenticated response to the correlator.
    Deliver(Response),
    /// Fail every pending call with this error.
    RejectAll(Error),
    CloseTransport,
}

/// Input to the state machine.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionInput {
    Start,
    Frame(WireFrame),
    TransportClosed(Option<String>),
    Disconnect,
}

/// All mutable state of one requester session.
pub struct SessionContext {
    config: BridgeConfig,
    state: SessionState,
    session_id: Option<String>,
    keypair: Option<EphemeralKeypair>,
    channel: Option<SecureChannel>,
    decrypt_failures: u32,
}

impl SessionContext {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            state: SessionState::Idle,
            session_id: None,
            keypair: None,
            channel: None,
            decrypt_failures: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Session id, once pairing has started.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Whether any private or shared key is still held.
    pub fn has_key_material(&self) -> bool {
        self.keypair.is_some() || self.channel.is_some()
    }

    pub fn decrypt_failures(&self) -> u32 {
        self.decrypt_failures
    }

    /// Feed one input and collect the resulting effects.
    pub fn dispatch(&mut self, input: SessionInput) -> Vec<Effect> {
        match input {
            SessionInput::Start => self.start(),
            SessionInput::Frame(frame) => self.on_frame(frame),
            SessionInput::TransportClosed(reason) => {
                self.end(reason.unwrap_or_else(|| "transport closed".to_string()))
            }
            SessionInput::Disconnect => self.end("disconnected by caller"),
        }
    }

    /// Encrypt a request under the next outbound counter.
    pub fn seal_request(&mut self, request: &Request) -> Result<WireFrame> {
        match (self.state, self.channel.as_mut()) {
            (SessionState::Established, Some(channel)) => {
                Ok(WireFrame::EncryptedRequest(channel.seal(request)?))
            }
            (SessionState::Ended, _) => Err(Error::PeerDisconnected),
            _ => Err(Error::NotEstablished),
        }
    }

    fn start(&mut self) -> Vec<Effect> {
        if self.state != SessionState::Idle {
            return vec![Effect::Emit(SessionEvent::Error(Error::InvalidState(
                format!("cannot start a session that is {}", self.state),
            )))];
        }

        let session_id = uuid::Uuid::new_v4().to_string();
        let keypair = EphemeralKeypair::generate();
        let descriptor = PairingDescriptor {
            session_id: session_id.clone(),
            public_key: keypair.public().to_base64(),
            metadata: self.config.metadata.clone(),
        };
        let uri = descriptor.to_uri_with_scheme(&self.config.pairing_scheme);

        self.keypair = Some(keypair);
        self.session_id = Some(session_id.clone());
        self.state = SessionState::Pairing;
        info!("session {} pairing", session_id);

        vec![
            Effect::OpenTransport { session_id },
            Effect::Emit(SessionEvent::PairingReady { uri, descriptor }),
        ]
    }

    fn on_frame(&mut self, frame: WireFrame) -> Vec<Effect> {
        match frame {
            WireFrame::SessionProposal(proposal) => self.on_proposal(proposal),
            WireFrame::EncryptedResponse(payload) => self.on_response(&payload),
            WireFrame::EncryptedRequest(_) => {
                debug!("ignoring encrypted_request on the requester side");
                Vec::new()
            }
        }
    }

    fn on_proposal(&mut self, proposal: SessionProposal) -> Vec<Effect> {
        match self.state {
            SessionState::Pairing => {}
            SessionState::Established => {
                warn!("second session proposal; re-keying is not allowed");
                let mut effects = vec![Effect::Emit(SessionEvent::Error(Error::InvalidState(
                    "session proposal after establishment".into(),
                )))];
                effects.extend(self.end("unexpected session proposal"));
                return effects;
            }
            SessionState::Idle | SessionState::Ended => {
                debug!("ignoring session proposal while {}", self.state);
                return Vec::new();
            }
        }

        let peer = match PublicKey::from_base64(&proposal.public_key) {
            Ok(peer) => peer,
            Err(e) => {
                warn!("rejecting session proposal: {}", e);
                return self.fail(e, "malformed session proposal");
            }
        };

        let (Some(keypair), Some(session_id)) = (self.keypair.take(), self.session_id.clone())
        else {
            return self.end("pairing state lost its keypair");
        };

        let label = self.config.context_label.as_str();
        match SecureChannel::establish(keypair, peer, session_id.as_str(), label) {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = SessionState::Established;
                info!("session {} established with {}", session_id, peer);
                vec![Effect::Emit(SessionEvent::Established { peer: proposal })]
            }
            Err(e) => {
                warn!("session {} key agreement failed: {}", session_id, e);
                self.fail(e, "key agreement failed")
            }
        }
    }

    fn on_response(&mut self, payload: &EncryptedPayload) -> Vec<Effect> {
        if self.state != SessionState::Established {
            debug!("dropping encrypted_response while {}", self.state);
            return Vec::new();
        }
        let Some(channel) = self.channel.as_mut() else {
            return Vec::new();
        };

        match channel.open::<Response>(payload) {
            Ok(response) if response.id == SESSION_ACCEPT_ID => {
                match response.into_outcome() {
                    Ok(data) => {
                        info!("session accepted by responder");
                        vec![Effect::Emit(SessionEvent::Accepted(data))]
                    }
                    Err(reason) => {
                        vec![Effect::Emit(SessionEvent::Error(Error::Remote(reason)))]
                    }
                }
            }
            Ok(response) => vec![Effect::Deliver(response)],
            Err(e @ Error::DecryptionFailed(_)) => {
                self.decrypt_failures += 1;
                warn!(
                    "dropping envelope {}: {} ({}/{})",
                    payload.counter, e, self.decrypt_failures, self.config.max_decrypt_failures
                );
                let mut effects = vec![Effect::Emit(SessionEvent::Error(e))];
                if self.decrypt_failures >= self.config.max_decrypt_failures {
                    effects.extend(self.end("too many decryption failures"));
                }
                effects
            }
            Err(e) => {
                warn!("dropping envelope {}: {}", payload.counter, e);
                self.fail(e, "channel failure")
            }
        }
    }

    /// Report `error`, ending the session when the error is fatal to it.
    fn fail(&mut self, error: Error, reason: &str) -> Vec<Effect> {
        let fatal = error.is_session_fatal();
        let mut effects = vec![Effect::Emit(SessionEvent::Error(error))];
        if fatal {
            effects.extend(self.end(reason));
        }
        effects
    }

    /// Release all key material. The returned channel, if any, is already
    /// wiped; the X25519 secret is zeroized as it drops.
    fn take_keys(&mut self) -> Option<SecureChannel> {
        self.keypair = None;
        let mut channel = self.channel.take()?;
        channel.zeroize();
        Some(channel)
    }

    /// Move to `Ended`, destroying key material. Idempotent.
    fn end(&mut self, reason: impl Into<String>) -> Vec<Effect> {
        if self.state == SessionState::Ended {
            return Vec::new();
        }
        let reason = reason.into();
        self.state = SessionState::Ended;
        drop(self.take_keys());
        info!(
            "session {} ended: {}",
            self.session_id.as_deref().unwrap_or("-"),
            reason
        );

        vec![
            Effect::RejectAll(Error::PeerDisconnected),
            Effect::CloseTransport,
            Effect::Emit(SessionEvent::Disconnected { reason }),
        ]
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("channel", &self.channel)
            .field("decrypt_failures", &self.decrypt_failures)
            .finish_non_exhaustive()
    }
}
