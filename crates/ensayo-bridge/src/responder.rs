//! Responder endpoint.
//!
//! The responder scans a pairing descriptor, answers with its own ephemeral
//! public key and then serves encrypted requests. What each method does is
//! up to the application, behind [`RequestHandler`].

use ensayo_common::{
    Error, PairingDescriptor, PeerMetadata, Request, Response, Result, SessionProposal,
    WireFrame, METHOD_REQUEST_ACCOUNTS, SESSION_ACCEPT_ID,
};
use ensayo_crypto::{EphemeralKeypair, PublicKey, SecureChannel};
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::config::BridgeConfig;
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};

/// Application logic behind the responder.
///
/// `Err` values are sent back as the response's `error` field.
pub trait RequestHandler: Send + Sync {
    fn handle(&self, method: &str, params: &Value) -> std::result::Result<Value, Value>;
}

impl<F> RequestHandler for F
where
    F: Fn(&str, &Value) -> std::result::Result<Value, Value> + Send + Sync,
{
    fn handle(&self, method: &str, params: &Value) -> std::result::Result<Value, Value> {
        self(method, params)
    }
}

/// Answers `request_accounts` with a fixed list and rejects everything else.
#[derive(Debug, Clone, Default)]
pub struct AccountsHandler {
    pub accounts: Vec<String>,
}

impl AccountsHandler {
    pub fn new(accounts: Vec<String>) -> Self {
        Self { accounts }
    }
}

impl RequestHandler for AccountsHandler {
    fn handle(&self, method: &str, _params: &Value) -> std::result::Result<Value, Value> {
        match method {
            METHOD_REQUEST_ACCOUNTS => Ok(json!({ "accounts": self.accounts })),
            other => Err(json!({ "message": format!("unsupported method: {other}") })),
        }
    }
}

/// Responder half of an established session, without I/O.
#[derive(Debug)]
pub struct ResponderSession {
    channel: SecureChannel,
}

impl ResponderSession {
    /// Key a session from a scanned descriptor.
    ///
    /// Returns the session and the `session_proposal` frame to publish.
    pub fn accept(
        descriptor: &PairingDescriptor,
        metadata: Option<PeerMetadata>,
        context_label: &str,
    ) -> Result<(Self, WireFrame)> {
        let peer = PublicKey::from_base64(&descriptor.public_key)?;
        let keypair = EphemeralKeypair::generate();
        let public_key = keypair.public().to_base64();
        let channel =
            SecureChannel::establish(keypair, peer, descriptor.session_id.as_str(), context_label)?;

        let proposal = WireFrame::SessionProposal(SessionProposal {
            public_key,
            metadata,
        });
        Ok((Self { channel }, proposal))
    }

    pub fn session_id(&self) -> &str {
        self.channel.session_id()
    }

    pub fn channel(&self) -> &SecureChannel {
        &self.channel
    }

    /// Decrypt, replay-check and parse an incoming request.
    pub fn open_request(&mut self, frame: &WireFrame) -> Result<Request> {
        match frame {
            WireFrame::EncryptedRequest(payload) => self.channel.open(payload),
            other => Err(Error::InvalidState(format!(
                "expected encrypted_request, got {}",
                other.kind()
            ))),
        }
    }

    pub fn seal_response(&mut self, response: &Response) -> Result<WireFrame> {
        Ok(WireFrame::EncryptedResponse(self.channel.seal(response)?))
    }

    /// Frame telling the requester the session was accepted.
    pub fn accept_frame(&mut self, data: Value) -> Result<WireFrame> {
        self.seal_response(&Response::ok(SESSION_ACCEPT_ID, data))
    }
}

impl Zeroize for ResponderSession {
    fn zeroize(&mut self) {
        self.channel.zeroize();
    }
}

/// Responder bound to a relay transport.
///
/// Once the session ends, by decryption budget or [`Responder::close`], its
/// key is wiped and every further call fails with
/// [`Error::PeerDisconnected`].
pub struct Responder {
    session: Option<ResponderSession>,
    transport: Box<dyn Transport>,
    events: TransportEvents,
    max_decrypt_failures: u32,
    decrypt_failures: u32,
}

impl Responder {
    /// Join the descriptor's session on the relay and send the proposal.
    pub fn pair(
        descriptor: &PairingDescriptor,
        connector: &dyn Connector,
        config: &BridgeConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (session, proposal) = ResponderSession::accept(
            descriptor,
            Some(config.metadata.clone()),
            &config.context_label,
        )?;
        let (transport, events) = connector.open(&descriptor.session_id)?;
        transport.send(proposal.to_json()?)?;
        info!(
            "proposed session {} to {}",
            descriptor.session_id, descriptor.metadata.name
        );

        Ok(Self {
            session: Some(session),
            transport,
            events,
            max_decrypt_failures: config.max_decrypt_failures,
            decrypt_failures: 0,
        })
    }

    /// The live session, until it ends.
    pub fn session(&self) -> Option<&ResponderSession> {
        self.session.as_ref()
    }

    fn live_session(&mut self) -> Result<&mut ResponderSession> {
        self.session.as_mut().ok_or(Error::PeerDisconnected)
    }

    /// Send the `session_accept` response.
    pub fn accept_session(&mut self, data: Value) -> Result<()> {
        let frame = self.live_session()?.accept_frame(data)?;
        self.transport.send(frame.to_json()?)
    }

    /// Answer requests until the relay closes.
    ///
    /// Returns the number of requests answered. Replayed or unparsable
    /// requests are dropped; once `max_decrypt_failures` envelopes fail
    /// authentication the transport is closed and the failure returned.
    pub async fn serve<H: RequestHandler + ?Sized>(&mut self, handler: &H) -> Result<u64> {
        let mut served = 0u64;
        self.live_session()?;

        while let Some(event) = self.events.recv().await {
            let text = match event {
                TransportEvent::Frame(text) => text,
                TransportEvent::Closed(reason) => {
                    info!(
                        "session {} closed: {}",
                        self.live_session()?.session_id(),
                        reason.as_deref().unwrap_or("relay closed")
                    );
                    return Ok(served);
                }
            };

            let frame = match WireFrame::from_json(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!("ignoring unparsable frame: {}", e);
                    continue;
                }
            };
            if !matches!(frame, WireFrame::EncryptedRequest(_)) {
                debug!("ignoring {} frame", frame.kind());
                continue;
            }

            let request = match self.live_session()?.open_request(&frame) {
                Ok(request) => request,
                Err(e @ Error::DecryptionFailed(_)) => {
                    self.decrypt_failures += 1;
                    warn!(
                        "dropping request: {} ({}/{})",
                        e, self.decrypt_failures, self.max_decrypt_failures
                    );
                    if self.decrypt_failures >= self.max_decrypt_failures {
                        self.close();
                        return Err(e);
                    }
                    continue;
                }
                Err(e) => {
                    warn!("dropping request: {}", e);
                    continue;
                }
            };

            debug!("handling {} ({})", request.method, request.id);
            let response = match handler.handle(&request.method, &request.params) {
                Ok(result) => Response::ok(request.id, result),
                Err(error) => Response::err(request.id, error),
            };
            let frame = self.live_session()?.seal_response(&response)?;
            self.transport.send(frame.to_json()?)?;
            served += 1;
        }

        Ok(served)
    }

    /// Leave the relay room and wipe the session key. Idempotent.
    pub fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            info!("session {} closed locally", session.session_id());
            session.zeroize();
        }
        self.transport.close();
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        self.transport.close();
    }
}
