//! Async requester client.
//!
//! Drives a [`SessionContext`] over a relay transport: a background task
//! feeds inbound frames to the state machine and carries out its effects,
//! while callers send requests and await their responses.
//!
//! Outbound counter allocation, replay checks and pending-call bookkeeping
//! all happen under one lock, so concurrent callers never share a counter and
//! concurrently delivered envelopes are checked one at a time.

use ensayo_common::{
    Error, PairingDescriptor, Request, Result, WireFrame, METHOD_REQUEST_ACCOUNTS,
    METHOD_SIGN_TRANSACTIONS,
};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::BridgeConfig;
use crate::correlator::{CallReceiver, Correlator};
use crate::session::{Effect, SessionContext, SessionEvent, SessionInput, SessionState};
use crate::transport::{Connector, Transport, TransportEvent, TransportEvents};

/// Stream of lifecycle events for the application.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

struct Inner {
    session: SessionContext,
    correlator: Correlator,
    transport: Option<Box<dyn Transport>>,
}

struct Shared {
    config: BridgeConfig,
    connector: Arc<dyn Connector>,
    events: mpsc::UnboundedSender<SessionEvent>,
    inner: Mutex<Inner>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    /// Carry out effects, including any produced while doing so.
    fn apply(self: &Arc<Self>, inner: &mut Inner, effects: Vec<Effect>) {
        let mut queue: VecDeque<Effect> = effects.into();

        while let Some(effect) = queue.pop_front() {
            match effect {
                Effect::OpenTransport { session_id } => match self.connector.open(&session_id) {
                    Ok((transport, events)) => {
                        inner.transport = Some(transport);
                        tokio::spawn(pump(Arc::downgrade(self), session_id, events));
                    }
                    Err(e) => {
                        warn!("could not open relay channel for {}: {}", session_id, e);
                        let reason = e.to_string();
                        self.emit(SessionEvent::Error(e));
                        let closed = SessionInput::TransportClosed(Some(reason));
                        queue.extend(inner.session.dispatch(closed));
                    }
                },
                Effect::Emit(event) => self.emit(event),
                Effect::Deliver(response) => match inner.correlator.resolve(response) {
                    Ok(()) => {}
                    Err(Error::UnknownPendingId(id)) => {
                        debug!("dropping response for unknown call {}", id);
                    }
                    Err(e) => warn!("could not deliver response: {}", e),
                },
                Effect::RejectAll(error) => {
                    let rejected = inner.correlator.reject_all(error);
                    if rejected > 0 {
                        info!("rejected {} pending call(s)", rejected);
                    }
                }
                Effect::CloseTransport => {
                    if let Some(transport) = inner.transport.take() {
                        transport.close();
                    }
                }
            }
        }
    }
}

/// Feeds one session's inbound relay traffic into the state machine.
///
/// Holds the client weakly so dropping every handle ends the session.
async fn pump(shared: Weak<Shared>, session_id: String, mut events: TransportEvents) {
    while let Some(event) = events.recv().await {
        let Some(shared) = shared.upgrade() else {
            return;
        };
        let input = match event {
            TransportEvent::Frame(text) => match WireFrame::from_json(&text) {
                Ok(frame) => SessionInput::Frame(frame),
                Err(e) => {
                    warn!("ignoring unparsable relay frame: {}", e);
                    shared.emit(SessionEvent::Error(e));
                    continue;
                }
            },
            TransportEvent::Closed(reason) => SessionInput::TransportClosed(reason),
        };

        let mut inner = shared.lock();
        if inner.session.session_id() != Some(session_id.as_str()) {
            return;
        }
        let effects = inner.session.dispatch(input);
        shared.apply(&mut inner, effects);
        if inner.session.state() == SessionState::Ended {
            return;
        }
    }

    // Inbound channel vanished without a close notice.
    let Some(shared) = shared.upgrade() else {
        return;
    };
    let mut inner = shared.lock();
    if inner.session.session_id() == Some(session_id.as_str()) {
        let effects = inner.session.dispatch(SessionInput::TransportClosed(None));
        shared.apply(&mut inner, effects);
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(transport) = inner.transport.take() {
            transport.close();
        }
    }
}

/// Requester endpoint of the bridge.
///
/// Cloning is cheap; clones share the same session.
#[derive(Clone)]
pub struct BridgeClient {
    shared: Arc<Shared>,
}

impl BridgeClient {
    /// Create a client and the receiver for its lifecycle events.
    pub fn new(
        config: BridgeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<(Self, SessionEvents)> {
        config.validate()?;
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Inner {
            session: SessionContext::new(config.clone()),
            correlator: Correlator::new(),
            transport: None,
        };
        let client = Self {
            shared: Arc::new(Shared {
                config,
                connector,
                events: tx,
                inner: Mutex::new(inner),
            }),
        };
        Ok((client, rx))
    }

    /// Start pairing and return the descriptor to hand to the responder.
    ///
    /// A session that already left `Idle` is ended first and replaced with a
    /// fresh one, new id and new keypair included.
    ///
    /// Must be called from within a Tokio runtime, which runs the relay
    /// reader. Outside one it fails with [`Error::InvalidState`] and the
    /// session stays untouched.
    pub fn connect(&self) -> Result<PairingDescriptor> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::InvalidState(
                "connect must be called inside a Tokio runtime".into(),
            ));
        }
        let mut inner = self.shared.lock();
        if inner.session.state() != SessionState::Idle {
            let effects = inner.session.dispatch(SessionInput::Disconnect);
            self.shared.apply(&mut inner, effects);
            inner.session = SessionContext::new(self.shared.config.clone());
        }

        let effects = inner.session.dispatch(SessionInput::Start);
        let descriptor = effects.iter().find_map(|effect| match effect {
            Effect::Emit(SessionEvent::PairingReady { descriptor, .. }) => {
                Some(descriptor.clone())
            }
            _ => None,
        });
        self.shared.apply(&mut inner, effects);

        match (descriptor, inner.session.state()) {
            (Some(descriptor), SessionState::Pairing) => Ok(descriptor),
            (_, SessionState::Ended) => Err(Error::PeerDisconnected),
            (_, state) => Err(Error::InvalidState(format!("pairing did not start ({state})"))),
        }
    }

    /// Send a request and wait for its response.
    ///
    /// There is no built-in timeout; see [`Self::request_with_timeout`].
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let (_, rx) = self.send_request(method, params)?;
        rx.await.unwrap_or(Err(Error::PeerDisconnected))
    }

    /// Like [`Self::request`], giving up after `timeout`.
    pub async fn request_with_timeout(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value> {
        let (id, rx) = self.send_request(method, params)?;
        match tokio::time::timeout(timeout, rx).await {
            Ok(outcome) => outcome.unwrap_or(Err(Error::PeerDisconnected)),
            Err(_) => {
                self.shared.lock().correlator.cancel(&id);
                Err(Error::Timeout(format!("{method} got no response within {timeout:?}")))
            }
        }
    }

    /// Ask the responder for its accounts.
    pub async fn request_accounts(&self) -> Result<Vec<String>> {
        let result = self.request(METHOD_REQUEST_ACCOUNTS, json!({})).await?;
        let accounts = result.get("accounts").cloned().unwrap_or(result);
        serde_json::from_value(accounts).map_err(Error::malformed_payload)
    }

    /// Ask the responder to sign encoded transactions.
    pub async fn sign_transactions(&self, txs: Vec<String>) -> Result<Vec<String>> {
        let result = self
            .request(METHOD_SIGN_TRANSACTIONS, json!({ "txs": txs }))
            .await?;
        let signed = result.get("signedTxns").cloned().unwrap_or(result);
        serde_json::from_value(signed).map_err(Error::malformed_payload)
    }

    /// End the session. Pending calls are rejected and keys destroyed before
    /// this returns.
    pub fn disconnect(&self) {
        let mut inner = self.shared.lock();
        let effects = inner.session.dispatch(SessionInput::Disconnect);
        self.shared.apply(&mut inner, effects);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock().session.state()
    }

    pub fn session_id(&self) -> Option<String> {
        self.shared.lock().session.session_id().map(str::to_owned)
    }

    pub fn pending_calls(&self) -> usize {
        self.shared.lock().correlator.len()
    }

    pub fn has_key_material(&self) -> bool {
        self.shared.lock().session.has_key_material()
    }

    fn send_request(&self, method: &str, params: Value) -> Result<(String, CallReceiver)> {
        let id = Correlator::new_call_id();
        let request = Request {
            id: id.clone(),
            method: method.to_string(),
            params,
        };

        let mut inner = self.shared.lock();
        let text = inner.session.seal_request(&request)?.to_json()?;
        // Registered before sending so a fast response always finds its call.
        let rx = inner.correlator.register(id.clone(), method)?;
        let sent = match inner.transport.as_ref() {
            Some(transport) => transport.send(text),
            None => Err(Error::PeerDisconnected),
        };
        if let Err(e) = sent {
            inner.correlator.cancel(&id);
            return Err(e);
        }
        debug!("sent {} ({})", method, id);
        Ok((id, rx))
    }
}

impl std::fmt::Debug for BridgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("BridgeClient")
            .field("session", &inner.session)
            .field("pending", &inner.correlator.len())
            .finish()
    }
}
