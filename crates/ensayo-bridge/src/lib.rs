//! Ensayo bridge sessions.
//!
//! A requester ([`BridgeClient`]) publishes a pairing descriptor out of band,
//! a responder ([`Responder`]) answers it through an untrusted relay, and
//! from then on every request and response travels as an authenticated
//! envelope the relay cannot read or replay.
//!
//! Layers:
//! - [`session`]: sans-io state machine for the requester
//! - [`correlator`]: pending calls matched to responses by id
//! - [`transport`]: relay seam, WebSocket adapter and in-memory relay
//! - [`client`] / [`responder`]: async drivers for both endpoints

#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod correlator;
pub mod responder;
pub mod session;
pub mod transport;

pub use client::{BridgeClient, SessionEvents};
pub use config::BridgeConfig;
pub use correlator::Correlator;
pub use responder::{AccountsHandler, RequestHandler, Responder, ResponderSession};
pub use session::{Effect, SessionContext, SessionEvent, SessionInput, SessionState};
pub use transport::{
    Connector, MemoryRelay, Transport, TransportEvent, TransportEvents, WsConnector,
};
