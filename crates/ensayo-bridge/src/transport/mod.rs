//! Relay transport seam.
//!
//! A transport carries opaque text frames for one session id. Delivery is
//! best effort: frames may be dropped, duplicated or reordered, and the
//! session layer is written to cope with all three. Sending never blocks;
//! inbound traffic arrives on an unbounded channel.

use ensayo_common::Result;
use tokio::sync::mpsc;

mod memory;
mod ws;

pub use memory::{MemoryEndpoint, MemoryRelay};
pub use ws::{relay_session_url, WsConnector};

/// Something the relay delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One text frame.
    Frame(String),
    /// The channel is gone, with a reason if one is known.
    Closed(Option<String>),
}

/// Inbound half of an open transport.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Outbound half of an open transport.
pub trait Transport: Send + Sync {
    /// Queue a frame for the relay.
    fn send(&self, frame: String) -> Result<()>;

    /// Close the channel. Idempotent.
    fn close(&self);
}

/// Opens transports keyed by session id.
pub trait Connector: Send + Sync {
    /// Start opening a channel for `session_id`.
    ///
    /// Returns immediately; connection failures surface later as
    /// [`TransportEvent::Closed`]. Must be called inside a Tokio runtime.
    fn open(&self, session_id: &str) -> Result<(Box<dyn Transport>, TransportEvents)>;
}
