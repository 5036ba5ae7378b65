//! In-process relay for tests and local demos.
//!
//! Behaves like the WebSocket relay: endpoints join a room keyed by session
//! id and every frame is forwarded to the other members of that room. The
//! relay keeps a bounded log of forwarded frames so a test can play the
//! attacker and re-inject, reorder or tamper with them.

use ensayo_common::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::debug;

use super::{Connector, Transport, TransportEvent, TransportEvents};

/// Frames kept per room; older ones are dropped first.
pub const HISTORY_LIMIT: usize = 256;

#[derive(Default)]
struct Room {
    members: Vec<(u64, mpsc::UnboundedSender<TransportEvent>)>,
    history: VecDeque<String>,
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<String, Room>,
    next_member: u64,
}

/// Shared in-memory relay. Clones refer to the same relay.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RelayState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Join the room for `session_id`.
    pub fn join(&self, session_id: &str) -> (MemoryEndpoint, TransportEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut state = self.lock();
        state.next_member += 1;
        let member = state.next_member;
        state
            .rooms
            .entry(session_id.to_string())
            .or_default()
            .members
            .push((member, tx));
        debug!("member {} joined relay room {}", member, session_id);

        (
            MemoryEndpoint {
                relay: self.clone(),
                session_id: session_id.to_string(),
                member,
            },
            rx,
        )
    }

    /// The last [`HISTORY_LIMIT`] frames forwarded in the room, oldest first.
    pub fn history(&self, session_id: &str) -> Vec<String> {
        self.lock()
            .rooms
            .get(session_id)
            .map(|room| room.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Deliver a frame to every member of the room, as a hostile relay would.
    pub fn inject(&self, session_id: &str, frame: impl Into<String>) -> usize {
        let frame = frame.into();
        let mut state = self.lock();
        let Some(room) = state.rooms.get_mut(session_id) else {
            return 0;
        };
        room.members.retain(|(_, tx)| !tx.is_closed());
        for (_, tx) in &room.members {
            let _ = tx.send(TransportEvent::Frame(frame.clone()));
        }
        room.members.len()
    }

    /// Drop the room, telling every member the channel closed.
    pub fn shutdown_session(&self, session_id: &str, reason: &str) {
        if let Some(room) = self.lock().rooms.remove(session_id) {
            for (_, tx) in room.members {
                let _ = tx.send(TransportEvent::Closed(Some(reason.to_string())));
            }
        }
    }

    /// Number of live members in a room.
    pub fn members(&self, session_id: &str) -> usize {
        self.lock()
            .rooms
            .get(session_id)
            .map(|room| room.members.iter().filter(|(_, tx)| !tx.is_closed()).count())
            .unwrap_or(0)
    }

    fn forward(&self, session_id: &str, from: u64, frame: String) -> Result<()> {
        let mut state = self.lock();
        let room = state
            .rooms
            .get_mut(session_id)
            .ok_or_else(|| Error::transport("relay room closed"))?;
        if !room.members.iter().any(|(id, _)| *id == from) {
            return Err(Error::transport("endpoint left the relay room"));
        }
        for (id, tx) in &room.members {
            if *id != from {
                let _ = tx.send(TransportEvent::Frame(frame.clone()));
            }
        }
        if room.history.len() == HISTORY_LIMIT {
            room.history.pop_front();
        }
        room.history.push_back(frame);
        Ok(())
    }

    fn leave(&self, session_id: &str, member: u64) {
        if let Some(room) = self.lock().rooms.get_mut(session_id) {
            room.members.retain(|(id, _)| *id != member);
        }
    }
}

impl Connector for MemoryRelay {
    fn open(&self, session_id: &str) -> Result<(Box<dyn Transport>, TransportEvents)> {
        let (endpoint, events) = self.join(session_id);
        Ok((Box::new(endpoint), events))
    }
}

/// One member of a [`MemoryRelay`] room.
pub struct MemoryEndpoint {
    relay: MemoryRelay,
    session_id: String,
    member: u64,
}

impl MemoryEndpoint {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

impl Transport for MemoryEndpoint {
    fn send(&self, frame: String) -> Result<()> {
        self.relay.forward(&self.session_id, self.member, frame)
    }

    fn close(&self) {
        self.relay.leave(&self.session_id, self.member);
    }
}
