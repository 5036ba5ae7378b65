//! Pending-call registry keyed by request id.
//!
//! Responses are matched purely by id, so they may arrive in any order. A
//! response for an id that is unknown or already completed is reported as
//! [`Error::UnknownPendingId`] for the caller to drop; the relay gives no
//! at-most-once guarantee.

use ensayo_common::{Error, Response, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::debug;

/// Receiving half of one pending call.
pub type CallReceiver = oneshot::Receiver<Result<Value>>;

struct PendingCall {
    method: String,
    created_at: Instant,
    tx: oneshot::Sender<Result<Value>>,
}

#[derive(Default)]
pub struct Correlator {
    pending: HashMap<String, PendingCall>,
}

impl Correlator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh request id.
    pub fn new_call_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Register a call before its request is sent.
    pub fn register(
        &mut self,
        id: impl Into<String>,
        method: impl Into<String>,
    ) -> Result<CallReceiver> {
        let id = id.into();
        if self.pending.contains_key(&id) {
            return Err(Error::InvalidState(format!("call id {id} already pending")));
        }
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id,
            PendingCall {
                method: method.into(),
                created_at: Instant::now(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Complete the call a response belongs to.
    ///
    /// An `error` field rejects the call with [`Error::Remote`]; otherwise it
    /// resolves with `result`.
    pub fn resolve(&mut self, response: Response) -> Result<()> {
        let Some(call) = self.pending.remove(&response.id) else {
            return Err(Error::UnknownPendingId(response.id));
        };
        debug!(
            "call {} ({}) answered after {:?}",
            response.id,
            call.method,
            call.created_at.elapsed()
        );
        let outcome = response.into_outcome().map_err(Error::Remote);
        // The caller may have stopped waiting; that is not our concern.
        let _ = call.tx.send(outcome);
        Ok(())
    }

    /// Forget a call without completing it.
    pub fn cancel(&mut self, id: &str) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Fail every pending call with `error`. Returns how many were failed.
    pub fn reject_all(&mut self, error: Error) -> usize {
        let count = self.pending.len();
        for (id, call) in self.pending.drain() {
            debug!("rejecting call {} ({}): {}", id, call.method, error);
            let _ = call.tx.send(Err(error.clone()));
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("pending", &self.pending.len())
            .finish()
    }
}
