//! Per-direction counters for replay protection.
//!
//! Unlike a sliding window, the bridge accepts a counter only if it is
//! strictly greater than the last one accepted in that direction. A lower
//! counter arriving late (relay reordering) is rejected the same way a
//! replay is; callers treat that as a dropped frame, not a fatal error.
//!
//! # Thread Safety
//!
//! This implementation is NOT thread-safe. Callers hold it behind the same
//! lock that guards the session, which makes check-and-advance atomic.

use ensayo_common::{Error, Result};

/// Which way a message travels relative to the local endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Counters we generate for our own envelopes.
    Outbound,
    /// Counters claimed by the peer's envelopes.
    Inbound,
}

impl Direction {
    fn index(self) -> usize {
        match self {
            Self::Outbound => 0,
            Self::Inbound => 1,
        }
    }
}

/// Last accepted counter per direction. Both start at 0, so the first valid
/// counter is 1.
#[derive(Debug, Clone, Default)]
pub struct ReplayGuard {
    last_accepted: [u64; 2],
}

impl ReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if a counter would be accepted.
    ///
    /// Does NOT update internal state. Use `check_and_advance` for that.
    pub fn check(&self, direction: Direction, counter: u64) -> bool {
        counter > self.last_accepted[direction.index()]
    }

    /// Accept `counter` if it advances the direction, otherwise fail with
    /// `ReplayDetected` and leave state untouched.
    pub fn check_and_advance(&mut self, direction: Direction, counter: u64) -> Result<()> {
        if !self.check(direction, counter) {
            return Err(Error::ReplayDetected {
                counter,
                last_accepted: self.last_accepted(direction),
            });
        }
        self.last_accepted[direction.index()] = counter;
        Ok(())
    }

    /// Reserve the next outbound counter.
    pub fn next_outbound(&mut self) -> Result<u64> {
        let next = self.last_accepted[Direction::Outbound.index()]
            .checked_add(1)
            .ok_or_else(|| Error::InvalidState("outbound counter exhausted".into()))?;
        self.check_and_advance(Direction::Outbound, next)?;
        Ok(next)
    }

    /// Get the last accepted counter for a direction.
    pub fn last_accepted(&self, direction: Direction) -> u64 {
        self.last_accepted[direction.index()]
    }
}
