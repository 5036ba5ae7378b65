//! Cryptographic core of the Ensayo bridge.
//!
//! This crate provides:
//! - X25519 ephemeral keypairs and HKDF-SHA256 session key derivation
//! - AES-256-GCM envelopes bound to their session, sender and counter
//! - Per-direction replay protection
//! - [`SecureChannel`], which composes the three for one session
//!
//! # Design
//!
//! The relay sees every frame, so nothing here trusts it:
//! - The session id salts key derivation, so a key never spans sessions
//! - Every envelope authenticates `session_id | sender_pub | counter` as AAD
//! - Counters are checked only after the tag verifies, so forged envelopes
//!   cannot move replay state

#![forbid(unsafe_code)]

pub mod channel;
pub mod envelope;
pub mod keys;
pub mod replay;

pub use channel::SecureChannel;
pub use envelope::Envelope;
pub use keys::{derive_shared_key, EphemeralKeypair, PublicKey, SessionKey};
pub use replay::{Direction, ReplayGuard};
