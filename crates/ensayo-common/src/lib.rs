//! Shared types for the Ensayo bridge: wire protocol, pairing URIs, errors, logging.
//!
//! This crate has no cryptography in it. It describes what travels between a
//! requester and a responder and how failures are named, so that the crypto
//! and session crates agree on both.

#![forbid(unsafe_code)]

pub mod error;
pub mod pairing;
pub mod protocol;

pub use error::{Error, Result};
pub use pairing::{PairingDescriptor, PeerMetadata};
pub use protocol::*;

/// Initialize tracing with sensible defaults.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Defaults to `info` if not set.
pub fn init_tracing() {
    init_tracing_with_default("info");
}

/// Initialize tracing with a specific default level.
pub fn init_tracing_with_default(default_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // A second init (e.g. from a test harness) is not an error worth failing on.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
