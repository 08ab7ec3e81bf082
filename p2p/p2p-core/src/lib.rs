//! # Galena P2P Core
//!
//! The peer plumbing the reactors stand on: stable peer identities,
//! cooperative connection shutdown, per-channel send queues and the
//! [`Switch`] registry of connected peers.
//!
//! This crate does not dial, accept or frame connections. A connection task
//! (out of scope here) owns the receiving end of each peer's channel queues
//! and a [`ConnectionGuard`]; everything else holds [`ConnectionHandle`]s
//! and [`Peer`]s.
use std::fmt;

pub mod error;
pub mod handles;
mod peer;
mod switch;

pub use error::PeerError;
pub use handles::{ConnectionGuard, ConnectionHandle, HandleBuilder};
pub use peer::{Peer, PeerChannels};
pub use switch::Switch;

/// A stable peer identifier, assigned at handshake and immutable for the
/// lifetime of the connection.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId([u8; 20]);

impl PeerId {
    /// Wraps raw id bytes.
    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The raw id bytes.
    pub const fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", hex::encode(&self.0[..6]))
    }
}
