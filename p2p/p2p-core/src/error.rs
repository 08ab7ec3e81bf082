//! The peer-level error taxonomy.
//!
//! Only protocol violations are grounds to stop a peer; everything transient
//! (backpressure, races with the block store, absent state) is handled where
//! it happens with a short sleep and a retry.
use galena_wire::{Channel, MessageError};

#[derive(Debug, thiserror::Error)]
pub enum PeerError {
    /// The peer sent something structurally invalid.
    #[error("protocol violation: {0}")]
    Protocol(#[from] MessageError),
    /// The peer sent a message on a channel it does not belong on.
    #[error("message on unexpected channel {0:?}")]
    UnexpectedChannel(Channel),
    /// The connection is gone.
    #[error("peer disconnected")]
    Disconnected,
}
