//! # Galena Consensus Reactor
//!
//! Moves consensus state across the validator set: proposals, block parts,
//! votes and the announcements that let every node keep a picture of where
//! each peer is.
//!
//! Per connected peer the reactor runs three cooperative loops:
//!
//! - the **block-data loop** sends the single most useful proposal part,
//!   catch-up part or proposal, judged against the peer's perceived round
//!   state;
//! - the **votes loop** picks one vote the peer is missing, preferring
//!   whatever unblocks the peer's current step;
//! - the **query-majority loop** periodically announces any two-thirds
//!   majorities we hold so the peer can answer with a bit-array diff.
//!
//! The consensus state machine itself is a collaborator behind
//! [`StateAccess`] plus a message inbox; the block store is consumed as a
//! [`tower::Service`].

pub mod config;
mod constants;
mod gossip;
mod peer_state;
mod reactor;
mod snapshot;
mod state;
mod store;

pub use config::ConsensusConfig;
pub use constants::PEER_GOOD_ACK_INTERVAL;
pub use peer_state::{compare_hrs, PeerRecord, PeerRoundState};
pub use reactor::ConsensusReactor;
pub use state::{ConsensusEvent, IncomingMessage, RoundState, StateAccess, StatsKind};
pub use store::{BlockStore, BlockStoreRequest, BlockStoreResponse};
