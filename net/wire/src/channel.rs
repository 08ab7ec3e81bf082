//! The multiplexed channels peers exchange messages on.
use borsh::{BorshDeserialize, BorshSerialize};

/// A logical channel between two peers.
///
/// Each channel has its own per-peer send queue and its own priority at the
/// connection multiplexer; within one channel, message order is preserved.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Channel {
    /// Round-step announcements and `Has*` hints.
    State,
    /// Proposals, proof-of-lock bit arrays and block parts.
    Data,
    /// Individual votes.
    Vote,
    /// Vote-set bit-array diffs.
    VoteSetBits,
    /// Transaction batches.
    Mempool,
}

impl Channel {
    /// All channels, in wire-id order.
    pub const ALL: [Self; 5] = [
        Self::State,
        Self::Data,
        Self::Vote,
        Self::VoteSetBits,
        Self::Mempool,
    ];

    /// The channel's byte id on the wire.
    pub const fn id(self) -> u8 {
        match self {
            Self::State => 0x20,
            Self::Data => 0x21,
            Self::Vote => 0x22,
            Self::VoteSetBits => 0x23,
            Self::Mempool => 0x30,
        }
    }

    /// Looks a channel up by its wire id.
    pub const fn from_id(id: u8) -> Option<Self> {
        match id {
            0x20 => Some(Self::State),
            0x21 => Some(Self::Data),
            0x22 => Some(Self::Vote),
            0x23 => Some(Self::VoteSetBits),
            0x30 => Some(Self::Mempool),
            _ => None,
        }
    }

    /// Scheduling priority at the connection multiplexer; higher drains
    /// first.
    pub const fn priority(self) -> u8 {
        match self {
            Self::State => 6,
            Self::Data => 10,
            Self::Vote => 7,
            Self::VoteSetBits => 1,
            Self::Mempool => 5,
        }
    }

    /// Per-peer send queue length.
    ///
    /// `VoteSetBits` is tiny: the diffs it carries go stale fast, queueing
    /// them up buys nothing.
    pub const fn send_queue_capacity(self) -> usize {
        match self {
            Self::State => 100,
            Self::Data => 100,
            Self::Vote => 100,
            Self::VoteSetBits => 2,
            Self::Mempool => 64,
        }
    }
}
