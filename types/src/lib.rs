//! # Galena Types
//!
//! The value types shared by Galena's consensus and dissemination crates:
//! consensus coordinates, bit arrays, block part sets, votes, proposals,
//! commits and transactions.
//!
//! Everything in here is plain data. Signature verification, voting-power
//! accounting and block validity are the consensus engine's concern; these
//! types only carry the fields the network layer moves around.

mod bit_array;
mod block;
mod commit;
mod proposal;
mod step;
mod tx;
mod vote;
mod vote_set;

pub use bit_array::BitArray;
pub use block::{
    BlockId, BlockMeta, Part, PartSet, PartSetError, PartSetHeader, BLOCK_PART_SIZE_BYTES,
    MAX_BLOCK_PARTS_COUNT,
};
pub use commit::{BlockIdFlag, Commit, CommitSig, ExtendedCommit, ExtendedCommitSig};
pub use proposal::{Proposal, ProposalError};
pub use step::Step;
pub use tx::{Tx, TxKey};
pub use vote::{Vote, VoteError, VoteType, MAX_SIGNATURE_SIZE, MAX_VOTES_COUNT};
pub use vote_set::{HeightVoteSet, VoteSet, VoteSetError};

/// A block height.
///
/// `-1` is the "unknown / not applicable" sentinel wherever a height is
/// reported by a peer.
pub type Height = i64;

/// A consensus round within a height.
///
/// `-1` is the "unknown / not applicable" sentinel.
pub type Round = i32;
