//! Structural message validation failures.
//!
//! Any of these is a protocol violation: the sender either speaks a
//! different protocol or is misbehaving, and gets stopped.
use galena_types::{Height, ProposalError, Round, VoteError};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("negative height")]
    NegativeHeight,
    #[error("non-positive height")]
    NonPositiveHeight,
    #[error("negative round")]
    NegativeRound,
    #[error("height {height} below the chain's initial height {initial}")]
    HeightBeforeInitial { height: Height, initial: Height },
    #[error("last commit round {0} announced at the initial height")]
    LastCommitAtInitialHeight(Round),
    #[error("last commit round {0} below -1")]
    InvalidLastCommitRound(Round),
    #[error("bit array sized {got}, expected {expected}")]
    BitArraySizeMismatch { expected: usize, got: usize },
    #[error("bit array storage inconsistent with its declared size")]
    MalformedBitArray,
    #[error("part set of {0} parts exceeds the maximum")]
    TooManyParts(u32),
    #[error("malformed block part")]
    MalformedPart,
    #[error("proof-of-lock bit array sized {0}, outside the allowed range")]
    PolSizeOutOfRange(usize),
    #[error("vote bit array sized {0} exceeds the maximum")]
    TooManyVotes(usize),
    #[error(transparent)]
    Vote(#[from] VoteError),
    #[error(transparent)]
    Proposal(#[from] ProposalError),
    #[error("empty transaction batch")]
    EmptyTxBatch,
    #[error("transaction of {got} bytes exceeds the {limit} byte limit")]
    OversizedTx { got: usize, limit: usize },
}
