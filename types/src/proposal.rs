//! Block proposals.
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{vote::MAX_SIGNATURE_SIZE, BlockId, Height, Round};

/// A signed block proposal for a (height, round).
///
/// `pol_round >= 0` means the proposal re-proposes a value locked by a
/// proof-of-lock at that earlier round.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    /// The proof-of-lock round, `-1` if none.
    pub pol_round: Round,
    pub block_id: BlockId,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProposalError {
    #[error("negative height")]
    NegativeHeight,
    #[error("negative round")]
    NegativeRound,
    #[error("proof-of-lock round {pol_round} not in [-1, {round})")]
    InvalidPolRound { pol_round: Round, round: Round },
    #[error("nil block id")]
    NilBlockId,
    #[error("missing signature")]
    MissingSignature,
    #[error("signature too large ({0} bytes)")]
    OversizedSignature(usize),
}

impl Proposal {
    /// Structural validation; signature verification happens upstream.
    pub fn validate(&self) -> Result<(), ProposalError> {
        if self.height < 0 {
            return Err(ProposalError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(ProposalError::NegativeRound);
        }
        if self.pol_round < -1 || self.pol_round >= self.round {
            return Err(ProposalError::InvalidPolRound {
                pol_round: self.pol_round,
                round: self.round,
            });
        }
        if self.block_id.is_nil() {
            return Err(ProposalError::NilBlockId);
        }
        if self.signature.is_empty() {
            return Err(ProposalError::MissingSignature);
        }
        if self.signature.len() > MAX_SIGNATURE_SIZE {
            return Err(ProposalError::OversizedSignature(self.signature.len()));
        }
        Ok(())
    }
}
