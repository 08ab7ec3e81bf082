//! Votes: the signed prevote/precommit statements validators exchange.
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{BlockId, Height, Round};

/// The maximum number of validators a vote-tracking structure may be sized
/// for.
pub const MAX_VOTES_COUNT: usize = 10_000;

/// The maximum accepted signature length, in bytes.
pub const MAX_SIGNATURE_SIZE: usize = 256;

/// The kind of a vote.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum VoteType {
    /// A vote for the proposal (or nil) in the prevote phase.
    Prevote,
    /// A commitment vote in the precommit phase.
    Precommit,
}

/// A signed vote from a validator.
///
/// `block_id == None` is a nil vote. The extension fields are only populated
/// on precommits when vote extensions are enabled for the height.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub vote_type: VoteType,
    pub height: Height,
    pub round: Round,
    pub block_id: Option<BlockId>,
    /// Unix milliseconds.
    pub timestamp: i64,
    /// The validator's position in the validator set at `height`.
    pub validator_index: u32,
    pub signature: Vec<u8>,
    pub extension: Vec<u8>,
    pub extension_signature: Vec<u8>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VoteError {
    #[error("negative height")]
    NegativeHeight,
    #[error("negative round")]
    NegativeRound,
    #[error("missing signature")]
    MissingSignature,
    #[error("signature too large ({0} bytes)")]
    OversizedSignature(usize),
    #[error("vote extension on a non-precommit vote")]
    ExtensionOnPrevote,
}

impl Vote {
    /// Structural validation; signature verification happens upstream.
    pub fn validate(&self) -> Result<(), VoteError> {
        if self.height < 0 {
            return Err(VoteError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(VoteError::NegativeRound);
        }
        if self.signature.is_empty() {
            return Err(VoteError::MissingSignature);
        }
        if self.signature.len() > MAX_SIGNATURE_SIZE {
            return Err(VoteError::OversizedSignature(self.signature.len()));
        }
        if self.vote_type == VoteType::Prevote
            && !(self.extension.is_empty() && self.extension_signature.is_empty())
        {
            return Err(VoteError::ExtensionOnPrevote);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Vote, VoteError, VoteType};

    fn vote() -> Vote {
        Vote {
            vote_type: VoteType::Precommit,
            height: 5,
            round: 0,
            block_id: None,
            timestamp: 0,
            validator_index: 0,
            signature: vec![0xAB; 64],
            extension: vec![],
            extension_signature: vec![],
        }
    }

    #[test]
    fn validate_accepts_plain_vote() {
        assert_eq!(vote().validate(), Ok(()));
    }

    #[test]
    fn validate_rejects_prevote_extension() {
        let mut v = vote();
        v.vote_type = VoteType::Prevote;
        v.extension = vec![1];
        assert_eq!(v.validate(), Err(VoteError::ExtensionOnPrevote));
    }

    #[test]
    fn validate_rejects_unsigned() {
        let mut v = vote();
        v.signature.clear();
        assert_eq!(v.validate(), Err(VoteError::MissingSignature));
    }
}
