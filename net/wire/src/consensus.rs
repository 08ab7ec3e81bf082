//! The consensus reactor's message set.
//!
//! State-channel messages announce where a peer is and what it has; the
//! Data/Vote/VoteSetBits channels carry the payloads themselves. Every
//! message validates its own structure with [`validate`](ConsensusMessage::validate);
//! height rules that depend on the chain's initial height live in
//! [`NewRoundStep::validate_height`].
use borsh::{BorshDeserialize, BorshSerialize};

use galena_types::{
    BitArray, BlockId, Height, Part, PartSetHeader, Proposal, Round, Step, Vote, VoteType,
    MAX_BLOCK_PARTS_COUNT, MAX_VOTES_COUNT,
};

use crate::{Channel, MessageError};

/// Announces the sender's current (height, round, step).
///
/// Receivers use this to (re)prime their picture of the sender; everything
/// else they track for the sender hangs off these coordinates.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewRoundStep {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// How long ago the sender entered this round. May be negative: round
    /// start times can sit in the future.
    pub seconds_since_start_time: i64,
    /// The round the previous height committed at, `-1` at the initial
    /// height.
    pub last_commit_round: Round,
}

impl NewRoundStep {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        if self.last_commit_round < -1 {
            return Err(MessageError::InvalidLastCommitRound(self.last_commit_round));
        }
        Ok(())
    }

    /// The height rules that need the chain's initial height.
    pub fn validate_height(&self, initial_height: Height) -> Result<(), MessageError> {
        if self.height < initial_height {
            return Err(MessageError::HeightBeforeInitial {
                height: self.height,
                initial: initial_height,
            });
        }
        if self.height == initial_height && self.last_commit_round != -1 {
            return Err(MessageError::LastCommitAtInitialHeight(
                self.last_commit_round,
            ));
        }
        Ok(())
    }
}

/// Announces that the sender has a full proposal block (or a commit) for the
/// given round, with the parts it holds.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NewValidBlock {
    pub height: Height,
    pub round: Round,
    pub block_part_set_header: PartSetHeader,
    pub block_parts: BitArray,
    /// `true` once the block is committed, which makes the announcement
    /// valid across round changes.
    pub is_commit: bool,
}

impl NewValidBlock {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        if self.block_part_set_header.total as usize > MAX_BLOCK_PARTS_COUNT {
            return Err(MessageError::TooManyParts(self.block_part_set_header.total));
        }
        if !self.block_parts.is_well_formed() {
            return Err(MessageError::MalformedBitArray);
        }
        if self.block_parts.size() != self.block_part_set_header.total as usize {
            return Err(MessageError::BitArraySizeMismatch {
                expected: self.block_part_set_header.total as usize,
                got: self.block_parts.size(),
            });
        }
        Ok(())
    }
}

/// Carries a signed proposal.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalMessage {
    pub proposal: Proposal,
}

/// The prevotes the sender holds for the proposal's proof-of-lock round.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalPol {
    pub height: Height,
    pub proposal_pol_round: Round,
    pub proposal_pol: BitArray,
}

impl ProposalPol {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.proposal_pol_round < 0 {
            return Err(MessageError::NegativeRound);
        }
        if !self.proposal_pol.is_well_formed() {
            return Err(MessageError::MalformedBitArray);
        }
        let size = self.proposal_pol.size();
        if size == 0 || size > MAX_VOTES_COUNT {
            return Err(MessageError::PolSizeOutOfRange(size));
        }
        Ok(())
    }
}

/// One part of the proposal block (or of a stored block, during catch-up).
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockPartMessage {
    pub height: Height,
    pub round: Round,
    pub part: Part,
}

impl BlockPartMessage {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        if !self.part.is_well_formed() {
            return Err(MessageError::MalformedPart);
        }
        Ok(())
    }
}

/// Carries a signed vote.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteMessage {
    pub vote: Vote,
}

/// Announces possession of a single vote, by validator index.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HasVote {
    pub height: Height,
    pub round: Round,
    pub vote_type: VoteType,
    pub index: u32,
}

impl HasVote {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        Ok(())
    }
}

/// Announces possession of a single proposal block part.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct HasProposalBlockPart {
    pub height: Height,
    pub round: Round,
    pub index: u32,
}

impl HasProposalBlockPart {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 1 {
            return Err(MessageError::NonPositiveHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        Ok(())
    }
}

/// Claims a two-thirds majority for `block_id` at the given coordinates.
///
/// The receiver answers with a [`VoteSetBits`] diff of the votes it holds,
/// so both sides can fill each other's gaps.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteSetMaj23 {
    pub height: Height,
    pub round: Round,
    pub vote_type: VoteType,
    pub block_id: BlockId,
}

impl VoteSetMaj23 {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        Ok(())
    }
}

/// The votes the sender holds for `block_id` at the given coordinates.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct VoteSetBits {
    pub height: Height,
    pub round: Round,
    pub vote_type: VoteType,
    pub block_id: BlockId,
    pub votes: BitArray,
}

impl VoteSetBits {
    pub fn validate(&self) -> Result<(), MessageError> {
        if self.height < 0 {
            return Err(MessageError::NegativeHeight);
        }
        if self.round < 0 {
            return Err(MessageError::NegativeRound);
        }
        if !self.votes.is_well_formed() {
            return Err(MessageError::MalformedBitArray);
        }
        if self.votes.size() > MAX_VOTES_COUNT {
            return Err(MessageError::TooManyVotes(self.votes.size()));
        }
        Ok(())
    }
}

/// Every message of the consensus reactor.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum ConsensusMessage {
    NewRoundStep(NewRoundStep),
    NewValidBlock(NewValidBlock),
    Proposal(ProposalMessage),
    ProposalPol(ProposalPol),
    BlockPart(BlockPartMessage),
    Vote(VoteMessage),
    HasVote(HasVote),
    HasProposalBlockPart(HasProposalBlockPart),
    VoteSetMaj23(VoteSetMaj23),
    VoteSetBits(VoteSetBits),
}

impl ConsensusMessage {
    /// The channel this message belongs on.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::NewRoundStep(_)
            | Self::NewValidBlock(_)
            | Self::HasVote(_)
            | Self::HasProposalBlockPart(_)
            | Self::VoteSetMaj23(_) => Channel::State,
            Self::Proposal(_) | Self::ProposalPol(_) | Self::BlockPart(_) => Channel::Data,
            Self::Vote(_) => Channel::Vote,
            Self::VoteSetBits(_) => Channel::VoteSetBits,
        }
    }

    /// Structural validation of the payload.
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Self::NewRoundStep(msg) => msg.validate(),
            Self::NewValidBlock(msg) => msg.validate(),
            Self::Proposal(msg) => Ok(msg.proposal.validate()?),
            Self::ProposalPol(msg) => msg.validate(),
            Self::BlockPart(msg) => msg.validate(),
            Self::Vote(msg) => Ok(msg.vote.validate()?),
            Self::HasVote(msg) => msg.validate(),
            Self::HasProposalBlockPart(msg) => msg.validate(),
            Self::VoteSetMaj23(msg) => msg.validate(),
            Self::VoteSetBits(msg) => msg.validate(),
        }
    }
}

#[cfg(test)]
mod tests {
    use galena_types::{BitArray, PartSetHeader, Step};

    use super::{HasProposalBlockPart, NewRoundStep, NewValidBlock, ProposalPol};
    use crate::MessageError;

    fn round_step() -> NewRoundStep {
        NewRoundStep {
            height: 7,
            round: 0,
            step: Step::Propose,
            seconds_since_start_time: 2,
            last_commit_round: 0,
        }
    }

    #[test]
    fn new_round_step_validates() {
        assert_eq!(round_step().validate(), Ok(()));

        let mut msg = round_step();
        msg.last_commit_round = -2;
        assert_eq!(
            msg.validate(),
            Err(MessageError::InvalidLastCommitRound(-2))
        );
    }

    #[test]
    fn new_round_step_initial_height_rules() {
        let mut msg = round_step();
        assert!(matches!(
            msg.validate_height(8),
            Err(MessageError::HeightBeforeInitial { .. })
        ));

        // At the initial height there is no previous commit to reference.
        msg.height = 7;
        assert_eq!(
            msg.validate_height(7),
            Err(MessageError::LastCommitAtInitialHeight(0))
        );
        msg.last_commit_round = -1;
        assert_eq!(msg.validate_height(7), Ok(()));
    }

    #[test]
    fn new_valid_block_bit_array_must_match_header() {
        let msg = NewValidBlock {
            height: 3,
            round: 0,
            block_part_set_header: PartSetHeader {
                total: 4,
                hash: [0; 32],
            },
            block_parts: BitArray::new(3),
            is_commit: false,
        };
        assert_eq!(
            msg.validate(),
            Err(MessageError::BitArraySizeMismatch {
                expected: 4,
                got: 3
            })
        );
    }

    #[test]
    fn proposal_pol_rejects_empty_bit_array() {
        let msg = ProposalPol {
            height: 1,
            proposal_pol_round: 0,
            proposal_pol: BitArray::new(0),
        };
        assert_eq!(msg.validate(), Err(MessageError::PolSizeOutOfRange(0)));
    }

    #[test]
    fn has_proposal_block_part_needs_committed_height() {
        let msg = HasProposalBlockPart {
            height: 0,
            round: 0,
            index: 0,
        };
        assert_eq!(msg.validate(), Err(MessageError::NonPositiveHeight));
    }

    #[test]
    fn validate_is_idempotent() {
        let msg = round_step();
        assert_eq!(msg.validate(), msg.validate());
    }
}
