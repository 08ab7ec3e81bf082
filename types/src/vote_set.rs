//! Vote accounting: which validators have voted for what.
//!
//! One slot per validator; voting-power weighting happens upstream in the
//! consensus engine, which hands the dissemination layer already-sized sets.
use std::collections::{BTreeMap, HashMap};

use crate::{BitArray, BlockId, Height, Round, Vote, VoteType};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[allow(variant_size_differences)]
pub enum VoteSetError {
    #[error("vote for {got_height}/{got_round} added to set for {height}/{round}")]
    WrongRound {
        height: Height,
        round: Round,
        got_height: Height,
        got_round: Round,
    },
    #[error("wrong vote type")]
    WrongType,
    #[error("validator index {0} out of range")]
    IndexOutOfRange(u32),
    #[error("conflicting vote from validator {0}")]
    Conflict(u32),
}

/// The votes of one (height, round, type), indexed by validator.
#[derive(Clone, Debug)]
pub struct VoteSet {
    height: Height,
    round: Round,
    vote_type: VoteType,
    /// Set when the votes were reconstructed out of a stored commit.
    is_commit: bool,
    bit_array: BitArray,
    votes: Vec<Option<Vote>>,
    by_block: HashMap<BlockId, BitArray>,
    maj23: Option<BlockId>,
}

impl VoteSet {
    /// Creates an empty set sized to `num_validators`.
    pub fn new(height: Height, round: Round, vote_type: VoteType, num_validators: usize) -> Self {
        Self {
            height,
            round,
            vote_type,
            is_commit: false,
            bit_array: BitArray::new(num_validators),
            votes: vec![None; num_validators],
            by_block: HashMap::new(),
            maj23: None,
        }
    }

    /// Marks the set as reconstructed from a stored commit.
    #[must_use]
    pub fn into_commit_votes(mut self) -> Self {
        self.is_commit = true;
        self
    }

    /// `true` for a set reconstructed from a stored commit.
    pub const fn is_commit(&self) -> bool {
        self.is_commit
    }

    pub const fn height(&self) -> Height {
        self.height
    }

    pub const fn round(&self) -> Round {
        self.round
    }

    pub const fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    /// Number of validator slots.
    pub fn size(&self) -> usize {
        self.votes.len()
    }

    /// Adds a vote. Returns `false` for an exact duplicate.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round != self.round {
            return Err(VoteSetError::WrongRound {
                height: self.height,
                round: self.round,
                got_height: vote.height,
                got_round: vote.round,
            });
        }
        if vote.vote_type != self.vote_type {
            return Err(VoteSetError::WrongType);
        }
        let index = vote.validator_index as usize;
        if index >= self.votes.len() {
            return Err(VoteSetError::IndexOutOfRange(vote.validator_index));
        }

        if let Some(existing) = &self.votes[index] {
            if existing.block_id == vote.block_id {
                return Ok(false);
            }
            return Err(VoteSetError::Conflict(vote.validator_index));
        }

        let block_key = vote.block_id.unwrap_or_else(BlockId::nil);
        self.bit_array.set(index, true);

        let block_bits = self
            .by_block
            .entry(block_key)
            .or_insert_with(|| BitArray::new(self.votes.len()));
        block_bits.set(index, true);

        if self.maj23.is_none() && block_bits.count_ones() * 3 > self.votes.len() * 2 {
            self.maj23 = Some(block_key);
        }

        self.votes[index] = Some(vote);
        Ok(true)
    }

    /// The vote from validator `index`, if any.
    pub fn get(&self, index: usize) -> Option<&Vote> {
        self.votes.get(index).and_then(Option::as_ref)
    }

    /// Which validators have voted, for any block.
    pub const fn bit_array(&self) -> &BitArray {
        &self.bit_array
    }

    /// Which validators have voted for exactly `block_id`.
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.by_block.get(block_id).cloned()
    }

    /// The block id that gathered more than two thirds of the slots, if any.
    pub const fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23
    }
}

/// All vote sets of a single height, keyed by round.
#[derive(Clone, Debug)]
pub struct HeightVoteSet {
    height: Height,
    prevotes: BTreeMap<Round, VoteSet>,
    precommits: BTreeMap<Round, VoteSet>,
}

impl HeightVoteSet {
    /// Creates an empty height vote set.
    pub const fn new(height: Height) -> Self {
        Self {
            height,
            prevotes: BTreeMap::new(),
            precommits: BTreeMap::new(),
        }
    }

    pub const fn height(&self) -> Height {
        self.height
    }

    /// The prevote set of `round`, if one exists.
    pub fn prevotes(&self, round: Round) -> Option<&VoteSet> {
        self.prevotes.get(&round)
    }

    /// The precommit set of `round`, if one exists.
    pub fn precommits(&self, round: Round) -> Option<&VoteSet> {
        self.precommits.get(&round)
    }

    /// The set of (`vote_type`, `round`), if one exists.
    pub fn votes(&self, vote_type: VoteType, round: Round) -> Option<&VoteSet> {
        match vote_type {
            VoteType::Prevote => self.prevotes(round),
            VoteType::Precommit => self.precommits(round),
        }
    }

    /// Inserts a whole set, replacing any existing set for its round/type.
    pub fn insert(&mut self, set: VoteSet) {
        let map = match set.vote_type() {
            VoteType::Prevote => &mut self.prevotes,
            VoteType::Precommit => &mut self.precommits,
        };
        map.insert(set.round(), set);
    }

    /// Routes a vote into the right set, creating it sized to
    /// `num_validators` if missing.
    pub fn add_vote(&mut self, vote: Vote, num_validators: usize) -> Result<bool, VoteSetError> {
        let (height, round, vote_type) = (vote.height, vote.round, vote.vote_type);
        let map = match vote_type {
            VoteType::Prevote => &mut self.prevotes,
            VoteType::Precommit => &mut self.precommits,
        };
        map.entry(round)
            .or_insert_with(|| VoteSet::new(height, round, vote_type, num_validators))
            .add_vote(vote)
    }
}

#[cfg(test)]
mod tests {
    use crate::{BlockId, PartSetHeader, Vote, VoteType};

    use super::{VoteSet, VoteSetError};

    fn block_id(tag: u8) -> BlockId {
        BlockId {
            hash: [tag; 32],
            part_set_header: PartSetHeader {
                total: 1,
                hash: [tag; 32],
            },
        }
    }

    fn vote(index: u32, block: Option<BlockId>) -> Vote {
        Vote {
            vote_type: VoteType::Prevote,
            height: 4,
            round: 0,
            block_id: block,
            timestamp: 0,
            validator_index: index,
            signature: vec![index as u8 + 1; 64],
            extension: vec![],
            extension_signature: vec![],
        }
    }

    #[test]
    fn majority_found_past_two_thirds() {
        let target = block_id(1);
        let mut set = VoteSet::new(4, 0, VoteType::Prevote, 4);

        assert!(set.add_vote(vote(0, Some(target))).unwrap());
        assert!(set.add_vote(vote(1, Some(target))).unwrap());
        assert_eq!(set.two_thirds_majority(), None);

        assert!(set.add_vote(vote(2, None)).unwrap());
        assert_eq!(set.two_thirds_majority(), None);

        assert!(set.add_vote(vote(3, Some(target))).unwrap());
        assert_eq!(set.two_thirds_majority(), Some(target));
    }

    #[test]
    fn by_block_bits_split_by_target() {
        let target = block_id(1);
        let mut set = VoteSet::new(4, 0, VoteType::Prevote, 4);
        set.add_vote(vote(0, Some(target))).unwrap();
        set.add_vote(vote(1, None)).unwrap();

        let for_block = set.bit_array_by_block_id(&target).unwrap();
        assert!(for_block.get(0) && !for_block.get(1));

        let for_nil = set.bit_array_by_block_id(&BlockId::nil()).unwrap();
        assert!(!for_nil.get(0) && for_nil.get(1));
    }

    #[test]
    fn conflicting_vote_rejected() {
        let mut set = VoteSet::new(4, 0, VoteType::Prevote, 4);
        set.add_vote(vote(0, Some(block_id(1)))).unwrap();
        assert_eq!(
            set.add_vote(vote(0, Some(block_id(2)))),
            Err(VoteSetError::Conflict(0)),
        );
    }
}
