//! Commits: the per-height precommit aggregates stored with each block.
//!
//! A commit holds one signature slot per validator, in validator-set order.
//! Commits serve lagging peers: the vote loops reconstruct individual
//! precommits out of the stored commit and send them one at a time.
use borsh::{BorshDeserialize, BorshSerialize};

use crate::{BlockId, Height, Round, Vote, VoteSet, VoteType};

/// What a validator's commit slot says about the committed block.
#[derive(Copy, Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum BlockIdFlag {
    /// No vote from this validator arrived in time.
    Absent,
    /// The validator precommitted the committed block.
    Commit,
    /// The validator precommitted nil.
    Nil,
}

/// One validator's slot in a [`Commit`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct CommitSig {
    pub flag: BlockIdFlag,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub signature: Vec<u8>,
}

impl CommitSig {
    /// An absent slot.
    pub const fn absent() -> Self {
        Self {
            flag: BlockIdFlag::Absent,
            timestamp: 0,
            signature: Vec::new(),
        }
    }
}

/// The precommits that committed a block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockId,
    /// One slot per validator, in validator-set order.
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Number of validator slots.
    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    /// Wraps this commit as an [`ExtendedCommit`] with empty extensions,
    /// for heights where vote extensions are disabled.
    pub fn wrapped_extended(&self) -> ExtendedCommit {
        ExtendedCommit {
            height: self.height,
            round: self.round,
            block_id: self.block_id,
            signatures: self
                .signatures
                .iter()
                .map(|sig| ExtendedCommitSig {
                    commit_sig: sig.clone(),
                    extension: Vec::new(),
                    extension_signature: Vec::new(),
                })
                .collect(),
        }
    }
}

/// One validator's slot in an [`ExtendedCommit`].
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExtendedCommitSig {
    pub commit_sig: CommitSig,
    pub extension: Vec<u8>,
    pub extension_signature: Vec<u8>,
}

/// A [`Commit`] carrying the vote extensions alongside each signature.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ExtendedCommit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockId,
    pub signatures: Vec<ExtendedCommitSig>,
}

impl ExtendedCommit {
    /// Number of validator slots.
    pub fn size(&self) -> usize {
        self.signatures.len()
    }

    /// Reconstructs the precommit [`VoteSet`] this commit aggregates.
    ///
    /// Absent slots stay unset in the vote set's bit array.
    pub fn to_vote_set(&self) -> VoteSet {
        let mut set = VoteSet::new(self.height, self.round, VoteType::Precommit, self.size());

        for (index, sig) in self.signatures.iter().enumerate() {
            let block_id = match sig.commit_sig.flag {
                BlockIdFlag::Absent => continue,
                BlockIdFlag::Commit => Some(self.block_id),
                BlockIdFlag::Nil => None,
            };

            let vote = Vote {
                vote_type: VoteType::Precommit,
                height: self.height,
                round: self.round,
                block_id,
                timestamp: sig.commit_sig.timestamp,
                validator_index: u32::try_from(index).unwrap_or(u32::MAX),
                signature: sig.commit_sig.signature.clone(),
                extension: sig.extension.clone(),
                extension_signature: sig.extension_signature.clone(),
            };

            // Slots are unique by construction, so this only fails if the
            // commit itself is malformed; skip such slots.
            drop(set.add_vote(vote));
        }

        set.into_commit_votes()
    }
}
