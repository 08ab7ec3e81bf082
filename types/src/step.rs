//! The phase within a consensus round.
use borsh::{BorshDeserialize, BorshSerialize};

/// The step a node is at within a (height, round).
///
/// Ordered by phase; comparing steps is only meaningful within the same
/// height and round.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub enum Step {
    /// Waiting for the previous height's commit to gather straggler votes.
    NewHeight,
    /// The proposer is building/sending a proposal.
    Propose,
    /// Prevoting on the proposal.
    Prevote,
    /// Waiting for more prevotes after a two-thirds-any threshold.
    PrevoteWait,
    /// Precommitting.
    Precommit,
    /// Waiting for more precommits after a two-thirds-any threshold.
    PrecommitWait,
    /// A block has been committed at this height.
    Commit,
}
