//! The consensus state machine's interfaces, as seen from the reactor.
//!
//! The reactor never mutates consensus state directly. It pulls read-only
//! data through [`StateAccess`] at well-defined points, forwards payload
//! messages into the state machine's inbox ([`IncomingMessage`]) and
//! subscribes to the [`ConsensusEvent`] stream for outbound announcements.
use std::time::SystemTime;

use galena_p2p_core::PeerId;
use galena_types::{
    BitArray, Height, HeightVoteSet, PartSet, PartSetHeader, Proposal, Round, Step, Vote, VoteSet,
};
use galena_wire::ConsensusMessage;

/// A read-only snapshot of the consensus state machine's round state.
#[derive(Clone, Debug)]
pub struct RoundState {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// When this round started. May lie in the future while the node waits
    /// out a commit timeout.
    pub start_time: SystemTime,
    pub proposal: Option<Proposal>,
    /// The proposal block's parts gathered so far, with their payloads.
    pub proposal_block_parts: Option<PartSet>,
    /// Every vote set of the current height.
    pub votes: HeightVoteSet,
    /// The precommits that committed the previous height.
    pub last_commit: Option<VoteSet>,
}

impl RoundState {
    /// Seconds since the round started; negative while the start time lies
    /// ahead.
    pub fn seconds_since_start(&self) -> i64 {
        match self.start_time.elapsed() {
            Ok(elapsed) => i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX),
            Err(ahead) => -i64::try_from(ahead.duration().as_secs()).unwrap_or(i64::MAX),
        }
    }

    /// The round the previous height committed at, `-1` if unknown.
    pub fn last_commit_round(&self) -> Round {
        self.last_commit.as_ref().map_or(-1, VoteSet::round)
    }
}

impl Default for RoundState {
    fn default() -> Self {
        Self {
            height: 0,
            round: 0,
            step: Step::NewHeight,
            start_time: SystemTime::now(),
            proposal: None,
            proposal_block_parts: None,
            votes: HeightVoteSet::new(0),
            last_commit: None,
        }
    }
}

/// The read-only pull points the reactor takes from the consensus state
/// machine. Implementations lock internally; every call is one short
/// critical section.
pub trait StateAccess: Send + Sync + 'static {
    /// A copy of the current round state.
    fn round_state(&self) -> RoundState;

    /// The current height.
    fn height(&self) -> Height;

    /// The chain's initial height, for message height validation.
    fn initial_height(&self) -> Height;

    /// Size of the validator set at the current height.
    fn validator_count(&self) -> usize;

    /// Size of the validator set that signed the previous height.
    fn last_commit_size(&self) -> usize;

    /// Whether vote extensions are enabled for `height`.
    fn vote_extensions_enabled(&self, height: Height) -> bool;
}

/// A payload message forwarded into the consensus state machine's inbox,
/// attributed to the peer that sent it.
#[derive(Clone, Debug)]
pub struct IncomingMessage {
    pub peer: PeerId,
    pub message: ConsensusMessage,
}

/// What kind of useful message a peer delivered, for the statistics task.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StatsKind {
    Vote,
    BlockPart,
}

/// Events the consensus state machine publishes on its event bus.
///
/// Each one maps to a single State-channel announcement that is fanned out
/// to every peer.
#[derive(Clone, Debug)]
pub enum ConsensusEvent {
    NewRoundStep {
        height: Height,
        round: Round,
        step: Step,
        seconds_since_start_time: i64,
        last_commit_round: Round,
    },
    NewValidBlock {
        height: Height,
        round: Round,
        block_part_set_header: PartSetHeader,
        block_parts: BitArray,
        is_commit: bool,
    },
    Vote(Vote),
    ProposalBlockPart {
        height: Height,
        round: Round,
        index: u32,
    },
}
