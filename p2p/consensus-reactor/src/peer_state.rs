//! Per-peer round-state bookkeeping.
//!
//! For every connected peer the reactor keeps a [`PeerRoundState`]: the
//! peer's announced consensus coordinates plus bit arrays of everything we
//! know it has. The receive path applies the peer's announcements; the send
//! path records what we have successfully queued for it. Both go through
//! one mutex per peer.
//!
//! Stale announcements are discarded: the stored (height, round, step)
//! never regresses.
use std::{
    cmp::Ordering,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex,
    },
    time::{Duration, SystemTime},
};

use galena_p2p_core::Peer;
use galena_types::{BitArray, Height, PartSetHeader, Proposal, Round, Step, Vote, VoteSet, VoteType};
use galena_wire::{NewRoundStep, NewValidBlock, ProposalPol, VoteSetBits};

/// Orders two (height, round, step) coordinates.
///
/// The `-1` round sentinel sorts before every real round, which is exactly
/// the "unknown is oldest" behavior monotonicity needs.
pub fn compare_hrs(
    h1: Height,
    r1: Round,
    s1: Step,
    h2: Height,
    r2: Round,
    s2: Step,
) -> Ordering {
    (h1, r1, s1).cmp(&(h2, r2, s2))
}

/// What we know about one peer's round state.
///
/// `None` bit arrays mean "not allocated yet"; setting a bit in them is a
/// no-op until an announcement or an explicit allocation sizes them.
#[derive(Clone, Debug)]
pub struct PeerRoundState {
    pub height: Height,
    pub round: Round,
    pub step: Step,
    /// When the peer entered its current round, from its own announcement.
    pub start_time: SystemTime,
    /// Whether the peer has the full proposal for (height, round).
    pub proposal: bool,
    pub proposal_block_part_set_header: Option<PartSetHeader>,
    pub proposal_block_parts: Option<BitArray>,
    /// The peer's announced proof-of-lock round, `-1` if none.
    pub proposal_pol_round: Round,
    pub proposal_pol: Option<BitArray>,
    pub prevotes: Option<BitArray>,
    pub precommits: Option<BitArray>,
    pub last_commit_round: Round,
    pub last_commit: Option<BitArray>,
    pub catchup_commit_round: Round,
    pub catchup_commit: Option<BitArray>,
}

impl Default for PeerRoundState {
    fn default() -> Self {
        Self {
            height: 0,
            round: -1,
            step: Step::NewHeight,
            start_time: SystemTime::UNIX_EPOCH,
            proposal: false,
            proposal_block_part_set_header: None,
            proposal_block_parts: None,
            proposal_pol_round: -1,
            proposal_pol: None,
            prevotes: None,
            precommits: None,
            last_commit_round: -1,
            last_commit: None,
            catchup_commit_round: -1,
            catchup_commit: None,
        }
    }
}

impl PeerRoundState {
    /// The bit array tracking the peer's votes of (`height`, `round`,
    /// `vote_type`), if one applies.
    ///
    /// Invalid combinations return [`None`], which makes every downstream
    /// set a no-op.
    fn vote_bit_array(
        &self,
        height: Height,
        round: Round,
        vote_type: VoteType,
    ) -> Option<&BitArray> {
        if self.height == height {
            if self.round == round {
                return match vote_type {
                    VoteType::Prevote => self.prevotes.as_ref(),
                    VoteType::Precommit => self.precommits.as_ref(),
                };
            }
            if self.catchup_commit_round == round {
                return match vote_type {
                    VoteType::Prevote => None,
                    VoteType::Precommit => self.catchup_commit.as_ref(),
                };
            }
            if self.proposal_pol_round == round {
                return match vote_type {
                    VoteType::Prevote => self.proposal_pol.as_ref(),
                    VoteType::Precommit => None,
                };
            }
            return None;
        }
        if self.height == height + 1 && self.last_commit_round == round {
            return match vote_type {
                VoteType::Prevote => None,
                VoteType::Precommit => self.last_commit.as_ref(),
            };
        }
        None
    }

    fn vote_bit_array_mut(
        &mut self,
        height: Height,
        round: Round,
        vote_type: VoteType,
    ) -> Option<&mut BitArray> {
        if self.height == height {
            if self.round == round {
                return match vote_type {
                    VoteType::Prevote => self.prevotes.as_mut(),
                    VoteType::Precommit => self.precommits.as_mut(),
                };
            }
            if self.catchup_commit_round == round {
                return match vote_type {
                    VoteType::Prevote => None,
                    VoteType::Precommit => self.catchup_commit.as_mut(),
                };
            }
            if self.proposal_pol_round == round {
                return match vote_type {
                    VoteType::Prevote => self.proposal_pol.as_mut(),
                    VoteType::Precommit => None,
                };
            }
            return None;
        }
        if self.height == height + 1 && self.last_commit_round == round {
            return match vote_type {
                VoteType::Prevote => None,
                VoteType::Precommit => self.last_commit.as_mut(),
            };
        }
        None
    }
}

/// A connected peer together with its round state and statistics.
pub struct PeerRecord {
    peer: Arc<Peer>,
    prs: Mutex<PeerRoundState>,
    votes_received: AtomicU64,
    block_parts_received: AtomicU64,
}

impl PeerRecord {
    pub fn new(peer: Arc<Peer>) -> Arc<Self> {
        Arc::new(Self {
            peer,
            prs: Mutex::new(PeerRoundState::default()),
            votes_received: AtomicU64::new(0),
            block_parts_received: AtomicU64::new(0),
        })
    }

    pub const fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// A copy of the peer's round state.
    pub fn round_state(&self) -> PeerRoundState {
        self.prs.lock().unwrap().clone()
    }

    /// Applies a round-step announcement.
    ///
    /// Announcements that do not advance (height, round, step) are ignored.
    /// On advancement, per-round data is recycled: the catchup commit is
    /// promoted into precommits when the peer lands on its round, and a
    /// one-height advance shifts precommits into the last commit.
    pub fn apply_new_round_step(&self, msg: &NewRoundStep) {
        let mut prs = self.prs.lock().unwrap();

        if compare_hrs(
            msg.height,
            msg.round,
            msg.step,
            prs.height,
            prs.round,
            prs.step,
        ) != Ordering::Greater
        {
            return;
        }

        let (prev_height, prev_round) = (prs.height, prs.round);
        let prev_catchup_commit_round = prs.catchup_commit_round;
        let prev_catchup_commit = prs.catchup_commit.clone();
        let prev_precommits = prs.precommits.clone();

        prs.height = msg.height;
        prs.round = msg.round;
        prs.step = msg.step;
        prs.start_time = start_time_from_announcement(msg.seconds_since_start_time);

        if prev_height != msg.height || prev_round != msg.round {
            prs.proposal = false;
            prs.proposal_block_part_set_header = None;
            prs.proposal_block_parts = None;
            prs.proposal_pol_round = -1;
            prs.proposal_pol = None;
            prs.prevotes = None;
            prs.precommits = None;
        }

        if prev_height == msg.height
            && prev_round != msg.round
            && msg.round == prev_catchup_commit_round
        {
            // The peer caught up to the round we had a catchup commit for;
            // those bits are its precommits now.
            prs.precommits = prev_catchup_commit;
        }

        if prev_height != msg.height {
            if prev_height + 1 == msg.height && prev_round == msg.last_commit_round {
                prs.last_commit_round = msg.last_commit_round;
                prs.last_commit = prev_precommits;
            } else {
                prs.last_commit_round = msg.last_commit_round;
                prs.last_commit = None;
            }
            prs.catchup_commit_round = -1;
            prs.catchup_commit = None;
        }
    }

    /// Applies a valid-block announcement for the peer's current round (or
    /// any round, once committed).
    pub fn apply_new_valid_block(&self, msg: &NewValidBlock) {
        let mut prs = self.prs.lock().unwrap();

        if prs.height != msg.height {
            return;
        }
        if prs.round != msg.round && !msg.is_commit {
            return;
        }
        prs.proposal_block_part_set_header = Some(msg.block_part_set_header);
        prs.proposal_block_parts = Some(msg.block_parts.clone());
    }

    /// Applies a proof-of-lock announcement.
    pub fn apply_proposal_pol(&self, msg: &ProposalPol) {
        let mut prs = self.prs.lock().unwrap();

        if prs.height != msg.height || prs.proposal_pol_round != msg.proposal_pol_round {
            return;
        }
        prs.proposal_pol = Some(msg.proposal_pol.clone());
    }

    /// Merges a vote-set diff from the peer.
    ///
    /// `our_votes` is our own bit array for the message's block id; bits we
    /// already hold must not be mistaken for bits the peer holds.
    pub fn apply_vote_set_bits(&self, msg: &VoteSetBits, our_votes: Option<&BitArray>) {
        let mut prs = self.prs.lock().unwrap();

        let Some(bits) = prs.vote_bit_array_mut(msg.height, msg.round, msg.vote_type) else {
            return;
        };

        match our_votes {
            None => bits.update(&msg.votes),
            Some(ours) => {
                let theirs_not_ours = bits.sub(ours);
                let union = theirs_not_ours.or(&msg.votes);
                bits.update(&union);
            }
        }
    }

    /// Records that the peer has the proposal of its current round.
    pub fn set_has_proposal(&self, proposal: &Proposal) {
        let mut prs = self.prs.lock().unwrap();

        if prs.height != proposal.height || prs.round != proposal.round {
            return;
        }
        if prs.proposal {
            return;
        }
        prs.proposal = true;

        // A valid-block announcement may have set the parts already; keep
        // whatever it reported.
        if prs.proposal_block_parts.is_some() {
            return;
        }
        prs.proposal_block_part_set_header = Some(proposal.block_id.part_set_header);
        prs.proposal_block_parts =
            Some(BitArray::new(proposal.block_id.part_set_header.total as usize));
        prs.proposal_pol_round = proposal.pol_round;
        prs.proposal_pol = None;
    }

    /// One-shot initialization of the peer's part tracking while it is
    /// catching up on an older block.
    pub fn init_proposal_block_parts(&self, header: PartSetHeader) {
        let mut prs = self.prs.lock().unwrap();

        if prs.proposal_block_parts.is_some() {
            return;
        }
        prs.proposal_block_parts = Some(BitArray::new(header.total as usize));
        prs.proposal_block_part_set_header = Some(header);
    }

    /// Records that the peer has one proposal block part, either because we
    /// queued it or because the peer announced it.
    pub fn set_has_proposal_block_part(&self, height: Height, round: Round, index: usize) {
        let mut prs = self.prs.lock().unwrap();

        if prs.height != height || prs.round != round {
            return;
        }
        if let Some(parts) = &mut prs.proposal_block_parts {
            parts.set(index, true);
        }
    }

    /// Records that the peer has a single vote. A no-op while no bit array
    /// applies to the coordinates.
    pub fn set_has_vote(&self, height: Height, round: Round, vote_type: VoteType, index: usize) {
        let mut prs = self.prs.lock().unwrap();

        if let Some(bits) = prs.vote_bit_array_mut(height, round, vote_type) {
            bits.set(index, true);
        }
    }

    /// Lazily allocates the peer's vote bit arrays for `height`, sized to
    /// the validator set. Must run before any vote bit is recorded for that
    /// height.
    pub fn ensure_vote_bit_arrays(&self, height: Height, num_validators: usize) {
        ensure_vote_bit_arrays_in(&mut self.prs.lock().unwrap(), height, num_validators);
    }

    /// Notes the round a stored commit for the peer's height committed at,
    /// so commit precommits have a bit array to land in.
    pub fn ensure_catchup_commit_round(
        &self,
        height: Height,
        round: Round,
        num_validators: usize,
    ) {
        ensure_catchup_commit_round_in(
            &mut self.prs.lock().unwrap(),
            height,
            round,
            num_validators,
        );
    }

    /// Picks one vote from `votes` the peer does not have yet, uniformly at
    /// random. The caller sends it and, on success, records it with
    /// [`set_has_vote`](Self::set_has_vote).
    pub fn pick_vote_to_send(&self, votes: &VoteSet) -> Option<Vote> {
        if votes.size() == 0 {
            return None;
        }

        let mut prs = self.prs.lock().unwrap();

        if votes.is_commit() {
            ensure_catchup_commit_round_in(&mut prs, votes.height(), votes.round(), votes.size());
        }
        ensure_vote_bit_arrays_in(&mut prs, votes.height(), votes.size());

        let peer_votes = prs.vote_bit_array(votes.height(), votes.round(), votes.vote_type())?;
        let index = votes.bit_array().sub(peer_votes).pick_random()?;
        votes.get(index).cloned()
    }

    /// Counts a vote received from this peer, returning the new total.
    pub fn record_vote(&self) -> u64 {
        self.votes_received.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    /// Counts a block part received from this peer, returning the new
    /// total.
    pub fn record_block_part(&self) -> u64 {
        self.block_parts_received
            .fetch_add(1, AtomicOrdering::Relaxed)
            + 1
    }
}

fn ensure_vote_bit_arrays_in(prs: &mut PeerRoundState, height: Height, num_validators: usize) {
    if prs.height == height {
        if prs.prevotes.is_none() {
            prs.prevotes = Some(BitArray::new(num_validators));
        }
        if prs.precommits.is_none() {
            prs.precommits = Some(BitArray::new(num_validators));
        }
        if prs.catchup_commit.is_none() {
            prs.catchup_commit = Some(BitArray::new(num_validators));
        }
        if prs.proposal_pol.is_none() {
            prs.proposal_pol = Some(BitArray::new(num_validators));
        }
    } else if prs.height == height + 1 && prs.last_commit.is_none() {
        prs.last_commit = Some(BitArray::new(num_validators));
    }
}

fn ensure_catchup_commit_round_in(
    prs: &mut PeerRoundState,
    height: Height,
    round: Round,
    num_validators: usize,
) {
    if prs.height != height {
        return;
    }
    if prs.catchup_commit_round == round {
        return;
    }
    if prs.catchup_commit_round != -1 {
        // Commits at one height are unique; a different round here means our
        // block store and the network disagree.
        tracing::warn!(
            height,
            old = prs.catchup_commit_round,
            new = round,
            "conflicting catchup commit round, replacing",
        );
    }
    prs.catchup_commit_round = round;
    if round == prs.round {
        prs.catchup_commit = prs.precommits.clone();
    } else {
        prs.catchup_commit = Some(BitArray::new(num_validators));
    }
}

/// Reconstructs the peer's round start time from "seconds since", which
/// may be negative when the round starts in the future.
fn start_time_from_announcement(seconds_since_start_time: i64) -> SystemTime {
    let now = SystemTime::now();
    if seconds_since_start_time >= 0 {
        now - Duration::from_secs(seconds_since_start_time.unsigned_abs())
    } else {
        now + Duration::from_secs(seconds_since_start_time.unsigned_abs())
    }
}
