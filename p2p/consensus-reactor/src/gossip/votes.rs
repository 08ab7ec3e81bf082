//! The votes loop: one missing vote per iteration, picked to unblock the
//! peer's current step.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use galena_types::{Step, VoteSet};
use galena_wire::{ConsensusMessage, Envelope, VoteMessage};

use crate::{
    peer_state::{PeerRecord, PeerRoundState},
    reactor::ConsensusReactor,
    state::{RoundState, StateAccess},
    store,
    store::BlockStore,
};

impl<S: StateAccess, B: BlockStore> ConsensusReactor<S, B> {
    /// Sends the peer one vote it is missing per iteration.
    ///
    /// A three-state counter damps the "nothing to send" log line so an
    /// idle peer does not flood the logs once per sleep interval.
    pub(crate) async fn votes_loop(
        self: Arc<Self>,
        record: Arc<PeerRecord>,
        quit: CancellationToken,
    ) {
        let peer = Arc::clone(record.peer());
        let mut sleeping = 0_u8;

        loop {
            if quit.is_cancelled() || !peer.is_running() {
                return;
            }
            if !self.intraloop_jitter(&peer, &quit).await {
                return;
            }
            if self.wait_sync() {
                if !self.gossip_sleep(&peer, &quit).await {
                    return;
                }
                continue;
            }

            let rs = self.snapshot();
            let prs = record.round_state();

            match sleeping {
                1 => sleeping = 2,
                2 => sleeping = 0,
                _ => {}
            }

            // Same height: pick by the peer's step.
            if rs.height == prs.height && self.gossip_votes_for_height(&rs, &prs, &record).await {
                continue;
            }

            // One height behind: our last commit is its missing precommits.
            if prs.height != 0 && rs.height == prs.height + 1 {
                if let Some(last_commit) = &rs.last_commit {
                    if self.pick_send_vote(&record, last_commit).await {
                        tracing::debug!(peer = %peer.id(), height = prs.height, "picked last-commit vote to send");
                        continue;
                    }
                }
            }

            // Two or more behind: reconstruct precommits from the stored
            // commit for the peer's height.
            if prs.height != 0 && rs.height >= prs.height + 2 {
                if let Some(base) = store::base(&self.block_store()).await {
                    if base > 0 && prs.height >= base {
                        if let Some(commit_votes) = self.load_commit_votes(prs.height).await {
                            if self.pick_send_vote(&record, &commit_votes).await {
                                tracing::debug!(peer = %peer.id(), height = prs.height, "picked catchup commit vote to send");
                                continue;
                            }
                        }
                    }
                }
            }

            if sleeping == 0 {
                sleeping = 1;
                tracing::debug!(peer = %peer.id(), "no votes to send, sleeping");
            }
            if !self.gossip_sleep(&peer, &quit).await {
                return;
            }
        }
    }

    /// The pick order for a peer at our height, most-unblocking first.
    async fn gossip_votes_for_height(
        &self,
        rs: &RoundState,
        prs: &PeerRoundState,
        record: &Arc<PeerRecord>,
    ) -> bool {
        // A peer still gathering the previous commit wants stragglers.
        if prs.step == Step::NewHeight {
            if let Some(last_commit) = &rs.last_commit {
                if self.pick_send_vote(record, last_commit).await {
                    return true;
                }
            }
        }

        // Proof-of-lock evidence for a peer still deciding on a proposal.
        if prs.step <= Step::Propose
            && prs.round != -1
            && prs.round <= rs.round
            && prs.proposal_pol_round != -1
        {
            if let Some(pol_prevotes) = rs.votes.prevotes(prs.proposal_pol_round) {
                if self.pick_send_vote(record, pol_prevotes).await {
                    return true;
                }
            }
        }

        // Prevotes of the peer's round.
        if prs.step <= Step::PrevoteWait && prs.round != -1 && prs.round <= rs.round {
            if let Some(prevotes) = rs.votes.prevotes(prs.round) {
                if self.pick_send_vote(record, prevotes).await {
                    return true;
                }
            }
        }

        // Precommits of the peer's round.
        if prs.step <= Step::PrecommitWait && prs.round != -1 && prs.round <= rs.round {
            if let Some(precommits) = rs.votes.precommits(prs.round) {
                if self.pick_send_vote(record, precommits).await {
                    return true;
                }
            }
        }

        // Past its own wait steps a peer may still need round prevotes to
        // accept a valid block.
        if prs.round != -1 && prs.round <= rs.round {
            if let Some(prevotes) = rs.votes.prevotes(prs.round) {
                if self.pick_send_vote(record, prevotes).await {
                    return true;
                }
            }
        }

        // And proof-of-lock prevotes help in any step.
        if prs.proposal_pol_round != -1 {
            if let Some(pol_prevotes) = rs.votes.prevotes(prs.proposal_pol_round) {
                if self.pick_send_vote(record, pol_prevotes).await {
                    return true;
                }
            }
        }

        false
    }

    /// Picks one vote the peer is missing from `votes`, queues it and
    /// records the bit on success.
    pub(crate) async fn pick_send_vote(&self, record: &PeerRecord, votes: &VoteSet) -> bool {
        let Some(vote) = record.pick_vote_to_send(votes) else {
            return false;
        };

        tracing::debug!(
            peer = %record.peer().id(),
            height = vote.height,
            round = vote.round,
            index = vote.validator_index,
            "sending vote",
        );
        let envelope = Envelope::new(ConsensusMessage::Vote(VoteMessage { vote: vote.clone() }));
        if record.peer().send(envelope).await {
            record.set_has_vote(
                vote.height,
                vote.round,
                vote.vote_type,
                vote.validator_index as usize,
            );
            return true;
        }
        false
    }

    /// Reconstructs a vote set out of the stored (extended) commit for
    /// `height`, honoring whether vote extensions were enabled there.
    async fn load_commit_votes(&self, height: i64) -> Option<VoteSet> {
        if self.state().vote_extensions_enabled(height) {
            store::extended_commit(&self.block_store(), height)
                .await
                .map(|ec| ec.to_vote_set())
        } else {
            store::commit(&self.block_store(), height)
                .await
                .map(|commit| commit.wrapped_extended().to_vote_set())
        }
    }
}
