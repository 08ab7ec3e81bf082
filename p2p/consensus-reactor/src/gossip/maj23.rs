//! The query-majority loop.
//!
//! Periodically announces any two-thirds majority we hold at the peer's
//! coordinates, so the peer can answer with a vote-set bit-array diff and
//! both sides fill their gaps. Announcements ride `try_send`: they go stale
//! fast and are re-issued every interval anyway.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use galena_p2p_core::Peer;
use galena_types::VoteType;
use galena_wire::{ConsensusMessage, Envelope, VoteSetMaj23};

use crate::{
    peer_state::PeerRecord, reactor::ConsensusReactor, state::StateAccess, store,
    store::BlockStore,
};

impl<S: StateAccess, B: BlockStore> ConsensusReactor<S, B> {
    pub(crate) async fn query_maj23_loop(
        self: Arc<Self>,
        record: Arc<PeerRecord>,
        quit: CancellationToken,
    ) {
        let peer = Arc::clone(record.peer());

        loop {
            if quit.is_cancelled() || !peer.is_running() {
                return;
            }
            if self.wait_sync() {
                if !self.maj23_sleep(&peer, &quit).await {
                    return;
                }
                continue;
            }

            // Prevote majority at the peer's round.
            {
                let rs = self.snapshot();
                let prs = record.round_state();
                if rs.height == prs.height {
                    if let Some(maj23) =
                        rs.votes.prevotes(prs.round).and_then(|votes| votes.two_thirds_majority())
                    {
                        peer.try_send(Envelope::new(ConsensusMessage::VoteSetMaj23(
                            VoteSetMaj23 {
                                height: prs.height,
                                round: prs.round,
                                vote_type: VoteType::Prevote,
                                block_id: maj23,
                            },
                        )));
                        if !self.maj23_sleep(&peer, &quit).await {
                            return;
                        }
                    }
                }
            }

            // Precommit majority at the peer's round.
            {
                let rs = self.snapshot();
                let prs = record.round_state();
                if rs.height == prs.height {
                    if let Some(maj23) = rs
                        .votes
                        .precommits(prs.round)
                        .and_then(|votes| votes.two_thirds_majority())
                    {
                        peer.try_send(Envelope::new(ConsensusMessage::VoteSetMaj23(
                            VoteSetMaj23 {
                                height: prs.height,
                                round: prs.round,
                                vote_type: VoteType::Precommit,
                                block_id: maj23,
                            },
                        )));
                        if !self.maj23_sleep(&peer, &quit).await {
                            return;
                        }
                    }
                }
            }

            // Prevote majority at the peer's proof-of-lock round.
            {
                let rs = self.snapshot();
                let prs = record.round_state();
                if rs.height == prs.height && prs.proposal_pol_round >= 0 {
                    if let Some(maj23) = rs
                        .votes
                        .prevotes(prs.proposal_pol_round)
                        .and_then(|votes| votes.two_thirds_majority())
                    {
                        peer.try_send(Envelope::new(ConsensusMessage::VoteSetMaj23(
                            VoteSetMaj23 {
                                height: prs.height,
                                round: prs.proposal_pol_round,
                                vote_type: VoteType::Prevote,
                                block_id: maj23,
                            },
                        )));
                        if !self.maj23_sleep(&peer, &quit).await {
                            return;
                        }
                    }
                }
            }

            // A catching-up peer gets the committed block's majority from
            // the store. Last commits are left out on purpose: they are
            // fleeting and never block anyone.
            {
                let prs = record.round_state();
                if prs.catchup_commit_round != -1 && prs.height > 0 {
                    let store_bounds = (
                        store::base(&self.block_store()).await,
                        store::height(&self.block_store()).await,
                    );
                    if let (Some(base), Some(top)) = store_bounds {
                        if prs.height >= base && prs.height <= top {
                            if let Some(commit) =
                                store::commit(&self.block_store(), prs.height).await
                            {
                                peer.try_send(Envelope::new(ConsensusMessage::VoteSetMaj23(
                                    VoteSetMaj23 {
                                        height: prs.height,
                                        round: commit.round,
                                        vote_type: VoteType::Precommit,
                                        block_id: commit.block_id,
                                    },
                                )));
                                if !self.maj23_sleep(&peer, &quit).await {
                                    return;
                                }
                            }
                        }
                    }
                }
            }

            if !self.maj23_sleep(&peer, &quit).await {
                return;
            }
        }
    }

    async fn maj23_sleep(&self, peer: &Peer, quit: &CancellationToken) -> bool {
        self.pausing_sleep(self.config().peer_query_maj23_sleep, peer, quit)
            .await
    }
}
