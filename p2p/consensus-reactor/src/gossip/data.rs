//! The block-data loop: proposal parts, catch-up parts and the proposal
//! itself.
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use galena_types::{PartSet, Proposal};
use galena_wire::{BlockPartMessage, ConsensusMessage, Envelope, ProposalMessage, ProposalPol};

use crate::{
    peer_state::{PeerRecord, PeerRoundState},
    reactor::ConsensusReactor,
    state::{RoundState, StateAccess},
    store,
    store::BlockStore,
};

impl<S: StateAccess, B: BlockStore> ConsensusReactor<S, B> {
    /// Sends the peer the single most useful piece of block data each
    /// iteration: a proposal part it is missing, a stored part while it
    /// catches up, or the proposal itself.
    pub(crate) async fn block_data_loop(
        self: Arc<Self>,
        record: Arc<PeerRecord>,
        quit: CancellationToken,
    ) {
        let peer = Arc::clone(record.peer());

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

            // Proposal parts the peer is missing, same part-set header.
            if let Some(parts) = &rs.proposal_block_parts {
                if self.send_missing_part(&record, parts, &prs).await {
                    continue;
                }
            }

            // A peer on an older height gets served out of the block store.
            if prs.height > 0 && prs.height < rs.height {
                if let Some(base) = store::base(&self.block_store()).await {
                    if base > 0 && prs.height >= base {
                        self.gossip_data_for_catchup(&record, &prs, &quit).await;
                        continue;
                    }
                }
            }

            // Nothing to exchange until the peer reaches our round.
            if rs.height != prs.height || rs.round != prs.round {
                if !self.gossip_sleep(&peer, &quit).await {
                    return;
                }
                continue;
            }

            // Same (height, round): hand over the proposal once.
            if let Some(proposal) = &rs.proposal {
                if !prs.proposal {
                    self.send_proposal(&record, &rs, proposal).await;
                    continue;
                }
            }

            if !self.gossip_sleep(&peer, &quit).await {
                return;
            }
        }
    }

    /// Picks a random proposal part the peer is missing and queues it.
    /// Returns `true` if a part was attempted.
    async fn send_missing_part(
        &self,
        record: &PeerRecord,
        parts: &PartSet,
        prs: &PeerRoundState,
    ) -> bool {
        let Some(header) = &prs.proposal_block_part_set_header else {
            return false;
        };
        if !parts.has_header(header) {
            return false;
        }
        let Some(peer_parts) = &prs.proposal_block_parts else {
            return false;
        };

        let Some(index) = parts.bit_array().sub(peer_parts).pick_random() else {
            return false;
        };
        let Some(part) = parts.get(index) else {
            return false;
        };

        tracing::debug!(peer = %record.peer().id(), index, "sending proposal block part");
        let envelope = Envelope::new(ConsensusMessage::BlockPart(BlockPartMessage {
            height: prs.height,
            round: prs.round,
            part: part.clone(),
        }));
        if record.peer().send(envelope).await {
            record.set_has_proposal_block_part(prs.height, prs.round, index);
        }
        true
    }

    /// Serves one stored block part to a peer on an older height.
    async fn gossip_data_for_catchup(
        &self,
        record: &PeerRecord,
        prs: &PeerRoundState,
        quit: &CancellationToken,
    ) {
        let peer = record.peer();

        // First contact at this height: tell the bookkeeping which part set
        // the stored block uses.
        let Some(peer_parts) = &prs.proposal_block_parts else {
            match store::block_meta(&self.block_store(), prs.height).await {
                Some(meta) => {
                    record.init_proposal_block_parts(meta.block_id.part_set_header);
                }
                None => {
                    tracing::debug!(height = prs.height, "no block meta while helping catchup");
                    self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
                        .await;
                }
            }
            return;
        };

        let Some(index) = peer_parts.not().pick_random() else {
            // The peer has every part; it will announce a new height soon.
            self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
                .await;
            return;
        };

        let Some(meta) = store::block_meta(&self.block_store(), prs.height).await else {
            tracing::error!(height = prs.height, "block meta disappeared while helping catchup");
            self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
                .await;
            return;
        };

        // The peer may sit on an orphaned fork whose part set differs from
        // the block we stored; serving our parts into its set would corrupt
        // it.
        if prs.proposal_block_part_set_header != Some(meta.block_id.part_set_header) {
            tracing::debug!(
                peer = %peer.id(),
                height = prs.height,
                "peer part-set header differs from stored block, waiting",
            );
            self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
                .await;
            return;
        }

        let index_u32 = u32::try_from(index).unwrap_or(u32::MAX);
        let Some(part) = store::block_part(&self.block_store(), prs.height, index_u32).await else {
            tracing::error!(height = prs.height, index, "stored block part missing");
            self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
                .await;
            return;
        };

        tracing::debug!(peer = %peer.id(), height = prs.height, index, "sending catchup block part");
        let envelope = Envelope::new(ConsensusMessage::BlockPart(BlockPartMessage {
            height: prs.height,
            round: prs.round,
            part,
        }));
        if record.peer().send(envelope).await {
            record.set_has_proposal_block_part(prs.height, prs.round, index);
        } else {
            tracing::debug!(peer = %peer.id(), "catchup part send failed");
        }
    }

    /// Hands the peer our proposal and, if it re-proposes a locked value,
    /// the proof-of-lock prevotes that justify it.
    async fn send_proposal(&self, record: &PeerRecord, rs: &RoundState, proposal: &Proposal) {
        let peer = record.peer();

        tracing::debug!(peer = %peer.id(), height = rs.height, round = rs.round, "sending proposal");
        let envelope = Envelope::new(ConsensusMessage::Proposal(ProposalMessage {
            proposal: proposal.clone(),
        }));
        if peer.send(envelope).await {
            // The peer now knows which parts exist; record it so the parts
            // branch takes over.
            record.set_has_proposal(proposal);
        }

        if proposal.pol_round >= 0 {
            if let Some(pol_votes) = rs.votes.prevotes(proposal.pol_round) {
                let envelope = Envelope::new(ConsensusMessage::ProposalPol(ProposalPol {
                    height: rs.height,
                    proposal_pol_round: proposal.pol_round,
                    proposal_pol: pol_votes.bit_array().clone(),
                }));
                peer.send(envelope).await;
            }
        }
    }
}
