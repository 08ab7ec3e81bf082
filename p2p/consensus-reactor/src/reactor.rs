//! The consensus reactor: receive dispatch, peer lifecycle and the
//! singleton background tasks.
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use galena_p2p_core::{Peer, PeerError, PeerId, Switch};
use galena_types::BitArray;
use galena_wire::{
    Channel, ConsensusMessage, Envelope, HasProposalBlockPart, HasVote, Message, NewRoundStep,
    NewValidBlock, VoteSetBits, VoteSetMaj23,
};

use crate::{
    config::ConsensusConfig,
    constants::PEER_GOOD_ACK_INTERVAL,
    peer_state::PeerRecord,
    snapshot::spawn_round_state_cache,
    state::{ConsensusEvent, IncomingMessage, RoundState, StateAccess, StatsKind},
    store::BlockStore,
};

struct PeerSlot {
    record: Arc<PeerRecord>,
    loops_quit: CancellationToken,
}

/// The consensus reactor. See the [crate docs](crate) for the loop
/// structure.
///
/// `S` is the consensus state machine's read side, `B` the block store.
pub struct ConsensusReactor<S, B> {
    config: ConsensusConfig,
    state: Arc<S>,
    store: B,
    switch: Arc<Switch>,
    peers: DashMap<PeerId, PeerSlot>,
    snapshot: Arc<ArcSwap<RoundState>>,
    /// The consensus state machine's message inbox.
    peer_msg_queue: mpsc::Sender<IncomingMessage>,
    wait_sync: AtomicBool,
    quit: CancellationToken,
}

impl<S: StateAccess, B: BlockStore> ConsensusReactor<S, B> {
    /// Creates the reactor and starts the round-state snapshot ticker.
    ///
    /// `wait_sync` starts the reactor in initial-block-sync mode: State
    /// messages are processed (bookkeeping must track the network) but
    /// payload channels are dropped and the gossip loops idle until
    /// [`switch_to_consensus`](Self::switch_to_consensus).
    pub fn new(
        config: ConsensusConfig,
        state: Arc<S>,
        store: B,
        switch: Arc<Switch>,
        peer_msg_queue: mpsc::Sender<IncomingMessage>,
        wait_sync: bool,
    ) -> Arc<Self> {
        let quit = CancellationToken::new();
        let snapshot = spawn_round_state_cache(
            Arc::clone(&state),
            config.round_state_snapshot_interval,
            quit.child_token(),
        );

        Arc::new(Self {
            config,
            state,
            store,
            switch,
            peers: DashMap::new(),
            snapshot,
            peer_msg_queue,
            wait_sync: AtomicBool::new(wait_sync),
            quit,
        })
    }

    /// Spawns the event-broadcast and peer-statistics tasks.
    pub fn start(
        self: &Arc<Self>,
        events: broadcast::Receiver<ConsensusEvent>,
        stats: mpsc::Receiver<(PeerId, StatsKind)>,
    ) {
        let this = Arc::clone(self);
        tokio::spawn(
            this.broadcast_events_routine(events)
                .instrument(tracing::debug_span!("consensus_events")),
        );

        let this = Arc::clone(self);
        tokio::spawn(
            this.peer_stats_routine(stats)
                .instrument(tracing::debug_span!("peer_stats")),
        );
    }

    /// Stops every loop and background task.
    pub fn shutdown(&self) {
        self.quit.cancel();
    }

    /// `true` while initial block sync runs.
    pub fn wait_sync(&self) -> bool {
        self.wait_sync.load(Ordering::Acquire)
    }

    /// Leaves initial-block-sync mode and announces our round state to
    /// everyone.
    pub fn switch_to_consensus(&self) {
        if !self.wait_sync.swap(false, Ordering::AcqRel) {
            return;
        }
        tracing::info!("switching from block sync to consensus dissemination");
        self.switch.broadcast(&Envelope::new(ConsensusMessage::NewRoundStep(
            self.our_round_step_message(),
        )));
    }

    /// Registers a peer and spawns its three dissemination loops.
    pub fn add_peer(self: &Arc<Self>, peer: Arc<Peer>) {
        let id = peer.id();
        let record = PeerRecord::new(Arc::clone(&peer));
        let loops_quit = self.quit.child_token();

        self.peers.insert(
            id,
            PeerSlot {
                record: Arc::clone(&record),
                loops_quit: loops_quit.clone(),
            },
        );

        tokio::spawn(
            Arc::clone(self)
                .block_data_loop(Arc::clone(&record), loops_quit.clone())
                .instrument(tracing::debug_span!("gossip_data", peer = %id)),
        );
        tokio::spawn(
            Arc::clone(self)
                .votes_loop(Arc::clone(&record), loops_quit.clone())
                .instrument(tracing::debug_span!("gossip_votes", peer = %id)),
        );
        tokio::spawn(
            Arc::clone(self)
                .query_maj23_loop(Arc::clone(&record), loops_quit)
                .instrument(tracing::debug_span!("query_maj23", peer = %id)),
        );

        // Prime the new peer with where we are, so its bookkeeping for us
        // starts at the right coordinates.
        if !self.wait_sync() {
            peer.try_send(Envelope::new(ConsensusMessage::NewRoundStep(
                self.our_round_step_message(),
            )));
        }
    }

    /// Deregisters a peer and stops its loops.
    pub fn remove_peer(&self, id: &PeerId) {
        if let Some((_, slot)) = self.peers.remove(id) {
            slot.loops_quit.cancel();
        }
    }

    /// The peer's round-state record, if the peer is registered.
    pub fn record(&self, id: &PeerId) -> Option<Arc<PeerRecord>> {
        self.peers.get(id).map(|slot| Arc::clone(&slot.record))
    }

    /// Handles an envelope from `src`, stopping the peer on protocol
    /// violations.
    pub async fn receive(self: &Arc<Self>, src: PeerId, envelope: Envelope) -> Result<(), PeerError> {
        let result = self.handle_envelope(src, envelope).await;
        if let Err(error) = &result {
            self.switch.stop_peer_for_error(&src, error);
        }
        result
    }

    async fn handle_envelope(
        self: &Arc<Self>,
        src: PeerId,
        envelope: Envelope,
    ) -> Result<(), PeerError> {
        if !envelope.channel_consistent() {
            return Err(PeerError::UnexpectedChannel(envelope.channel));
        }
        let Message::Consensus(message) = envelope.message else {
            return Err(PeerError::UnexpectedChannel(envelope.channel));
        };

        message.validate()?;

        let Some(record) = self.record(&src) else {
            tracing::debug!(peer = %src, "message from unregistered peer, dropping");
            return Ok(());
        };

        // Payload channels are held back during initial block sync; State
        // announcements are always applied so the bookkeeping tracks the
        // network.
        if self.wait_sync() && message.channel() != Channel::State {
            tracing::debug!(peer = %src, "dropped payload message while syncing");
            return Ok(());
        }

        match message {
            ConsensusMessage::NewRoundStep(msg) => {
                msg.validate_height(self.state.initial_height())?;
                record.apply_new_round_step(&msg);
                record.peer().set_reported_height(msg.height);
                Ok(())
            }
            ConsensusMessage::NewValidBlock(msg) => {
                record.apply_new_valid_block(&msg);
                Ok(())
            }
            ConsensusMessage::HasVote(msg) => {
                record.set_has_vote(msg.height, msg.round, msg.vote_type, msg.index as usize);
                Ok(())
            }
            ConsensusMessage::HasProposalBlockPart(msg) => {
                record.set_has_proposal_block_part(msg.height, msg.round, msg.index as usize);
                Ok(())
            }
            ConsensusMessage::VoteSetMaj23(msg) => {
                self.handle_vote_set_maj23(&record, src, msg).await;
                Ok(())
            }
            ConsensusMessage::Proposal(msg) => {
                record.set_has_proposal(&msg.proposal);
                self.forward(src, ConsensusMessage::Proposal(msg)).await;
                Ok(())
            }
            ConsensusMessage::ProposalPol(msg) => {
                record.apply_proposal_pol(&msg);
                self.forward(src, ConsensusMessage::ProposalPol(msg)).await;
                Ok(())
            }
            ConsensusMessage::BlockPart(msg) => {
                record.set_has_proposal_block_part(msg.height, msg.round, msg.part.index as usize);
                self.forward(src, ConsensusMessage::BlockPart(msg)).await;
                Ok(())
            }
            ConsensusMessage::Vote(msg) => {
                let height = self.state.height();
                record.ensure_vote_bit_arrays(height, self.state.validator_count());
                record.ensure_vote_bit_arrays(height - 1, self.state.last_commit_size());
                record.set_has_vote(
                    msg.vote.height,
                    msg.vote.round,
                    msg.vote.vote_type,
                    msg.vote.validator_index as usize,
                );
                self.forward(src, ConsensusMessage::Vote(msg)).await;
                Ok(())
            }
            ConsensusMessage::VoteSetBits(msg) => {
                let rs = self.snapshot();
                let our_votes = (rs.height == msg.height)
                    .then(|| {
                        rs.votes
                            .votes(msg.vote_type, msg.round)
                            .and_then(|votes| votes.bit_array_by_block_id(&msg.block_id))
                    })
                    .flatten();
                record.apply_vote_set_bits(&msg, our_votes.as_ref());
                Ok(())
            }
        }
    }

    /// A peer claims a two-thirds majority: pass the claim to the state
    /// machine and answer with the bits we hold, so the peer can send us
    /// exactly what we miss.
    async fn handle_vote_set_maj23(&self, record: &PeerRecord, src: PeerId, msg: VoteSetMaj23) {
        let rs = self.snapshot();
        if rs.height != msg.height {
            return;
        }

        self.forward(src, ConsensusMessage::VoteSetMaj23(msg)).await;

        let our_votes = rs
            .votes
            .votes(msg.vote_type, msg.round)
            .and_then(|votes| votes.bit_array_by_block_id(&msg.block_id))
            .unwrap_or_else(|| BitArray::new(0));

        record.peer().try_send(Envelope::new(ConsensusMessage::VoteSetBits(VoteSetBits {
            height: msg.height,
            round: msg.round,
            vote_type: msg.vote_type,
            block_id: msg.block_id,
            votes: our_votes,
        })));
    }

    /// Forwards a payload message into the consensus state machine's inbox.
    async fn forward(&self, src: PeerId, message: ConsensusMessage) {
        let incoming = IncomingMessage { peer: src, message };
        if self.peer_msg_queue.send(incoming).await.is_err() {
            tracing::error!("consensus message inbox closed");
        }
    }

    /// Fans consensus events out as State-channel hints to every peer.
    async fn broadcast_events_routine(
        self: Arc<Self>,
        mut events: broadcast::Receiver<ConsensusEvent>,
    ) {
        loop {
            tokio::select! {
                () = self.quit.cancelled() => return,
                event = events.recv() => match event {
                    Ok(event) => {
                        let message = event_to_message(event);
                        self.switch.broadcast(&Envelope::new(message));
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "event bus lagged, continuing");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }

    /// Counts useful messages per peer and acks good peers at the switch.
    async fn peer_stats_routine(self: Arc<Self>, mut stats: mpsc::Receiver<(PeerId, StatsKind)>) {
        loop {
            let received = tokio::select! {
                () = self.quit.cancelled() => return,
                received = stats.recv() => received,
            };
            let Some((id, kind)) = received else { return };
            let Some(record) = self.record(&id) else {
                // The peer is gone; its stats die with it.
                continue;
            };

            let count = match kind {
                StatsKind::Vote => record.record_vote(),
                StatsKind::BlockPart => record.record_block_part(),
            };
            if count % PEER_GOOD_ACK_INTERVAL == 0 {
                self.switch.mark_peer_as_good(&id);
            }
        }
    }

    fn our_round_step_message(&self) -> NewRoundStep {
        let rs = self.snapshot();
        NewRoundStep {
            height: rs.height,
            round: rs.round,
            step: rs.step,
            seconds_since_start_time: rs.seconds_since_start(),
            last_commit_round: rs.last_commit_round(),
        }
    }

    pub(crate) const fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub(crate) fn state(&self) -> &S {
        &self.state
    }

    pub(crate) fn block_store(&self) -> B {
        self.store.clone()
    }

    /// The cached round-state snapshot.
    pub fn snapshot(&self) -> Arc<RoundState> {
        self.snapshot.load_full()
    }
}

fn event_to_message(event: ConsensusEvent) -> ConsensusMessage {
    match event {
        ConsensusEvent::NewRoundStep {
            height,
            round,
            step,
            seconds_since_start_time,
            last_commit_round,
        } => ConsensusMessage::NewRoundStep(NewRoundStep {
            height,
            round,
            step,
            seconds_since_start_time,
            last_commit_round,
        }),
        ConsensusEvent::NewValidBlock {
            height,
            round,
            block_part_set_header,
            block_parts,
            is_commit,
        } => ConsensusMessage::NewValidBlock(NewValidBlock {
            height,
            round,
            block_part_set_header,
            block_parts,
            is_commit,
        }),
        ConsensusEvent::Vote(vote) => ConsensusMessage::HasVote(HasVote {
            height: vote.height,
            round: vote.round,
            vote_type: vote.vote_type,
            index: vote.validator_index,
        }),
        ConsensusEvent::ProposalBlockPart {
            height,
            round,
            index,
        } => ConsensusMessage::HasProposalBlockPart(HasProposalBlockPart {
            height,
            round,
            index,
        }),
    }
}
