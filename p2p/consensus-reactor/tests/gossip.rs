//! End-to-end behavior of the per-peer dissemination loops and the receive
//! path.
use std::{
    collections::{HashMap, HashSet},
    future::{ready, Ready},
    sync::{Arc, Mutex},
    task::{Context, Poll},
    time::Duration,
};

use tokio::{
    sync::{broadcast, mpsc},
    time::sleep,
};

use galena_consensus_reactor::{
    BlockStoreRequest, BlockStoreResponse, ConsensusConfig, ConsensusEvent, ConsensusReactor,
    IncomingMessage, RoundState, StateAccess, StatsKind, PEER_GOOD_ACK_INTERVAL,
};
use galena_p2p_core::{ConnectionGuard, HandleBuilder, Peer, PeerChannels, PeerId, Switch};
use galena_types::{
    BitArray, BlockId, BlockIdFlag, BlockMeta, Commit, CommitSig, HeightVoteSet, Part,
    PartSetHeader, Step, Vote, VoteSet, VoteType,
};
use galena_wire::{
    ConsensusMessage, Envelope, Message, NewRoundStep, NewValidBlock, VoteMessage, VoteSetMaj23,
};

struct MockState {
    round_state: Mutex<RoundState>,
    initial_height: i64,
    validators: usize,
    extensions_enabled: bool,
}

impl MockState {
    fn new(round_state: RoundState, validators: usize) -> Arc<Self> {
        Arc::new(Self {
            round_state: Mutex::new(round_state),
            initial_height: 1,
            validators,
            extensions_enabled: false,
        })
    }
}

impl StateAccess for MockState {
    fn round_state(&self) -> RoundState {
        self.round_state.lock().unwrap().clone()
    }

    fn height(&self) -> i64 {
        self.round_state.lock().unwrap().height
    }

    fn initial_height(&self) -> i64 {
        self.initial_height
    }

    fn validator_count(&self) -> usize {
        self.validators
    }

    fn last_commit_size(&self) -> usize {
        self.validators
    }

    fn vote_extensions_enabled(&self, _height: i64) -> bool {
        self.extensions_enabled
    }
}

#[derive(Default)]
struct StoreData {
    base: i64,
    height: i64,
    metas: HashMap<i64, BlockMeta>,
    parts: HashMap<(i64, u32), Part>,
    commits: HashMap<i64, Commit>,
}

/// An in-memory block store service.
#[derive(Clone)]
struct MockStore(Arc<StoreData>);

impl tower::Service<BlockStoreRequest> for MockStore {
    type Response = BlockStoreResponse;
    type Error = tower::BoxError;
    type Future = Ready<Result<BlockStoreResponse, tower::BoxError>>;

    fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: BlockStoreRequest) -> Self::Future {
        let data = &self.0;
        ready(Ok(match request {
            BlockStoreRequest::Base => BlockStoreResponse::Base(data.base),
            BlockStoreRequest::Height => BlockStoreResponse::Height(data.height),
            BlockStoreRequest::BlockMeta(height) => {
                BlockStoreResponse::BlockMeta(data.metas.get(&height).cloned())
            }
            BlockStoreRequest::BlockPart { height, index } => {
                BlockStoreResponse::BlockPart(data.parts.get(&(height, index)).cloned())
            }
            BlockStoreRequest::Commit(height) => {
                BlockStoreResponse::Commit(data.commits.get(&height).cloned())
            }
            BlockStoreRequest::ExtendedCommit(_) => BlockStoreResponse::ExtendedCommit(None),
        }))
    }
}

fn fast_config() -> ConsensusConfig {
    ConsensusConfig {
        peer_gossip_sleep: Duration::from_millis(10),
        peer_gossip_intraloop_sleep: Duration::ZERO,
        peer_query_maj23_sleep: Duration::from_millis(50),
        round_state_snapshot_interval: Duration::from_millis(1),
    }
}

struct TestPeer {
    peer: Arc<Peer>,
    channels: PeerChannels,
    _guard: ConnectionGuard,
}

fn test_peer(tag: u8) -> TestPeer {
    let (guard, handle) = HandleBuilder::new().build();
    let (peer, channels) = Peer::new(PeerId::new([tag; 20]), false, handle);
    TestPeer {
        peer,
        channels,
        _guard: guard,
    }
}

fn round_step(height: i64, round: i32, step: Step) -> Envelope {
    Envelope::new(ConsensusMessage::NewRoundStep(NewRoundStep {
        height,
        round,
        step,
        seconds_since_start_time: 0,
        last_commit_round: 0,
    }))
}

fn block_id(tag: u8, total: u32) -> BlockId {
    BlockId {
        hash: [tag; 32],
        part_set_header: PartSetHeader {
            total,
            hash: [tag; 32],
        },
    }
}

fn vote(vote_type: VoteType, height: i64, round: i32, index: u32, block: Option<BlockId>) -> Vote {
    Vote {
        vote_type,
        height,
        round,
        block_id: block,
        timestamp: 0,
        validator_index: index,
        signature: vec![index as u8 + 1; 64],
        extension: vec![],
        extension_signature: vec![],
    }
}

async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("condition did not hold in time");
}

/// A lagging peer first gets its part tracking initialized from the stored
/// block meta, then one random missing part per iteration until complete.
#[tokio::test(start_paused = true)]
async fn catchup_serves_stored_block_parts() {
    let peer_height = 5_i64;
    let total_parts = 3_u32;
    let stored_block = block_id(9, total_parts);

    let mut data = StoreData {
        base: 1,
        height: 10,
        ..StoreData::default()
    };
    data.metas.insert(
        peer_height,
        BlockMeta {
            height: peer_height,
            block_id: stored_block,
        },
    );
    for index in 0..total_parts {
        data.parts.insert(
            (peer_height, index),
            Part {
                index,
                bytes: bytes::Bytes::from(vec![index as u8; 8]),
                proof: [index as u8; 32],
            },
        );
    }

    let state = MockState::new(
        RoundState {
            height: 10,
            votes: HeightVoteSet::new(10),
            ..RoundState::default()
        },
        4,
    );
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(data)),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let mut remote = test_peer(1);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));
    reactor
        .receive(remote.peer.id(), round_step(peer_height, 0, Step::Prevote))
        .await
        .unwrap();

    let mut indices = HashSet::new();
    eventually(|| {
        while let Ok(envelope) = remote.channels.data.try_recv() {
            let Message::Consensus(ConsensusMessage::BlockPart(msg)) = envelope.message else {
                panic!("unexpected data-channel message");
            };
            assert_eq!(msg.height, peer_height);
            indices.insert(msg.part.index);
        }
        indices.len() == total_parts as usize
    })
    .await;

    let record = reactor.record(&remote.peer.id()).unwrap();
    assert_eq!(
        record.round_state().proposal_block_part_set_header,
        Some(stored_block.part_set_header)
    );
    // The bit is recorded after the send is queued, so observing the part
    // can race the bookkeeping by one instant.
    eventually(|| {
        record
            .round_state()
            .proposal_block_parts
            .is_some_and(|parts| parts.count_ones() == total_parts as usize)
    })
    .await;
}

/// A peer two heights behind is served precommits reconstructed from the
/// stored commit, one vote per iteration, with the commit round cached.
#[tokio::test(start_paused = true)]
async fn catchup_serves_stored_commit_votes() {
    let peer_height = 10_i64;
    let commit_round = 1_i32;
    let committed = block_id(7, 4);

    let mut data = StoreData {
        base: 1,
        height: 12,
        ..StoreData::default()
    };
    data.commits.insert(
        peer_height,
        Commit {
            height: peer_height,
            round: commit_round,
            block_id: committed,
            signatures: vec![
                CommitSig {
                    flag: BlockIdFlag::Commit,
                    timestamp: 1,
                    signature: vec![1; 64],
                },
                CommitSig::absent(),
                CommitSig {
                    flag: BlockIdFlag::Nil,
                    timestamp: 2,
                    signature: vec![2; 64],
                },
            ],
        },
    );

    let state = MockState::new(
        RoundState {
            height: 12,
            votes: HeightVoteSet::new(12),
            ..RoundState::default()
        },
        3,
    );
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(data)),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let mut remote = test_peer(2);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));
    reactor
        .receive(remote.peer.id(), round_step(peer_height, 0, Step::Prevote))
        .await
        .unwrap();

    let mut received = HashSet::new();
    eventually(|| {
        while let Ok(envelope) = remote.channels.vote.try_recv() {
            let Message::Consensus(ConsensusMessage::Vote(VoteMessage { vote })) = envelope.message
            else {
                panic!("unexpected vote-channel message");
            };
            assert_eq!(vote.vote_type, VoteType::Precommit);
            assert_eq!(vote.height, peer_height);
            assert_eq!(vote.round, commit_round);
            // Votes the peer already has are never re-picked.
            assert!(received.insert(vote.validator_index));
        }
        received.len() == 2
    })
    .await;

    let prs = reactor.record(&remote.peer.id()).unwrap().round_state();
    assert_eq!(prs.catchup_commit_round, commit_round);
}

/// At equal (height, round, step) the peer's vote bit arrays converge to
/// ours without a single duplicate send.
#[tokio::test(start_paused = true)]
async fn vote_loop_converges_at_equal_height() {
    let height = 8_i64;
    let target = block_id(3, 2);

    let mut votes = HeightVoteSet::new(height);
    let mut prevotes = VoteSet::new(height, 0, VoteType::Prevote, 4);
    for index in 0..3 {
        prevotes
            .add_vote(vote(VoteType::Prevote, height, 0, index, Some(target)))
            .unwrap();
    }
    votes.insert(prevotes);
    let mut precommits = VoteSet::new(height, 0, VoteType::Precommit, 4);
    for index in 0..2 {
        precommits
            .add_vote(vote(VoteType::Precommit, height, 0, index, Some(target)))
            .unwrap();
    }
    votes.insert(precommits);

    let state = MockState::new(
        RoundState {
            height,
            votes,
            ..RoundState::default()
        },
        4,
    );
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let mut remote = test_peer(3);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));
    reactor
        .receive(remote.peer.id(), round_step(height, 0, Step::Prevote))
        .await
        .unwrap();

    let mut received = HashSet::new();
    eventually(|| {
        while let Ok(envelope) = remote.channels.vote.try_recv() {
            let Message::Consensus(ConsensusMessage::Vote(VoteMessage { vote })) = envelope.message
            else {
                panic!("unexpected vote-channel message");
            };
            assert!(received.insert((vote.vote_type, vote.validator_index)));
        }
        received.len() == 5
    })
    .await;

    let record = reactor.record(&remote.peer.id()).unwrap();
    eventually(|| {
        let prs = record.round_state();
        prs.prevotes.is_some_and(|bits| bits.count_ones() == 3)
            && prs.precommits.is_some_and(|bits| bits.count_ones() == 2)
    })
    .await;
}

/// A majority claim is answered with our bit array for that block id and
/// forwarded to the state machine.
#[tokio::test(start_paused = true)]
async fn maj23_claim_gets_a_vote_set_bits_reply() {
    let height = 8_i64;
    let target = block_id(4, 2);

    let mut votes = HeightVoteSet::new(height);
    let mut prevotes = VoteSet::new(height, 0, VoteType::Prevote, 4);
    for index in 0..3 {
        prevotes
            .add_vote(vote(VoteType::Prevote, height, 0, index, Some(target)))
            .unwrap();
    }
    votes.insert(prevotes);

    let state = MockState::new(
        RoundState {
            height,
            votes,
            ..RoundState::default()
        },
        4,
    );
    let (inbox_tx, mut inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let mut remote = test_peer(4);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));
    reactor
        .receive(remote.peer.id(), round_step(height, 0, Step::Prevote))
        .await
        .unwrap();

    reactor
        .receive(
            remote.peer.id(),
            Envelope::new(ConsensusMessage::VoteSetMaj23(VoteSetMaj23 {
                height,
                round: 0,
                vote_type: VoteType::Prevote,
                block_id: target,
            })),
        )
        .await
        .unwrap();

    let reply = remote.channels.vote_set_bits.try_recv().unwrap();
    let Message::Consensus(ConsensusMessage::VoteSetBits(bits)) = reply.message else {
        panic!("expected a vote-set-bits reply");
    };
    assert_eq!(bits.height, height);
    assert_eq!(bits.block_id, target);
    let mut expected = BitArray::new(4);
    for index in 0..3 {
        expected.set(index, true);
    }
    assert_eq!(bits.votes, expected);

    let forwarded = inbox_rx.try_recv().unwrap();
    assert!(matches!(
        forwarded,
        IncomingMessage {
            message: ConsensusMessage::VoteSetMaj23(_),
            ..
        }
    ));
}

/// During initial block sync, State announcements are applied but payload
/// channels are dropped.
#[tokio::test(start_paused = true)]
async fn wait_sync_processes_state_but_drops_payloads() {
    let state = MockState::new(RoundState::default(), 4);
    let (inbox_tx, mut inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        true,
    );

    let remote = test_peer(5);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));

    reactor
        .receive(remote.peer.id(), round_step(6, 1, Step::Prevote))
        .await
        .unwrap();
    let prs = reactor.record(&remote.peer.id()).unwrap().round_state();
    assert_eq!((prs.height, prs.round), (6, 1));
    assert_eq!(remote.peer.reported_height(), Some(6));

    reactor
        .receive(
            remote.peer.id(),
            Envelope::new(ConsensusMessage::Vote(VoteMessage {
                vote: vote(VoteType::Prevote, 6, 1, 0, None),
            })),
        )
        .await
        .unwrap();
    assert!(inbox_rx.try_recv().is_err());
}

/// A structurally invalid message stops the peer.
#[tokio::test(start_paused = true)]
async fn invalid_message_stops_the_peer() {
    let state = MockState::new(RoundState::default(), 4);
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let remote = test_peer(6);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));

    // Bit array sized 3 against a header claiming 4 parts.
    let envelope = Envelope::new(ConsensusMessage::NewValidBlock(NewValidBlock {
        height: 5,
        round: 0,
        block_part_set_header: PartSetHeader {
            total: 4,
            hash: [0; 32],
        },
        block_parts: BitArray::new(3),
        is_commit: false,
    }));
    assert!(reactor.receive(remote.peer.id(), envelope).await.is_err());
    assert!(!switch.contains(&remote.peer.id()));
    assert!(!remote.peer.is_running());
}

/// A round-step announcement below the chain's initial height is a
/// protocol violation.
#[tokio::test(start_paused = true)]
async fn round_step_below_initial_height_stops_the_peer() {
    let state = MockState::new(RoundState::default(), 4);
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );

    let remote = test_peer(7);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));

    assert!(reactor
        .receive(remote.peer.id(), round_step(0, 0, Step::Propose))
        .await
        .is_err());
    assert!(!remote.peer.is_running());
}

/// Consensus events fan out as State-channel hints to every peer.
#[tokio::test(start_paused = true)]
async fn events_broadcast_as_state_hints() {
    let state = MockState::new(RoundState::default(), 4);
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let (events_tx, events_rx) = broadcast::channel(16);
    let (_stats_tx, stats_rx) = mpsc::channel(16);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );
    reactor.start(events_rx, stats_rx);

    let mut remote = test_peer(8);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));
    // Drain the round-step priming sent on add.
    let _unused = remote.channels.state.try_recv();

    events_tx
        .send(ConsensusEvent::Vote(vote(
            VoteType::Prevote,
            3,
            0,
            2,
            None,
        )))
        .unwrap();

    eventually(|| {
        matches!(
            remote.channels.state.try_recv(),
            Ok(Envelope {
                message: Message::Consensus(ConsensusMessage::HasVote(_)),
                ..
            })
        )
    })
    .await;
}

/// Every ten-thousandth useful message acks the peer as good at the
/// switch.
#[tokio::test(start_paused = true)]
async fn stats_routine_acks_good_peers() {
    let state = MockState::new(RoundState::default(), 4);
    let (inbox_tx, _inbox_rx) = mpsc::channel(64);
    let (_events_tx, events_rx) = broadcast::channel(16);
    let (stats_tx, stats_rx) = mpsc::channel(64);
    let switch = Arc::new(Switch::new());
    let reactor = ConsensusReactor::new(
        fast_config(),
        state,
        MockStore(Arc::new(StoreData::default())),
        Arc::clone(&switch),
        inbox_tx,
        false,
    );
    reactor.start(events_rx, stats_rx);

    let remote = test_peer(9);
    switch.add_peer(Arc::clone(&remote.peer));
    reactor.add_peer(Arc::clone(&remote.peer));

    for _ in 0..PEER_GOOD_ACK_INTERVAL {
        stats_tx
            .send((remote.peer.id(), StatsKind::Vote))
            .await
            .unwrap();
    }

    eventually(|| remote.peer.good_marks() == 1).await;
}
