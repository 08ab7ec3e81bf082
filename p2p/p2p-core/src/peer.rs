//! A connected peer and its per-channel send queues.
use std::sync::{
    atomic::{AtomicI64, AtomicU64, Ordering},
    Arc,
};

use tokio::sync::mpsc;

use galena_wire::{Channel, Envelope};

use crate::{ConnectionHandle, PeerId};

/// The height a peer reports before it has announced anything.
const HEIGHT_UNKNOWN: i64 = -1;

/// A connected peer.
///
/// Reactors hold peers behind [`Arc`]; the queue receivers go to the
/// connection task (or a test driving the peer directly). `send` provides
/// backpressure per channel, `try_send` never waits and is the right call
/// for drop-safe hints.
pub struct Peer {
    id: PeerId,
    persistent: bool,
    handle: ConnectionHandle,
    /// The height the peer last announced, [`HEIGHT_UNKNOWN`] until then.
    reported_height: AtomicI64,
    /// How often this peer has been acked as useful.
    good_marks: AtomicU64,
    /// One send queue per channel, indexed by position in [`Channel::ALL`].
    queues: [mpsc::Sender<Envelope>; 5],
}

/// The receiving ends of a peer's channel queues.
pub struct PeerChannels {
    pub state: mpsc::Receiver<Envelope>,
    pub data: mpsc::Receiver<Envelope>,
    pub vote: mpsc::Receiver<Envelope>,
    pub vote_set_bits: mpsc::Receiver<Envelope>,
    pub mempool: mpsc::Receiver<Envelope>,
}

impl Peer {
    /// Creates a peer and the receivers its connection task drains.
    pub fn new(
        id: PeerId,
        persistent: bool,
        handle: ConnectionHandle,
    ) -> (Arc<Self>, PeerChannels) {
        let make = |channel: Channel| mpsc::channel(channel.send_queue_capacity());

        let (state_tx, state_rx) = make(Channel::State);
        let (data_tx, data_rx) = make(Channel::Data);
        let (vote_tx, vote_rx) = make(Channel::Vote);
        let (vsb_tx, vsb_rx) = make(Channel::VoteSetBits);
        let (mempool_tx, mempool_rx) = make(Channel::Mempool);

        (
            Arc::new(Self {
                id,
                persistent,
                handle,
                reported_height: AtomicI64::new(HEIGHT_UNKNOWN),
                good_marks: AtomicU64::new(0),
                queues: [state_tx, data_tx, vote_tx, vsb_tx, mempool_tx],
            }),
            PeerChannels {
                state: state_rx,
                data: data_rx,
                vote: vote_rx,
                vote_set_bits: vsb_rx,
                mempool: mempool_rx,
            },
        )
    }

    pub const fn id(&self) -> PeerId {
        self.id
    }

    pub const fn is_persistent(&self) -> bool {
        self.persistent
    }

    pub const fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// `true` while the connection is up.
    pub fn is_running(&self) -> bool {
        !self.handle.is_closed()
    }

    /// The height the peer last announced, if it has announced one.
    pub fn reported_height(&self) -> Option<i64> {
        match self.reported_height.load(Ordering::Acquire) {
            HEIGHT_UNKNOWN => None,
            height => Some(height),
        }
    }

    /// Records the height the peer just announced.
    pub fn set_reported_height(&self, height: i64) {
        self.reported_height.store(height, Ordering::Release);
    }

    /// Queues an envelope, waiting for room on the channel's queue.
    ///
    /// Returns `false` if the connection closed before the envelope was
    /// queued; a queued envelope is not a delivered one.
    pub async fn send(&self, envelope: Envelope) -> bool {
        if self.handle.is_closed() {
            return false;
        }
        let queue = self.queue(envelope.channel);

        tokio::select! {
            res = queue.send(envelope) => res.is_ok(),
            () = self.handle.closed() => false,
        }
    }

    /// Queues an envelope only if there is room right now.
    pub fn try_send(&self, envelope: Envelope) -> bool {
        if self.handle.is_closed() {
            return false;
        }
        self.queue(envelope.channel).try_send(envelope).is_ok()
    }

    /// Bumps the peer's goodness counter, returning the new value.
    pub fn mark_good(&self) -> u64 {
        self.good_marks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// How often this peer has been acked as useful.
    pub fn good_marks(&self) -> u64 {
        self.good_marks.load(Ordering::Relaxed)
    }

    fn queue(&self, channel: Channel) -> &mpsc::Sender<Envelope> {
        let index = match channel {
            Channel::State => 0,
            Channel::Data => 1,
            Channel::Vote => 2,
            Channel::VoteSetBits => 3,
            Channel::Mempool => 4,
        };
        &self.queues[index]
    }
}

#[cfg(test)]
mod tests {
    use galena_wire::{ConsensusMessage, Envelope, HasVote, Message};

    use crate::{HandleBuilder, Peer, PeerId};

    fn hint() -> Envelope {
        Envelope::new(Message::Consensus(ConsensusMessage::HasVote(HasVote {
            height: 1,
            round: 0,
            vote_type: galena_types::VoteType::Prevote,
            index: 0,
        })))
    }

    #[tokio::test]
    async fn send_fails_once_closed() {
        let (guard, handle) = HandleBuilder::new().build();
        let (peer, _channels) = Peer::new(PeerId::new([1; 20]), false, handle);

        assert!(peer.send(hint()).await);

        drop(guard);
        assert!(!peer.send(hint()).await);
        assert!(!peer.try_send(hint()));
    }

    #[tokio::test]
    async fn send_unblocks_when_peer_dies_mid_wait() {
        let (guard, handle) = HandleBuilder::new().build();
        let (peer, channels) = Peer::new(PeerId::new([2; 20]), false, handle);

        // VoteSetBits has a queue of two; fill it without draining.
        assert!(peer.try_send(vsb()));
        assert!(peer.try_send(vsb()));
        assert!(!peer.try_send(vsb()));

        let sender = peer.clone();
        let waiter = tokio::spawn(async move { sender.send(vsb()).await });

        drop(guard);
        assert!(!waiter.await.unwrap());
        drop(channels);
    }

    fn vsb() -> Envelope {
        Envelope::new(Message::Consensus(ConsensusMessage::VoteSetBits(
            galena_wire::VoteSetBits {
                height: 1,
                round: 0,
                vote_type: galena_types::VoteType::Prevote,
                block_id: galena_types::BlockId::nil(),
                votes: galena_types::BitArray::new(4),
            },
        )))
    }

    #[test]
    fn reported_height_starts_unknown() {
        let (_guard, handle) = HandleBuilder::new().build();
        let (peer, _channels) = Peer::new(PeerId::new([3; 20]), false, handle);

        assert_eq!(peer.reported_height(), None);
        peer.set_reported_height(7);
        assert_eq!(peer.reported_height(), Some(7));
    }
}
