//! The mempool reactor: receive path, peer lifecycle and the per-peer
//! broadcast routines.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tower::{Service, ServiceExt};
use tracing::Instrument;

use galena_p2p_core::{Peer, PeerError, PeerId, Switch};
use galena_types::{Tx, TxKey};
use galena_wire::{Channel, Envelope, MempoolMessage, Message, Txs};

use crate::{
    check_tx::{CheckTxError, CheckTxRequest, CheckTxResponse},
    senders::SenderSets,
    tx_log::{TxLog, TxLogEntry},
    MempoolConfig,
};

/// Holds a routine's group-capacity permit and keeps the active-routine
/// gauge honest on every exit path.
struct RoutineSlot {
    gauge: Arc<AtomicUsize>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl RoutineSlot {
    fn new(gauge: Arc<AtomicUsize>, permit: Option<OwnedSemaphorePermit>) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self {
            gauge,
            _permit: permit,
        }
    }
}

impl Drop for RoutineSlot {
    fn drop(&mut self) {
        self.gauge.fetch_sub(1, Ordering::Relaxed);
    }
}

/// The mempool reactor. See the [crate docs](crate) for the overall shape.
///
/// `M` is the `CheckTx` application oracle.
pub struct MempoolReactor<M> {
    config: MempoolConfig,
    check_tx: M,
    senders: SenderSets,
    log: Arc<TxLog>,
    switch: Arc<Switch>,
    /// The reactor's own view of connected peers, mapped to their broadcast
    /// routines' stop tokens. Membership here is what "currently connected"
    /// means for sender-suppression decisions.
    peers: DashMap<PeerId, CancellationToken>,
    /// `false` until initial block sync finishes.
    in_out_enabled: watch::Sender<bool>,
    quit: CancellationToken,
    active_routines: Arc<AtomicUsize>,
    persistent_slots: Option<Arc<Semaphore>>,
    non_persistent_slots: Option<Arc<Semaphore>>,
}

impl<M> MempoolReactor<M>
where
    M: Service<CheckTxRequest, Response = CheckTxResponse, Error = CheckTxError>
        + Clone
        + Send
        + Sync
        + 'static,
    M::Future: Send + 'static,
{
    /// Creates the reactor around the mempool's transaction log and its
    /// `CheckTx` oracle.
    ///
    /// The reactor starts in the waiting-for-sync state; call
    /// [`enable_in_out_txs`](Self::enable_in_out_txs) once initial block
    /// sync finishes.
    pub fn new(
        config: MempoolConfig,
        check_tx: M,
        log: Arc<TxLog>,
        switch: Arc<Switch>,
    ) -> Arc<Self> {
        let cap_to_slots = |cap: usize| (cap > 0).then(|| Arc::new(Semaphore::new(cap)));
        let persistent_slots = cap_to_slots(config.max_gossip_connections_to_persistent_peers);
        let non_persistent_slots =
            cap_to_slots(config.max_gossip_connections_to_non_persistent_peers);

        Arc::new(Self {
            config,
            check_tx,
            senders: SenderSets::new(),
            log,
            switch,
            peers: DashMap::new(),
            in_out_enabled: watch::Sender::new(false),
            quit: CancellationToken::new(),
            active_routines: Arc::new(AtomicUsize::new(0)),
            persistent_slots,
            non_persistent_slots,
        })
    }

    /// Spawns the task that erases sender attribution for transactions the
    /// mempool removes.
    pub fn start(self: &Arc<Self>, mut removals: mpsc::UnboundedReceiver<TxKey>) {
        let this = Arc::clone(self);

        tokio::spawn(
            async move {
                loop {
                    tokio::select! {
                        () = this.quit.cancelled() => return,
                        key = removals.recv() => {
                            let Some(key) = key else { return };
                            this.senders.remove_checked(&key);
                        }
                    }
                }
            }
            .instrument(tracing::debug_span!("mempool_removals")),
        );
    }

    /// Leaves the waiting-for-sync state, waking every parked broadcast
    /// routine exactly once.
    pub fn enable_in_out_txs(&self) {
        let changed = self.in_out_enabled.send_if_modified(|enabled| {
            let was_waiting = !*enabled;
            *enabled = true;
            was_waiting
        });
        if changed {
            tracing::info!("enabling transaction relay");
        }
    }

    /// `true` while initial block sync is still running.
    pub fn is_waiting_sync(&self) -> bool {
        !*self.in_out_enabled.borrow()
    }

    /// Stops every broadcast routine and background task.
    pub fn shutdown(&self) {
        self.quit.cancel();
    }

    /// The sender-attribution maps.
    pub const fn senders(&self) -> &SenderSets {
        &self.senders
    }

    /// Number of broadcast routines currently running.
    pub fn active_broadcast_routines(&self) -> usize {
        self.active_routines.load(Ordering::Relaxed)
    }

    /// Registers a connected peer and spawns its broadcast routine.
    ///
    /// The peer is visible in the reactor's connected set *before* the
    /// routine starts, so a routine can never misread one of the peer's own
    /// transactions as peer-less.
    pub fn add_peer(self: &Arc<Self>, peer: Arc<Peer>) {
        if !self.config.broadcast {
            return;
        }

        let id = peer.id();
        let routine_quit = self.quit.child_token();
        self.peers.insert(id, routine_quit.clone());

        let this = Arc::clone(self);
        tokio::spawn(
            async move { this.broadcast_routine(peer, routine_quit).await }
                .instrument(tracing::debug_span!("tx_broadcast", peer = %id)),
        );
    }

    /// Deregisters a peer and stops its broadcast routine.
    pub fn remove_peer(&self, id: &PeerId) {
        if let Some((_, routine_quit)) = self.peers.remove(id) {
            routine_quit.cancel();
        }
    }

    /// Handles an envelope from `src`.
    ///
    /// Anything structurally invalid stops the peer; messages arriving
    /// while initial block sync runs are dropped.
    pub fn receive(self: &Arc<Self>, src: PeerId, envelope: Envelope) -> Result<(), PeerError> {
        if self.is_waiting_sync() {
            tracing::debug!(peer = %src, "dropped mempool message while syncing");
            return Ok(());
        }

        let result = self.handle_message(src, envelope);
        if let Err(error) = &result {
            self.switch.stop_peer_for_error(&src, error);
        }
        result
    }

    fn handle_message(self: &Arc<Self>, src: PeerId, envelope: Envelope) -> Result<(), PeerError> {
        if envelope.channel != Channel::Mempool || !envelope.channel_consistent() {
            return Err(PeerError::UnexpectedChannel(envelope.channel));
        }
        let Message::Mempool(MempoolMessage::Txs(batch)) = envelope.message else {
            return Err(PeerError::UnexpectedChannel(envelope.channel));
        };

        batch.validate(self.config.max_tx_bytes)?;

        for tx in batch.txs {
            let key = tx.key();
            self.senders.record_unchecked(key, src);
            self.spawn_check_tx(src, key, tx);
        }

        Ok(())
    }

    /// Runs `CheckTx` for a received transaction off the receive path,
    /// recording `src` as a checked sender if the application admits it.
    fn spawn_check_tx(self: &Arc<Self>, src: PeerId, key: TxKey, tx: Tx) {
        let oracle = self.check_tx.clone();
        let this = Arc::clone(self);

        tokio::spawn(async move {
            match oracle.oneshot(CheckTxRequest { tx }).await {
                Ok(resp) if resp.is_ok() => this.senders.record_checked(key, src),
                Ok(resp) => {
                    tracing::debug!(key = %key, code = resp.code, "application rejected transaction");
                }
                Err(CheckTxError::InCache) => {
                    tracing::debug!(key = %key, "transaction already in cache");
                }
                Err(error) => {
                    tracing::info!(key = %key, "check-tx failed: {error}");
                }
            }
        });
    }

    /// The per-peer broadcast routine.
    ///
    /// Parks until sync finishes, then walks the transaction log in
    /// admission order, sending each transaction the peer should have and
    /// does not.
    async fn broadcast_routine(self: Arc<Self>, peer: Arc<Peer>, quit: CancellationToken) {
        let slots = if peer.is_persistent() {
            &self.persistent_slots
        } else {
            &self.non_persistent_slots
        };

        let permit = match slots {
            Some(semaphore) => {
                let acquired = tokio::select! {
                    permit = Arc::clone(semaphore).acquire_owned() => permit,
                    () = quit.cancelled() => return,
                    () = peer.handle().closed() => return,
                };
                match acquired {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                }
            }
            None => None,
        };
        let _slot = RoutineSlot::new(Arc::clone(&self.active_routines), permit);

        // Park until initial block sync finishes.
        let mut enabled = self.in_out_enabled.subscribe();
        loop {
            if *enabled.borrow_and_update() {
                break;
            }
            tokio::select! {
                () = quit.cancelled() => return,
                () = peer.handle().closed() => return,
                changed = enabled.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }

        let mut cursor = self.log.cursor();
        loop {
            let entry = tokio::select! {
                () = quit.cancelled() => return,
                () = peer.handle().closed() => return,
                entry = cursor.next_entry() => match entry {
                    Some(entry) => entry,
                    None => return,
                },
            };

            if !self.gossip_tx_to_peer(&peer, &quit, &entry).await {
                return;
            }
        }
    }

    /// Evaluates one log entry against one peer, sending it unless
    /// attribution suppresses it. Returns `false` when the routine should
    /// terminate.
    async fn gossip_tx_to_peer(
        &self,
        peer: &Arc<Peer>,
        quit: &CancellationToken,
        entry: &Arc<TxLogEntry>,
    ) -> bool {
        // Hold the transaction back while the peer cannot use it yet:
        // either it lags more than one block behind the admission height,
        // or its state has not been attached (a handshake-ordering race).
        loop {
            if entry.is_removed() {
                return true;
            }
            match peer.reported_height() {
                Some(height) if height >= entry.height() - 1 => break,
                Some(height) => {
                    tracing::trace!(
                        peer = %peer.id(),
                        height,
                        needed = entry.height() - 1,
                        "peer behind transaction, waiting",
                    );
                }
                None => tracing::trace!(peer = %peer.id(), "peer has no state yet, waiting"),
            }
            if !self.catchup_sleep(peer, quit).await {
                return false;
            }
        }

        let key = entry.key();
        let from_peer = self.config.direct_broadcast
            && self
                .senders
                .any_sender(&key, |id| self.peers.contains_key(id));
        let already_known = self.senders.is_checked_sender(&key, &peer.id());
        self.senders.note_broadcast_visit(&key);

        if already_known || from_peer {
            tracing::trace!(
                peer = %peer.id(),
                key = %key,
                already_known,
                from_peer,
                "suppressed transaction relay",
            );
            return true;
        }

        let envelope = Envelope::new(Txs::single(entry.tx().clone()));
        loop {
            if peer.send(envelope.clone()).await {
                return true;
            }
            tracing::trace!(peer = %peer.id(), key = %key, "transaction send failed, retrying");
            if !self.catchup_sleep(peer, quit).await {
                return false;
            }
        }
    }

    /// Backs off for the configured catch-up interval. Returns `false` when
    /// the routine should terminate instead of retrying.
    async fn catchup_sleep(&self, peer: &Arc<Peer>, quit: &CancellationToken) -> bool {
        tokio::select! {
            () = tokio::time::sleep(self.config.peer_catchup_sleep) => true,
            () = quit.cancelled() => false,
            () = peer.handle().closed() => false,
        }
    }
}
