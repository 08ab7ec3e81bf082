//! The transaction log.
//!
//! An append-only, sequence-numbered view of the mempool's contents in
//! admission order. The mempool pushes every admitted transaction here and
//! removes it when it is committed, evicted or invalidated; each broadcast
//! routine walks the log with its own [`TxLogCursor`].
//!
//! Removal does not perturb cursors: a removed entry simply stops being
//! yielded, and a cursor that already holds one observes the tombstone flag.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use tokio::sync::{mpsc, watch};

use galena_types::{Height, Tx, TxKey};

/// One admitted transaction.
pub struct TxLogEntry {
    key: TxKey,
    tx: Tx,
    /// The mempool height at admission; peers more than one block behind it
    /// are not ready for the transaction.
    height: Height,
    removed: AtomicBool,
}

impl TxLogEntry {
    pub const fn key(&self) -> TxKey {
        self.key
    }

    pub const fn tx(&self) -> &Tx {
        &self.tx
    }

    pub const fn height(&self) -> Height {
        self.height
    }

    /// `true` once the mempool has removed this transaction.
    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

struct Inner {
    entries: BTreeMap<u64, Arc<TxLogEntry>>,
    index: HashMap<TxKey, u64>,
    next_seq: u64,
}

/// The append-only transaction log. See the [module docs](self).
pub struct TxLog {
    inner: Mutex<Inner>,
    /// Bumped to `next_seq` on every push; cursors park on it.
    grown: watch::Sender<u64>,
    /// Keys of removed transactions, for sender-attribution cleanup.
    removals: mpsc::UnboundedSender<TxKey>,
}

impl TxLog {
    /// Creates an empty log and the stream of removed transaction keys.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<TxKey>) {
        let (removals_tx, removals_rx) = mpsc::unbounded_channel();
        let (grown_tx, _) = watch::channel(0);

        (
            Arc::new(Self {
                inner: Mutex::new(Inner {
                    entries: BTreeMap::new(),
                    index: HashMap::new(),
                    next_seq: 0,
                }),
                grown: grown_tx,
                removals: removals_tx,
            }),
            removals_rx,
        )
    }

    /// Appends an admitted transaction.
    ///
    /// A transaction is admitted at most once; pushing a key that is already
    /// live is a no-op.
    pub fn push(&self, tx: Tx, height: Height) -> TxKey {
        let key = tx.key();
        let version = {
            let mut inner = self.inner.lock().unwrap();
            if inner.index.contains_key(&key) {
                return key;
            }

            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.entries.insert(
                seq,
                Arc::new(TxLogEntry {
                    key,
                    tx,
                    height,
                    removed: AtomicBool::new(false),
                }),
            );
            inner.index.insert(key, seq);
            inner.next_seq
        };

        self.grown.send_replace(version);
        key
    }

    /// Removes a transaction, tombstoning any copies cursors still hold.
    pub fn remove(&self, key: &TxKey) -> bool {
        let removed = {
            let mut inner = self.inner.lock().unwrap();
            let Some(seq) = inner.index.remove(key) else {
                return false;
            };
            inner.entries.remove(&seq)
        };

        if let Some(entry) = removed {
            entry.removed.store(true, Ordering::Release);
            // The receiver being gone just means nobody wants cleanup
            // notifications.
            drop(self.removals.send(*key));
            true
        } else {
            false
        }
    }

    /// Number of live transactions.
    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().entries.len()
    }

    /// A cursor starting before the oldest live transaction.
    pub fn cursor(self: &Arc<Self>) -> TxLogCursor {
        TxLogCursor {
            log: Arc::clone(self),
            pos: 0,
            grown: self.grown.subscribe(),
        }
    }
}

/// One consumer's position in the [`TxLog`].
pub struct TxLogCursor {
    log: Arc<TxLog>,
    /// The next sequence number to consider.
    pos: u64,
    grown: watch::Receiver<u64>,
}

impl TxLogCursor {
    /// The next live entry at or past the cursor, without waiting.
    pub fn next(&mut self) -> Option<Arc<TxLogEntry>> {
        let inner = self.log.inner.lock().unwrap();
        let (seq, entry) = inner.entries.range(self.pos..).next()?;
        self.pos = seq + 1;
        Some(Arc::clone(entry))
    }

    /// The next live entry, waiting for the log to grow if needed.
    ///
    /// Returns [`None`] once the log has been dropped and drained.
    pub async fn next_entry(&mut self) -> Option<Arc<TxLogEntry>> {
        loop {
            // Mark the current version seen *before* scanning, so a push
            // racing the scan is caught by the next `changed()`.
            self.grown.borrow_and_update();

            if let Some(entry) = self.next() {
                return Some(entry);
            }

            if self.grown.changed().await.is_err() {
                return self.next();
            }
        }
    }
}
