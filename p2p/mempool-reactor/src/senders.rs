//! Per-transaction sender attribution.
//!
//! Two maps, both keyed by [`TxKey`]:
//!
//! - the *checked* senders: peers whose copy of the transaction passed
//!   `CheckTx`. An entry lives as long as the transaction does; the reactor
//!   erases it when the mempool removes the transaction.
//! - the *unchecked* senders: peers that sent us the transaction before
//!   `CheckTx` settled. Entries decay after a fixed number of
//!   broadcast-routine visits ([`UNCHECKED_REMOVE_VISITS`]) whatever
//!   `CheckTx` ended up saying, so a rejected transaction cannot leak an
//!   entry.
use std::collections::HashSet;

use dashmap::DashMap;

use galena_p2p_core::PeerId;
use galena_types::TxKey;

use crate::constants::UNCHECKED_REMOVE_VISITS;

#[derive(Default)]
struct UncheckedEntry {
    senders: HashSet<PeerId>,
    visits: u32,
}

/// The sender-attribution maps. All operations are O(1) map accesses.
#[derive(Default)]
pub struct SenderSets {
    checked: DashMap<TxKey, HashSet<PeerId>>,
    unchecked: DashMap<TxKey, UncheckedEntry>,
}

impl SenderSets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `peer` sent us the transaction, before `CheckTx` has
    /// settled.
    pub fn record_unchecked(&self, key: TxKey, peer: PeerId) {
        self.unchecked.entry(key).or_default().senders.insert(peer);
    }

    /// Records that `peer` sent us a copy that passed `CheckTx`.
    pub fn record_checked(&self, key: TxKey, peer: PeerId) {
        self.checked.entry(key).or_default().insert(peer);
    }

    /// `true` if `peer` is a checked sender of the transaction.
    pub fn is_checked_sender(&self, key: &TxKey, peer: &PeerId) -> bool {
        self.checked
            .get(key)
            .is_some_and(|senders| senders.contains(peer))
    }

    /// `true` if any checked or unchecked sender of the transaction
    /// satisfies `connected`.
    pub fn any_sender(&self, key: &TxKey, connected: impl Fn(&PeerId) -> bool) -> bool {
        if self
            .unchecked
            .get(key)
            .is_some_and(|entry| entry.senders.iter().any(&connected))
        {
            return true;
        }
        self.checked
            .get(key)
            .is_some_and(|senders| senders.iter().any(&connected))
    }

    /// Notes one broadcast-routine visit of the transaction, deleting the
    /// unchecked entry once every routine has seen it.
    pub fn note_broadcast_visit(&self, key: &TxKey) {
        let remove = {
            let Some(mut entry) = self.unchecked.get_mut(key) else {
                return;
            };
            entry.visits += 1;
            entry.visits >= UNCHECKED_REMOVE_VISITS
        };

        if remove {
            self.unchecked.remove(key);
            tracing::trace!(key = %key, "dropped unchecked sender entry");
        }
    }

    /// Erases the checked senders of a transaction the mempool removed.
    pub fn remove_checked(&self, key: &TxKey) {
        self.checked.remove(key);
    }

    /// `true` while an unchecked entry exists for the transaction.
    pub fn has_unchecked(&self, key: &TxKey) -> bool {
        self.unchecked.contains_key(key)
    }

    /// The checked senders of a transaction.
    pub fn checked_senders(&self, key: &TxKey) -> HashSet<PeerId> {
        self.checked
            .get(key)
            .map(|senders| senders.clone())
            .unwrap_or_default()
    }
}
