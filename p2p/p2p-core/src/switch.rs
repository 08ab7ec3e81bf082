//! # Switch
//!
//! The registry of currently connected peers, shared by every reactor.
//!
//! Internally this is a [`DashMap`], so care should be taken in `async`
//! code: the map uses blocking locks, and no lock may be held across an
//! await point.
use std::{fmt::Display, sync::Arc};

use dashmap::DashMap;

use galena_wire::Envelope;

use crate::{Peer, PeerId};

/// The registry of connected peers.
#[derive(Default)]
pub struct Switch {
    peers: DashMap<PeerId, Arc<Peer>>,
}

impl Switch {
    /// Creates an empty switch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connected peer.
    ///
    /// Returns `false` without adding if the peer's connection is already
    /// closed or a peer with the same id is present.
    pub fn add_peer(&self, peer: Arc<Peer>) -> bool {
        // Fast path: don't register peers that are already gone.
        if !peer.is_running() {
            return false;
        }

        let id = peer.id();
        let handle = peer.handle().clone();
        if self.peers.insert(id, peer).is_some() {
            return false;
        }

        // The connection may have died between the first check and the
        // insert, in which case nobody is left to remove the entry.
        if handle.is_closed() {
            self.peers.remove(&id);
            return false;
        }

        true
    }

    /// Removes a peer from the registry, returning it if it was present.
    pub fn remove_peer(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    /// The peer with the given id, if connected.
    pub fn get(&self, id: &PeerId) -> Option<Arc<Peer>> {
        self.peers.get(id).map(|entry| Arc::clone(&entry))
    }

    /// `true` if a peer with the given id is connected.
    pub fn contains(&self, id: &PeerId) -> bool {
        self.peers.contains_key(id)
    }

    /// A snapshot of every connected peer.
    pub fn peers(&self) -> Vec<Arc<Peer>> {
        self.peers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// `true` with no peers connected.
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Fans an envelope out to every connected peer.
    ///
    /// Uses `try_send`: everything that is broadcast is a hint, and a hint
    /// a peer has no queue room for is better dropped than waited on.
    pub fn broadcast(&self, envelope: &Envelope) {
        for entry in &self.peers {
            if !entry.value().try_send(envelope.clone()) {
                tracing::trace!(peer = %entry.key(), "dropped broadcast for busy peer");
            }
        }
    }

    /// Disconnects and deregisters a peer that violated the protocol.
    pub fn stop_peer_for_error(&self, id: &PeerId, error: &impl Display) {
        tracing::error!(peer = %id, "stopping peer: {error}");

        if let Some((_, peer)) = self.peers.remove(id) {
            peer.handle().disconnect();
        }
    }

    /// Acks a peer as useful, feeding whatever peer-scoring sits above the
    /// switch.
    pub fn mark_peer_as_good(&self, id: &PeerId) {
        if let Some(peer) = self.get(id) {
            let marks = peer.mark_good();
            tracing::debug!(peer = %id, marks, "marked peer as good");
        }
    }
}
