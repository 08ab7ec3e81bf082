//! Mempool reactor configuration.
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_TX_BYTES, DEFAULT_PEER_CATCHUP_SLEEP};

/// Configuration of the mempool reactor.
#[derive(Clone, Debug)]
pub struct MempoolConfig {
    /// Whether to relay transactions to peers at all. With this off the
    /// reactor still receives, but spawns no broadcast routines.
    pub broadcast: bool,
    /// Suppress relay of every peer-originated transaction, relying on the
    /// original sender's full-mesh reach instead.
    pub direct_broadcast: bool,
    /// Upper bound on concurrent broadcast routines towards persistent
    /// peers. `0` means unbounded.
    pub max_gossip_connections_to_persistent_peers: usize,
    /// Upper bound on concurrent broadcast routines towards non-persistent
    /// peers. `0` means unbounded.
    pub max_gossip_connections_to_non_persistent_peers: usize,
    /// How long a broadcast routine backs off when a peer lags behind a
    /// transaction's admission height, has no state yet, or applies
    /// backpressure.
    pub peer_catchup_sleep: Duration,
    /// The per-transaction size limit enforced on receive.
    pub max_tx_bytes: usize,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            broadcast: true,
            direct_broadcast: true,
            max_gossip_connections_to_persistent_peers: 0,
            max_gossip_connections_to_non_persistent_peers: 0,
            peer_catchup_sleep: DEFAULT_PEER_CATCHUP_SLEEP,
            max_tx_bytes: DEFAULT_MAX_TX_BYTES,
        }
    }
}
