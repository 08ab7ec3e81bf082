//! Consensus reactor configuration.
use std::time::Duration;

use crate::constants::{
    DEFAULT_PEER_GOSSIP_INTRALOOP_SLEEP, DEFAULT_PEER_GOSSIP_SLEEP,
    DEFAULT_PEER_QUERY_MAJ23_SLEEP, DEFAULT_ROUND_STATE_SNAPSHOT_INTERVAL,
};

/// Configuration of the consensus reactor.
#[derive(Clone, Debug)]
pub struct ConsensusConfig {
    /// How long a gossip loop sleeps when it has nothing to send.
    pub peer_gossip_sleep: Duration,
    /// Upper bound of the uniformly-random jitter slept before each gossip
    /// iteration, to spread load across peers. Zero disables it.
    pub peer_gossip_intraloop_sleep: Duration,
    /// How often the query-majority loop runs.
    pub peer_query_maj23_sleep: Duration,
    /// How often the round-state snapshot is refreshed from the consensus
    /// state.
    pub round_state_snapshot_interval: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            peer_gossip_sleep: DEFAULT_PEER_GOSSIP_SLEEP,
            peer_gossip_intraloop_sleep: DEFAULT_PEER_GOSSIP_INTRALOOP_SLEEP,
            peer_query_maj23_sleep: DEFAULT_PEER_QUERY_MAJ23_SLEEP,
            round_state_snapshot_interval: DEFAULT_ROUND_STATE_SNAPSHOT_INTERVAL,
        }
    }
}
