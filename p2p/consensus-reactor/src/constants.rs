use std::time::Duration;

/// How long a gossip loop sleeps when it found nothing useful to send.
pub(crate) const DEFAULT_PEER_GOSSIP_SLEEP: Duration = Duration::from_millis(100);

/// Default upper bound of the uniformly-random jitter slept before each
/// gossip iteration. Zero disables the jitter.
pub(crate) const DEFAULT_PEER_GOSSIP_INTRALOOP_SLEEP: Duration = Duration::ZERO;

/// How often the query-majority loop inspects our vote sets.
pub(crate) const DEFAULT_PEER_QUERY_MAJ23_SLEEP: Duration = Duration::from_secs(2);

/// How often the round-state snapshot cache is refreshed from the consensus
/// state.
pub(crate) const DEFAULT_ROUND_STATE_SNAPSHOT_INTERVAL: Duration = Duration::from_millis(5);

/// After how many received votes (or block parts) a peer is acked as good
/// at the switch.
pub const PEER_GOOD_ACK_INTERVAL: u64 = 10_000;
