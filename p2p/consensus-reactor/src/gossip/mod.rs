//! The three per-peer dissemination loops.
//!
//! Each loop compares the cached local round state against the peer's
//! perceived round state and sends the single most useful message, then
//! yields. Idle iterations sleep for the configured gossip interval; every
//! iteration may start with a small uniformly-random jitter to spread load
//! across peers.
//!
//! Everything transient (missing block meta, a peer on an orphaned fork,
//! send backpressure) becomes a short sleep, never a peer stop: block-store
//! races recover by themselves.
use rand::Rng;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;

use galena_p2p_core::Peer;

use crate::{reactor::ConsensusReactor, state::StateAccess, store::BlockStore};

pub(crate) mod data;
pub(crate) mod maj23;
pub(crate) mod votes;

impl<S: StateAccess, B: BlockStore> ConsensusReactor<S, B> {
    /// Sleeps the idle-gossip interval. Returns `false` when the loop
    /// should terminate instead of continuing.
    pub(crate) async fn gossip_sleep(&self, peer: &Peer, quit: &CancellationToken) -> bool {
        self.pausing_sleep(self.config().peer_gossip_sleep, peer, quit)
            .await
    }

    /// Sleeps a uniformly-random jitter before a gossip iteration, if
    /// configured. Returns `false` when the loop should terminate.
    pub(crate) async fn intraloop_jitter(&self, peer: &Peer, quit: &CancellationToken) -> bool {
        let bound = self.config().peer_gossip_intraloop_sleep;
        if bound.is_zero() {
            return true;
        }

        let nanos = rand::thread_rng().gen_range(0..bound.as_nanos().max(1));
        let jitter = Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX));
        self.pausing_sleep(jitter, peer, quit).await
    }

    /// Sleeps `duration` unless the reactor or the peer goes away first.
    pub(crate) async fn pausing_sleep(
        &self,
        duration: Duration,
        peer: &Peer,
        quit: &CancellationToken,
    ) -> bool {
        tokio::select! {
            () = sleep(duration) => true,
            () = quit.cancelled() => false,
            () = peer.handle().closed() => false,
        }
    }
}
