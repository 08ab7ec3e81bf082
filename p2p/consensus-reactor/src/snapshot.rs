//! The round-state snapshot cache.
//!
//! Gossip loops read the consensus round state on every iteration; going
//! through the consensus state machine's own lock each time would have
//! every loop in the process contending on it. Instead a single ticker
//! copies the round state into an [`ArcSwap`] cell at a small interval and
//! the loops read the cell.
use std::{sync::Arc, time::Duration};

use arc_swap::ArcSwap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::state::{RoundState, StateAccess};

/// Creates the snapshot cell, primed from `state`, and spawns the refresh
/// ticker.
pub(crate) fn spawn_round_state_cache<S: StateAccess>(
    state: Arc<S>,
    interval: Duration,
    quit: CancellationToken,
) -> Arc<ArcSwap<RoundState>> {
    let cell = Arc::new(ArcSwap::from_pointee(state.round_state()));

    let writer = Arc::clone(&cell);
    tokio::spawn(
        async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = quit.cancelled() => return,
                    _ = ticker.tick() => {
                        writer.store(Arc::new(state.round_state()));
                    }
                }
            }
        }
        .instrument(tracing::debug_span!("round_state_cache")),
    );

    cell
}
