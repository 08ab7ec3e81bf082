use std::time::Duration;

/// How many broadcast-routine visits an unchecked-sender entry survives.
///
/// Approximates the number of active broadcast routines: once every routine
/// has walked past a transaction, its pre-`CheckTx` sender record has done
/// its job and can go, whatever `CheckTx` ended up saying.
pub const UNCHECKED_REMOVE_VISITS: u32 = 3;

/// How long a broadcast routine waits before re-evaluating a transaction
/// for a peer that is catching up, has no announced height yet, or has a
/// full send queue.
pub(crate) const DEFAULT_PEER_CATCHUP_SLEEP: Duration = Duration::from_millis(100);

/// The default per-transaction size limit.
pub(crate) const DEFAULT_MAX_TX_BYTES: usize = 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchecked_entries_survive_at_least_one_visit() {
        assert!(UNCHECKED_REMOVE_VISITS >= 1);
    }

    #[test]
    fn catchup_sleep_is_short() {
        assert!(DEFAULT_PEER_CATCHUP_SLEEP < Duration::from_secs(1));
    }
}
