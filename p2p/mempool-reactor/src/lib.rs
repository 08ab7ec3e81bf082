//! # Galena Mempool Reactor
//!
//! Disseminates client transactions across the validator set while keeping
//! per-transaction sender attribution: a transaction received from a peer is
//! never echoed back to it, and under the direct-broadcast discipline a
//! peer-originated transaction is not forwarded to anyone at all, on the
//! assumption that its original sender reaches the full mesh itself.
//!
//! One broadcast routine runs per peer, walking the mempool's transaction
//! log in admission order. The mempool itself is a collaborator: its
//! `CheckTx` application oracle is consumed as a [`tower::Service`], and it
//! feeds admitted transactions into the [`TxLog`] this crate owns.

mod check_tx;
pub mod config;
mod constants;
mod reactor;
mod senders;
mod tx_log;

pub use check_tx::{CheckTxError, CheckTxRequest, CheckTxResponse};
pub use config::MempoolConfig;
pub use constants::UNCHECKED_REMOVE_VISITS;
pub use reactor::MempoolReactor;
pub use senders::SenderSets;
pub use tx_log::{TxLog, TxLogCursor, TxLogEntry};
