//! The `CheckTx` application oracle, consumed as a [`tower::Service`].
use galena_types::Tx;

/// A request to admit or reject a transaction.
#[derive(Clone, Debug)]
pub struct CheckTxRequest {
    pub tx: Tx,
}

/// The application's verdict on a transaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CheckTxResponse {
    /// Application response code; [`Self::CODE_OK`] admits the transaction.
    pub code: u32,
}

impl CheckTxResponse {
    /// The response code that admits a transaction.
    pub const CODE_OK: u32 = 0;

    /// An admitting response.
    pub const fn ok() -> Self {
        Self { code: Self::CODE_OK }
    }

    /// `true` if the transaction was admitted.
    pub const fn is_ok(&self) -> bool {
        self.code == Self::CODE_OK
    }
}

/// Errors from invoking the oracle, as opposed to rejections it returns.
#[derive(Debug, thiserror::Error)]
pub enum CheckTxError {
    /// The transaction is already in the application's cache. Expected
    /// whenever several peers relay the same transaction.
    #[error("transaction already in cache")]
    InCache,
    /// The oracle itself failed.
    #[error("check-tx oracle failed: {0}")]
    Oracle(#[from] tower::BoxError),
}
