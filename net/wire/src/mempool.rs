//! The mempool reactor's message set.
use borsh::{BorshDeserialize, BorshSerialize};

use galena_types::Tx;

use crate::{Channel, MessageError};

/// A batch of transactions.
///
/// An empty batch is a protocol violation; there is nothing it could mean.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Txs {
    pub txs: Vec<Tx>,
}

impl Txs {
    /// A batch of one.
    pub fn single(tx: Tx) -> Self {
        Self { txs: vec![tx] }
    }

    /// Structural validation against the configured transaction size limit.
    pub fn validate(&self, max_tx_bytes: usize) -> Result<(), MessageError> {
        if self.txs.is_empty() {
            return Err(MessageError::EmptyTxBatch);
        }
        for tx in &self.txs {
            if tx.len() > max_tx_bytes {
                return Err(MessageError::OversizedTx {
                    got: tx.len(),
                    limit: max_tx_bytes,
                });
            }
        }
        Ok(())
    }
}

/// Every message of the mempool reactor.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum MempoolMessage {
    Txs(Txs),
}

impl MempoolMessage {
    /// The channel this message belongs on.
    pub const fn channel(&self) -> Channel {
        match self {
            Self::Txs(_) => Channel::Mempool,
        }
    }

    /// Structural validation with the default size limit.
    ///
    /// Reactors with a configured limit call [`Txs::validate`] directly.
    pub fn validate(&self) -> Result<(), MessageError> {
        match self {
            Self::Txs(txs) => txs.validate(usize::MAX),
        }
    }
}

#[cfg(test)]
mod tests {
    use galena_types::Tx;

    use super::Txs;
    use crate::MessageError;

    #[test]
    fn empty_batch_rejected() {
        let batch = Txs { txs: vec![] };
        assert_eq!(batch.validate(1024), Err(MessageError::EmptyTxBatch));
    }

    #[test]
    fn oversized_tx_rejected() {
        let batch = Txs::single(Tx::new(vec![0; 2048]));
        assert_eq!(
            batch.validate(1024),
            Err(MessageError::OversizedTx {
                got: 2048,
                limit: 1024
            })
        );
        assert_eq!(batch.validate(2048), Ok(()));
    }
}
