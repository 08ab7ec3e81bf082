//! Transactions and their content-addressed keys.
use std::fmt;

use borsh::{io, BorshDeserialize, BorshSerialize};
use bytes::Bytes;

/// An opaque transaction.
///
/// The dissemination layer never interprets the payload; identity is the
/// content hash, see [`TxKey`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tx(Bytes);

impl Tx {
    /// Wraps raw transaction bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    /// The content-addressed key of this transaction.
    pub fn key(&self) -> TxKey {
        TxKey(blake3::hash(&self.0).into())
    }

    /// The raw payload.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` for a zero-length payload.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Tx {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl BorshSerialize for Tx {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.0.as_ref().serialize(writer)
    }
}

impl BorshDeserialize for Tx {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self(Bytes::from(Vec::<u8>::deserialize_reader(reader)?)))
    }
}

/// The fixed-width content hash identifying a [`Tx`].
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxKey([u8; 32]);

impl TxKey {
    /// The raw hash bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxKey({})", hex::encode(&self.0[..6]))
    }
}

#[cfg(test)]
mod tests {
    use super::Tx;

    #[test]
    fn key_is_content_addressed() {
        let a = Tx::new(vec![1, 2, 3]);
        let b = Tx::new(vec![1, 2, 3]);
        let c = Tx::new(vec![1, 2, 4]);

        assert_eq!(a.key(), b.key());
        assert_ne!(a.key(), c.key());
    }
}
