//! Blocks as the network sees them: an opaque identity plus a part set.
//!
//! A block travels peer-to-peer split into fixed-size parts addressed by a
//! Merkle-style header; nothing here interprets the block's contents.
use borsh::{io, BorshDeserialize, BorshSerialize};
use bytes::Bytes;

use crate::{BitArray, Height};

/// The maximum number of parts a block may be split into.
pub const MAX_BLOCK_PARTS_COUNT: usize = 1601;

/// The size of a single block part.
///
/// Every part except the last one is exactly this size.
pub const BLOCK_PART_SIZE_BYTES: usize = 65_536;

/// The identity of a block part set: how many parts, and the root hash
/// committing to all of them.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct PartSetHeader {
    /// Number of parts in the set.
    pub total: u32,
    /// Root hash over all parts.
    pub hash: [u8; 32],
}

impl PartSetHeader {
    /// `true` for the zero value, which stands for "no part set known".
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash == [0; 32]
    }
}

/// A single part of a block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Part {
    /// Position of this part within its set.
    pub index: u32,
    /// The raw part payload.
    pub bytes: Bytes,
    /// Hash linking this part into the set's root hash.
    pub proof: [u8; 32],
}

impl Part {
    /// `true` if the part payload is within the allowed size.
    pub fn is_well_formed(&self) -> bool {
        !self.bytes.is_empty() && self.bytes.len() <= BLOCK_PART_SIZE_BYTES
    }
}

// `Bytes` has no borsh impls, so parts are encoded by hand.
impl BorshSerialize for Part {
    fn serialize<W: io::Write>(&self, writer: &mut W) -> io::Result<()> {
        self.index.serialize(writer)?;
        self.bytes.as_ref().serialize(writer)?;
        self.proof.serialize(writer)
    }
}

impl BorshDeserialize for Part {
    fn deserialize_reader<R: io::Read>(reader: &mut R) -> io::Result<Self> {
        Ok(Self {
            index: u32::deserialize_reader(reader)?,
            bytes: Bytes::from(Vec::<u8>::deserialize_reader(reader)?),
            proof: <[u8; 32]>::deserialize_reader(reader)?,
        })
    }
}

/// The identity of a block: its hash plus its part-set header.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlockId {
    /// The block's hash.
    pub hash: [u8; 32],
    /// The header of the part set the block was split into.
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// The nil block id, the target of "no decision" votes.
    pub const fn nil() -> Self {
        Self {
            hash: [0; 32],
            part_set_header: PartSetHeader {
                total: 0,
                hash: [0; 32],
            },
        }
    }

    /// `true` for the nil block id.
    pub fn is_nil(&self) -> bool {
        *self == Self::nil()
    }
}

/// Block metadata as stored by the block store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockMeta {
    /// The height the block was committed at.
    pub height: Height,
    /// The block's identity.
    pub block_id: BlockId,
}

#[derive(Debug, thiserror::Error)]
pub enum PartSetError {
    #[error("part index {index} out of range for part set of {total}")]
    IndexOutOfRange { index: u32, total: u32 },
    #[error("part payload invalid")]
    MalformedPart,
}

/// A block's parts, collected as they arrive.
///
/// Tracks which parts are present with a [`BitArray`] mirror so the
/// dissemination loops can diff against a peer's announced parts.
#[derive(Clone, Debug)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    mask: BitArray,
    count: u32,
}

impl PartSet {
    /// Creates an empty part set for `header`.
    pub fn new(header: PartSetHeader) -> Self {
        Self {
            header,
            parts: vec![None; header.total as usize],
            mask: BitArray::new(header.total as usize),
            count: 0,
        }
    }

    /// The header this set collects parts for.
    pub const fn header(&self) -> &PartSetHeader {
        &self.header
    }

    /// `true` if this set collects parts for exactly `header`.
    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        self.header == *header
    }

    /// Adds a part. Returns `false` if the slot was already filled.
    pub fn add(&mut self, part: Part) -> Result<bool, PartSetError> {
        if !part.is_well_formed() {
            return Err(PartSetError::MalformedPart);
        }
        if part.index >= self.header.total {
            return Err(PartSetError::IndexOutOfRange {
                index: part.index,
                total: self.header.total,
            });
        }

        let slot = &mut self.parts[part.index as usize];
        if slot.is_some() {
            return Ok(false);
        }

        self.mask.set(part.index as usize, true);
        self.count += 1;
        *slot = Some(part);
        Ok(true)
    }

    /// The part at `index`, if present.
    pub fn get(&self, index: usize) -> Option<&Part> {
        self.parts.get(index).and_then(Option::as_ref)
    }

    /// Which parts are present.
    pub const fn bit_array(&self) -> &BitArray {
        &self.mask
    }

    /// Number of parts present.
    pub const fn count(&self) -> u32 {
        self.count
    }

    /// `true` once every part is present.
    pub const fn is_complete(&self) -> bool {
        self.count == self.header.total
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{Part, PartSet, PartSetError, PartSetHeader};

    fn part(index: u32) -> Part {
        Part {
            index,
            bytes: Bytes::from_static(&[1, 2, 3]),
            proof: [0; 32],
        }
    }

    #[test]
    fn add_tracks_mask_and_completion() {
        let mut set = PartSet::new(PartSetHeader {
            total: 3,
            hash: [7; 32],
        });

        assert!(set.add(part(1)).unwrap());
        assert!(!set.add(part(1)).unwrap());
        assert!(set.bit_array().get(1));
        assert!(!set.is_complete());

        assert!(set.add(part(0)).unwrap());
        assert!(set.add(part(2)).unwrap());
        assert!(set.is_complete());
    }

    #[test]
    fn add_rejects_out_of_range() {
        let mut set = PartSet::new(PartSetHeader {
            total: 1,
            hash: [0; 32],
        });
        assert!(matches!(
            set.add(part(1)),
            Err(PartSetError::IndexOutOfRange { .. })
        ));
    }
}
