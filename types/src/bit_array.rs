//! A fixed-size bit array.
//!
//! Used for every "which of the N validators / parts does this peer have"
//! question in the dissemination layer. All out-of-range accesses are no-ops
//! so that bookkeeping code can apply peer announcements without first
//! cross-checking sizes.
use borsh::{BorshDeserialize, BorshSerialize};
use rand::Rng;

/// A fixed-size array of bits.
///
/// The size is set at construction and never changes; binary operations
/// between arrays of different sizes follow the min/max conventions
/// documented on each method.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BitArray {
    /// Number of addressable bits.
    bits: u32,
    /// Backing words, little-endian bit order within each word.
    words: Vec<u64>,
}

impl BitArray {
    /// Creates a new all-zero array of `bits` bits.
    pub fn new(bits: usize) -> Self {
        let bits = u32::try_from(bits).unwrap_or(u32::MAX);
        Self {
            bits,
            words: vec![0; Self::words_for(bits)],
        }
    }

    const fn words_for(bits: u32) -> usize {
        (bits as usize).div_ceil(64)
    }

    /// The number of addressable bits.
    pub const fn size(&self) -> usize {
        self.bits as usize
    }

    /// Returns the bit at `index`, or `false` if `index` is out of range.
    pub fn get(&self, index: usize) -> bool {
        if index >= self.size() {
            return false;
        }
        self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Sets the bit at `index`. Returns `false` (and changes nothing) if
    /// `index` is out of range.
    pub fn set(&mut self, index: usize, value: bool) -> bool {
        if index >= self.size() {
            return false;
        }
        let mask = 1u64 << (index % 64);
        if value {
            self.words[index / 64] |= mask;
        } else {
            self.words[index / 64] &= !mask;
        }
        true
    }

    /// `true` if no bit is set.
    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// The number of set bits.
    pub fn count_ones(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Bitwise AND. The result is sized to the smaller operand.
    pub fn and(&self, other: &Self) -> Self {
        let mut out = Self::new(self.size().min(other.size()));
        for (i, w) in out.words.iter_mut().enumerate() {
            *w = self.words[i] & other.words[i];
        }
        out.mask_trailing();
        out
    }

    /// Bitwise OR. The result is sized to the larger operand.
    pub fn or(&self, other: &Self) -> Self {
        let mut out = Self::new(self.size().max(other.size()));
        for (i, w) in out.words.iter_mut().enumerate() {
            *w = self.words.get(i).copied().unwrap_or(0) | other.words.get(i).copied().unwrap_or(0);
        }
        out
    }

    /// Bitwise NOT, sized to `self`.
    pub fn not(&self) -> Self {
        let mut out = self.clone();
        for w in &mut out.words {
            *w = !*w;
        }
        out.mask_trailing();
        out
    }

    /// `self AND NOT other`, sized to `self`: the bits we have that `other`
    /// does not.
    pub fn sub(&self, other: &Self) -> Self {
        let mut out = self.clone();
        for (i, w) in out.words.iter_mut().enumerate() {
            *w &= !other.words.get(i).copied().unwrap_or(0);
        }
        out.mask_trailing();
        out
    }

    /// Copies `other`'s bits into `self`. No-op if the sizes differ.
    pub fn update(&mut self, other: &Self) {
        if self.bits == other.bits {
            self.words.copy_from_slice(&other.words);
        }
    }

    /// Picks a uniformly random set bit, or [`None`] if no bit is set.
    pub fn pick_random(&self) -> Option<usize> {
        let ones: Vec<usize> = self.iter_ones().collect();
        if ones.is_empty() {
            return None;
        }
        Some(ones[rand::thread_rng().gen_range(0..ones.len())])
    }

    /// Iterates over the indexes of all set bits, ascending.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size()).filter(|i| self.get(*i))
    }

    /// `true` if the backing storage is consistent with the declared size.
    ///
    /// Decoded arrays must pass this before any other operation is trusted;
    /// a hostile encoding can claim one size and ship another.
    pub fn is_well_formed(&self) -> bool {
        if self.words.len() != Self::words_for(self.bits) {
            return false;
        }
        // Trailing bits past `self.bits` must be zero.
        let mut canon = self.clone();
        canon.mask_trailing();
        canon.words == self.words
    }

    /// Zeroes the unaddressable bits of the last word.
    fn mask_trailing(&mut self) {
        let tail = self.size() % 64;
        if tail != 0 {
            if let Some(last) = self.words.last_mut() {
                *last &= (1u64 << tail) - 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::BitArray;

    #[test]
    fn out_of_range_is_noop() {
        let mut ba = BitArray::new(10);
        assert!(!ba.set(10, true));
        assert!(!ba.get(10));
        assert!(ba.is_empty());
    }

    #[test]
    fn sub_masks_owned_bits() {
        let mut ours = BitArray::new(8);
        let mut theirs = BitArray::new(8);
        for i in 0..8 {
            ours.set(i, true);
        }
        theirs.set(1, true);
        theirs.set(5, true);

        let diff = ours.sub(&theirs);
        assert_eq!(diff.count_ones(), 6);
        assert!(!diff.get(1) && !diff.get(5));
    }

    #[test]
    fn not_does_not_leak_past_size() {
        let ba = BitArray::new(70);
        let inv = ba.not();
        assert_eq!(inv.count_ones(), 70);
        assert!(inv.is_well_formed());
    }

    #[test]
    fn update_requires_equal_sizes() {
        let mut a = BitArray::new(4);
        let mut b = BitArray::new(8);
        b.set(0, true);
        a.update(&b);
        assert!(a.is_empty());
    }

    proptest! {
        /// A randomly picked bit is always a set bit, and never one the
        /// subtracted mask already had.
        #[test]
        fn pick_random_respects_mask(
            ours in proptest::collection::vec(any::<bool>(), 1..200),
            theirs in proptest::collection::vec(any::<bool>(), 1..200),
        ) {
            let size = ours.len();
            let mut a = BitArray::new(size);
            let mut b = BitArray::new(size);
            for (i, bit) in ours.iter().enumerate() {
                a.set(i, *bit);
            }
            for (i, bit) in theirs.iter().take(size).enumerate() {
                b.set(i, *bit);
            }

            let diff = a.sub(&b);
            match diff.pick_random() {
                Some(i) => {
                    prop_assert!(a.get(i));
                    prop_assert!(!b.get(i));
                }
                None => prop_assert!(diff.is_empty()),
            }
        }

        #[test]
        fn borsh_round_trip(bits in proptest::collection::vec(any::<bool>(), 0..300)) {
            let mut ba = BitArray::new(bits.len());
            for (i, bit) in bits.iter().enumerate() {
                ba.set(i, *bit);
            }
            let encoded = borsh::to_vec(&ba).unwrap();
            let decoded: BitArray = borsh::from_slice(&encoded).unwrap();
            prop_assert_eq!(&ba, &decoded);
            prop_assert!(decoded.is_well_formed());
        }
    }
}
