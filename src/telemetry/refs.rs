//! Incoming-reference bitsets packed into printable units.
//!
//! Each unit is one byte carrying [`BITS_PER_UNIT`] payload bits as
//! `byte - UNIT_BASE`. Bit `i` of the bitset lives in unit `i / BITS_PER_UNIT`
//! at bit position `i % BITS_PER_UNIT`, least significant first. Payload bits
//! in the final unit past the bitset length are ignored.

use super::DecodeError;

/// Payload bits carried by one packed unit.
pub const BITS_PER_UNIT: usize = 6;

/// Byte value encoding a unit with no bits set.
pub const UNIT_BASE: u8 = b'0';

const UNIT_MASK: u8 = (1 << BITS_PER_UNIT) - 1;

/// Number of packed units needed for `len` bits.
#[inline]
pub fn units_for(len: usize) -> usize {
    len.div_ceil(BITS_PER_UNIT)
}

/// Set of region indices holding references into a region.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct IncomingRefs {
    words: Vec<u64>,
    len: usize,
}

impl IncomingRefs {
    /// Create an empty bitset over `len` regions.
    pub fn new(len: usize) -> Self {
        Self {
            words: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Build a bitset over `len` regions with the given indices set.
    ///
    /// Indices at or past `len` are ignored.
    pub fn from_indices<I: IntoIterator<Item = usize>>(len: usize, indices: I) -> Self {
        let mut refs = Self::new(len);
        for i in indices {
            if i < len {
                refs.set(i);
            }
        }
        refs
    }

    /// Number of regions covered by the bitset.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether region `index` references this one.
    #[inline]
    pub fn contains(&self, index: usize) -> bool {
        index < self.len && self.words[index / 64] & (1 << (index % 64)) != 0
    }

    /// Number of referencing regions.
    pub fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Iterate over referencing region indices in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len).filter(move |&i| self.contains(i))
    }

    fn set(&mut self, index: usize) {
        self.words[index / 64] |= 1 << (index % 64);
    }
}

/// Unpack `len` bits from a sequence of packed units.
pub fn unpack_bits(units: &[u8], len: usize) -> Result<IncomingRefs, DecodeError> {
    let expected = units_for(len);
    if units.len() != expected {
        return Err(DecodeError::RefsLength {
            expected,
            found: units.len(),
        });
    }

    let mut refs = IncomingRefs::new(len);
    for (offset, &byte) in units.iter().enumerate() {
        let value = byte
            .checked_sub(UNIT_BASE)
            .filter(|v| *v <= UNIT_MASK)
            .ok_or(DecodeError::InvalidRefUnit { offset, byte })?;

        for bit in 0..BITS_PER_UNIT {
            let index = offset * BITS_PER_UNIT + bit;
            if index >= len {
                break;
            }
            if value & (1 << bit) != 0 {
                refs.set(index);
            }
        }
    }
    Ok(refs)
}

/// Pack a bitset into printable units, the inverse of [`unpack_bits`].
pub fn pack_bits(refs: &IncomingRefs) -> Vec<u8> {
    let mut units = vec![UNIT_BASE; units_for(refs.len())];
    for index in refs.iter() {
        units[index / BITS_PER_UNIT] += 1 << (index % BITS_PER_UNIT);
    }
    units
}
