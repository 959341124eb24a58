//! # Bit-Field Utilities
//!
//! Named bit ranges inside dword records, and wide values split across a
//! low/high word pair. Packet layouts are expressed as tables of these
//! descriptors so that no code relies on native struct layout.

use crate::error::{Error, Result};
use crate::types::GpuAddr;

// =============================================================================
// RAW HELPERS
// =============================================================================

/// Mask covering bits `low..=high`
#[inline]
pub const fn field_mask(low_bit: u8, high_bit: u8) -> u32 {
    (((1u64 << (high_bit - low_bit + 1)) - 1) << low_bit) as u32
}

/// Helper to extract fields from register values
#[inline]
pub const fn extract_field(value: u32, low_bit: u8, high_bit: u8) -> u32 {
    (value & field_mask(low_bit, high_bit)) >> low_bit
}

/// Helper to insert field into register value
#[inline]
pub const fn insert_field(value: u32, field: u32, low_bit: u8, high_bit: u8) -> u32 {
    let mask = field_mask(low_bit, high_bit);
    (value & !mask) | ((field << low_bit) & mask)
}

// =============================================================================
// FIELD
// =============================================================================

/// A bit range `low..=high` within dword `word` of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    word: usize,
    low: u8,
    high: u8,
}

impl Field {
    /// Describe bits `low..=high` of `word`
    pub const fn new(word: usize, low: u8, high: u8) -> Self {
        assert!(low <= high && high < 32);
        Self { word, low, high }
    }

    /// Single-bit field
    pub const fn bit(word: usize, bit: u8) -> Self {
        Self::new(word, bit, bit)
    }

    /// Whole dword
    pub const fn dword(word: usize) -> Self {
        Self::new(word, 0, 31)
    }

    /// Dword index inside the record
    #[inline]
    pub const fn word(self) -> usize {
        self.word
    }

    /// Width in bits
    #[inline]
    pub const fn width(self) -> u32 {
        (self.high - self.low + 1) as u32
    }

    /// Largest value the field can hold
    #[inline]
    pub const fn max(self) -> u32 {
        ((1u64 << self.width()) - 1) as u32
    }

    /// Check that `value` fits without truncation
    #[inline]
    pub const fn fits(self, value: u32) -> bool {
        value <= self.max()
    }

    /// Store `value`, truncated to the field width
    #[inline]
    pub fn set(self, words: &mut [u32], value: u32) {
        words[self.word] = insert_field(words[self.word], value, self.low, self.high);
    }

    /// Store `value`, failing with [`Error::InvalidArgument`] if it does not fit
    #[inline]
    pub fn set_checked(self, words: &mut [u32], value: u32) -> Result<()> {
        if !self.fits(value) {
            return Err(Error::InvalidArgument);
        }
        self.set(words, value);
        Ok(())
    }

    /// Load the field value
    #[inline]
    pub fn get(self, words: &[u32]) -> u32 {
        extract_field(words[self.word], self.low, self.high)
    }

    /// Store a boolean into a single-bit field
    #[inline]
    pub fn set_flag(self, words: &mut [u32], on: bool) {
        self.set(words, on as u32);
    }

    /// Load a single-bit field as a boolean
    #[inline]
    pub fn flag(self, words: &[u32]) -> bool {
        self.get(words) != 0
    }
}

// =============================================================================
// SPLIT FIELD
// =============================================================================

/// A 64-bit quantity stored as `value >> shift` across a low and a high field
///
/// The `shift` low-order bits are implied zero and dropped: an address field
/// with `shift = 2` holds `addr[31:2]` in its low field and requires 4-byte
/// alignment. The low field is filled first, the remainder goes to the high
/// field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitField {
    lo: Field,
    hi: Field,
    shift: u8,
}

impl SplitField {
    /// Describe a split field
    pub const fn new(lo: Field, hi: Field, shift: u8) -> Self {
        Self { lo, hi, shift }
    }

    /// Plain (low32, high32) pair in two consecutive dwords
    pub const fn pair(word: usize) -> Self {
        Self::new(Field::dword(word), Field::dword(word + 1), 0)
    }

    /// Number of implied-zero low bits
    #[inline]
    pub const fn shift(self) -> u8 {
        self.shift
    }

    /// Alignment implied by the dropped low bits
    #[inline]
    pub const fn alignment(self) -> u64 {
        1 << self.shift
    }

    /// Encode `value`
    ///
    /// Fails with [`Error::MisalignedAddress`] if implied-zero bits are set and
    /// with [`Error::InvalidArgument`] if the value exceeds the field width.
    pub fn set(self, words: &mut [u32], value: u64) -> Result<()> {
        if value & (self.alignment() - 1) != 0 {
            return Err(Error::MisalignedAddress);
        }
        let encoded = value >> self.shift;
        let lo_bits = self.lo.width();
        let hi = encoded >> lo_bits;
        if hi > self.hi.max() as u64 {
            return Err(Error::InvalidArgument);
        }
        self.lo.set(words, (encoded & self.lo.max() as u64) as u32);
        self.hi.set(words, hi as u32);
        Ok(())
    }

    /// Encode an address
    #[inline]
    pub fn set_addr(self, words: &mut [u32], addr: GpuAddr) -> Result<()> {
        self.set(words, addr.raw())
    }

    /// Decode the value (dropped bits read back as zero)
    pub fn get(self, words: &[u32]) -> u64 {
        let lo = self.lo.get(words) as u64;
        let hi = self.hi.get(words) as u64;
        ((hi << self.lo.width()) | lo) << self.shift
    }

    /// Decode as an address
    #[inline]
    pub fn get_addr(self, words: &[u32]) -> GpuAddr {
        GpuAddr::new(self.get(words))
    }
}
