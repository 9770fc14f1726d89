//! A contiguous range of bits within a 32-bit word.

/// An inclusive bit range `from_bit..=to_bit`, with bit 0 the least
/// significant bit of the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitField {
    from_bit: u32,
    to_bit: u32,
}

impl BitField {
    /// Create a field covering bits `from_bit` through `to_bit` inclusive.
    ///
    /// # Panics
    /// Panics if the range is empty or extends past bit 31.
    pub const fn new(from_bit: u32, to_bit: u32) -> Self {
        assert!(from_bit <= to_bit, "bit field range is reversed");
        assert!(to_bit < 32, "bit field extends past bit 31");
        Self { from_bit, to_bit }
    }

    /// Number of bits in the field.
    #[inline]
    pub const fn width(&self) -> u32 {
        self.to_bit - self.from_bit + 1
    }

    /// Mask of the field's width, right-aligned.
    #[inline]
    const fn mask(&self) -> u32 {
        if self.width() == 32 {
            u32::MAX
        } else {
            (1u32 << self.width()) - 1
        }
    }

    /// Unsigned value stored in the field.
    #[inline]
    pub const fn extract(&self, word: u32) -> u32 {
        (word >> self.from_bit) & self.mask()
    }

    /// Value stored in the field, sign-extended from the field's width.
    #[inline]
    pub const fn extract_signed(&self, word: u32) -> i32 {
        let shift = 32 - self.width();
        ((self.extract(word) << shift) as i32) >> shift
    }

    /// Replace the field in `word` with the low bits of `value`.
    /// Bits outside the field are left as they were.
    #[inline]
    pub const fn insert(&self, value: u32, word: u32) -> u32 {
        let cleared = word & !(self.mask() << self.from_bit);
        cleared | ((value & self.mask()) << self.from_bit)
    }

    /// Smallest value `extract_signed` can return.
    pub const fn signed_min(&self) -> i32 {
        -(1i64 << (self.width() - 1)) as i32
    }

    /// Largest value `extract_signed` can return.
    pub const fn signed_max(&self) -> i32 {
        ((1i64 << (self.width() - 1)) - 1) as i32
    }
}
