//! Register fields and their write semantics.
//!
//! Every bit the drivers touch is described by a [`RegisterField`]: the
//! register offset, the bit position and width inside the 32-bit word, and
//! how a write to it behaves in hardware.
//!
//! ```text
//! Plain  write stores the value, read returns it
//! W1C    write 1 clears the bit, write 0 has no effect, read returns hw state
//! W1P    write 1 fires a one-cycle action, the bit always reads back 0
//! ```

/// Write behaviour of a register field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldSemantics {
    /// Ordinary read/write storage.
    Plain,
    /// Write-one-to-clear status bit.
    WriteOneToClear,
    /// Write-one-pulse command bit (self-clearing).
    WriteOnePulse,
}

impl std::fmt::Display for FieldSemantics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "RW"),
            Self::WriteOneToClear => write!(f, "W1C"),
            Self::WriteOnePulse => write!(f, "W1P"),
        }
    }
}

/// A bit field inside a 32-bit memory-mapped register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterField {
    offset: usize,
    shift: u8,
    width: u8,
    semantics: FieldSemantics,
}

impl RegisterField {
    /// Build a field. `shift + width` must not exceed 32 and `width` must be
    /// non-zero; violations fail const evaluation for `const` fields.
    ///
    /// # Panics
    ///
    /// Panics if the field does not fit in a 32-bit register.
    #[must_use]
    pub const fn new(offset: usize, shift: u8, width: u8, semantics: FieldSemantics) -> Self {
        assert!(width > 0 && shift as u32 + width as u32 <= 32, "field exceeds register");
        Self {
            offset,
            shift,
            width,
            semantics,
        }
    }

    /// Plain read/write field.
    #[must_use]
    pub const fn plain(offset: usize, shift: u8, width: u8) -> Self {
        Self::new(offset, shift, width, FieldSemantics::Plain)
    }

    /// Plain field covering the whole 32-bit register.
    #[must_use]
    pub const fn word(offset: usize) -> Self {
        Self::new(offset, 0, 32, FieldSemantics::Plain)
    }

    /// Single write-one-to-clear status bit.
    #[must_use]
    pub const fn w1c(offset: usize, bit: u8) -> Self {
        Self::new(offset, bit, 1, FieldSemantics::WriteOneToClear)
    }

    /// Single write-one-pulse command bit.
    #[must_use]
    pub const fn w1p(offset: usize, bit: u8) -> Self {
        Self::new(offset, bit, 1, FieldSemantics::WriteOnePulse)
    }

    /// Register offset from the block base.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Bit position of the least significant bit.
    #[must_use]
    pub const fn shift(&self) -> u8 {
        self.shift
    }

    /// Field width in bits.
    #[must_use]
    pub const fn width(&self) -> u8 {
        self.width
    }

    /// Write semantics.
    #[must_use]
    pub const fn semantics(&self) -> FieldSemantics {
        self.semantics
    }

    /// True when the field spans all 32 bits.
    #[must_use]
    pub const fn is_word(&self) -> bool {
        self.width == 32
    }

    /// Mask of the field's bits in register position.
    #[must_use]
    pub const fn mask(&self) -> u32 {
        self.value_mask() << self.shift
    }

    /// Shift a field value into register position, dropping excess bits.
    #[must_use]
    pub const fn encode(&self, value: u32) -> u32 {
        (value & self.value_mask()) << self.shift
    }

    /// Extract the field value from a raw register word.
    #[must_use]
    pub const fn decode(&self, word: u32) -> u32 {
        (word >> self.shift) & self.value_mask()
    }

    const fn value_mask(&self) -> u32 {
        if self.width == 32 {
            u32::MAX
        } else {
            (1u32 << self.width) - 1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_bit_masks() {
        let done = RegisterField::w1c(0x04, 0);
        assert_eq!(done.mask(), 0x1);
        assert_eq!(done.encode(1), 0x1);
        assert_eq!(done.decode(0xFFFF_FFFE), 0);

        let ioc = RegisterField::w1c(0x34, 12);
        assert_eq!(ioc.mask(), 0x1000);
        assert_eq!(ioc.decode(0x1001), 1);
    }

    #[test]
    fn test_word_field() {
        let len = RegisterField::word(0x28);
        assert!(len.is_word());
        assert_eq!(len.mask(), u32::MAX);
        assert_eq!(len.encode(0xDEAD_BEEF), 0xDEAD_BEEF);
    }

    #[test]
    fn test_encode_truncates_to_width() {
        let f = RegisterField::plain(0x00, 4, 3);
        assert_eq!(f.mask(), 0x70);
        assert_eq!(f.encode(0xF), 0x70);
        assert_eq!(f.decode(0x50), 0x5);
    }

    #[test]
    fn test_semantics_display() {
        assert_eq!(FieldSemantics::WriteOneToClear.to_string(), "W1C");
        assert_eq!(FieldSemantics::WriteOnePulse.to_string(), "W1P");
    }
}
