//! Resumable BGZF stream positions.
//!
//! A virtual position packs two coordinates into one `u64`:
//! - **Compressed offset** (high 48 bits): file offset of a BGZF block
//! - **In-block offset** (low 16 bits): offset inside that block once decompressed
//!
//! Positions are only meaningful relative to the file they were taken from.

use std::fmt;

/// Packed (compressed offset, in-block offset) cursor.
///
/// # Example
///
/// ```
/// use bamread::io::bgzf::VirtualPosition;
///
/// let pos = VirtualPosition::new(1024, 512);
/// assert_eq!(pos.compressed_offset(), 1024);
/// assert_eq!(pos.block_offset(), 512);
/// assert_eq!(VirtualPosition::from(pos.as_raw()), pos);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtualPosition(u64);

impl VirtualPosition {
    /// Largest compressed offset representable in 48 bits.
    pub const MAX_COMPRESSED_OFFSET: u64 = (1 << 48) - 1;

    /// Create a position from its two components.
    ///
    /// Bits of `compressed` above 48 are discarded.
    pub fn new(compressed: u64, block_offset: u16) -> Self {
        VirtualPosition(((compressed & Self::MAX_COMPRESSED_OFFSET) << 16) | u64::from(block_offset))
    }

    /// Raw packed value.
    pub fn as_raw(self) -> u64 {
        self.0
    }

    /// File offset of the BGZF block (high 48 bits).
    pub fn compressed_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Offset inside the decompressed block (low 16 bits).
    pub fn block_offset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// The zero position doubles as "unset" in BAI interval tables.
    pub fn is_unset(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for VirtualPosition {
    fn from(raw: u64) -> Self {
        VirtualPosition(raw)
    }
}

impl From<VirtualPosition> for u64 {
    fn from(pos: VirtualPosition) -> Self {
        pos.0
    }
}

impl fmt::Display for VirtualPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.compressed_offset(), self.block_offset())
    }
}
