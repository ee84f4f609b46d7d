//! BGZF (Blocked GNU Zip Format) decoding
//!
//! BGZF is a series of independent gzip members, each holding at most 64 KiB
//! of uncompressed data. Because every block can be inflated on its own,
//! a reader can jump to any block start and resume from there, which is what
//! BAI indices rely on.
//!
//! Two interchangeable backends produce blocks:
//! - [`BgzfReader`]: synchronous, seekable, reads the file through a large
//!   aligned window
//! - [`ThreadedBgzfReader`]: decompresses ahead on a background thread,
//!   forward-only
//!
//! Both implement [`BgzfBackend`]. The BAM layer is generic over the backend
//! so the choice costs nothing per block.

mod block;
mod position;
mod reader;
mod threaded;

pub use block::BGZF_EOF;
pub use position::VirtualPosition;
pub use reader::BgzfReader;
pub use threaded::ThreadedBgzfReader;

#[cfg(test)]
pub(crate) use block::compress_block;

use crate::error::Result;

/// Maximum uncompressed (and compressed) size of one BGZF block.
pub const MAX_BLOCK_SIZE: usize = 65536;

/// Granularity of raw window refills.
pub(crate) const WINDOW_ALIGNMENT: u64 = MAX_BLOCK_SIZE as u64;

/// Default raw window: 256 blocks (16 MiB).
pub const DEFAULT_WINDOW_SIZE: usize = 256 * MAX_BLOCK_SIZE;

/// Smallest window that always fits one whole block after an aligned refill.
pub const MIN_WINDOW_SIZE: usize = 2 * MAX_BLOCK_SIZE;

/// Default number of decompressed blocks the threaded reader keeps queued.
pub const DEFAULT_QUEUE_DEPTH: usize = 3;

/// Tuning knobs for BGZF backends.
///
/// # Example
///
/// ```
/// use bamread::io::bgzf::ReaderOptions;
///
/// let opts = ReaderOptions::default().with_window_size(1 << 20).with_queue_depth(8);
/// assert_eq!(opts.window_size(), 1 << 20);
/// assert_eq!(opts.queue_depth(), 8);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReaderOptions {
    window_size: usize,
    queue_depth: usize,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            queue_depth: DEFAULT_QUEUE_DEPTH,
        }
    }
}

impl ReaderOptions {
    /// Set the raw read window size in bytes.
    ///
    /// Clamped to [`MIN_WINDOW_SIZE`] and rounded up to a whole number of blocks.
    pub fn with_window_size(mut self, bytes: usize) -> Self {
        self.window_size = bytes.max(MIN_WINDOW_SIZE).next_multiple_of(MAX_BLOCK_SIZE);
        self
    }

    /// Set the threaded reader queue depth (at least 1).
    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }

    /// Raw read window size in bytes.
    pub fn window_size(&self) -> usize {
        self.window_size
    }

    /// Threaded reader queue depth.
    pub fn queue_depth(&self) -> usize {
        self.queue_depth
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Source of decompressed BGZF blocks.
///
/// Sealed: implemented only by [`BgzfReader`] and [`ThreadedBgzfReader`].
pub trait BgzfBackend: sealed::Sealed {
    /// Decompress the next block into `dst`, replacing its contents.
    ///
    /// Returns the compressed offset where the block starts, or `Ok(None)`
    /// at a clean end of stream. `Some` with an empty `dst` is an empty block
    /// (such as the EOF marker); callers should keep reading.
    fn read_block(&mut self, dst: &mut Vec<u8>) -> Result<Option<u64>>;

    /// Compressed offset of the next block to be delivered.
    fn position(&self) -> u64;

    /// Total size of the compressed file in bytes.
    fn file_size(&self) -> u64;

    /// Move so the next block read starts at compressed offset `pos`.
    fn set_position(&mut self, pos: u64) -> Result<()>;

    /// Fraction of the compressed file consumed, in `[0, 1]`.
    fn proportional_position(&self) -> f32 {
        match self.file_size() {
            0 => 1.0,
            size => (self.position() as f64 / size as f64).min(1.0) as f32,
        }
    }
}
