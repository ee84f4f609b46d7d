//! BAI index loading
//!
//! A BAI file describes, per reference sequence, where alignments live in the
//! compressed BAM stream:
//!
//! ## Layout (little-endian)
//! - Magic: `"BAI\1"`
//! - `n_ref` (int32), then per reference:
//!   - `n_bin` (int32), then per bin: `bin` (uint32), `n_chunk` (int32),
//!     `n_chunk` × (`chunk_beg`, `chunk_end`) virtual offsets (uint64)
//!   - `n_intv` (int32), then `n_intv` linear-index offsets (uint64), one per
//!     16 KiB of reference
//! - Optional trailing `n_no_coor` (ignored)
//!
//! ## Binning Scheme
//!
//! 37,449 bins over six levels, each level dividing the one above by 8:
//! - Bin 0: whole sequence (32768 intervals)
//! - Bins 1-8, 9-72, 73-584, 585-4680: 4096, 512, 64 and 8 intervals each
//! - Bins 4681-37448: one 16 KiB interval each
//!
//! Only the interval hints are kept after loading. Bin chunks are folded into
//! them so that every interval points at or before the first alignment that
//! can overlap it.

use super::sam_header::ReferenceSeq;
use crate::error::{BamError, Result};
use crate::io::bgzf::VirtualPosition;
use log::debug;
use std::path::Path;

/// BAI magic string
const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// One past the last real bin number. Larger numbers (the `37450` metadata
/// pseudo-bin) carry no alignment chunks.
pub const MAX_BIN: u32 = 37449;

/// log2 of the linear index interval width (16 KiB).
pub const INTERVAL_SHIFT: u32 = 14;

/// First 16 KiB interval covered by `bin`.
///
/// # Example
///
/// ```
/// use bamread::io::bam::index::{bin_interval_count, bin_to_interval};
///
/// assert_eq!(bin_to_interval(0), 0);
/// assert_eq!(bin_to_interval(2), 4096);
/// assert_eq!(bin_to_interval(4682), 1);
/// assert_eq!(bin_interval_count(4682), 1);
/// ```
pub fn bin_to_interval(bin: u32) -> u32 {
    match bin {
        0 => 0,
        1..=8 => (bin - 1) << 12,
        9..=72 => (bin - 9) << 9,
        73..=584 => (bin - 73) << 6,
        585..=4680 => (bin - 585) << 3,
        4681..=37448 => bin - 4681,
        _ => 0,
    }
}

/// Number of 16 KiB intervals covered by `bin` (0 for out-of-range bins).
pub fn bin_interval_count(bin: u32) -> u32 {
    match bin {
        0 => 1 << 15,
        1..=8 => 1 << 12,
        9..=72 => 1 << 9,
        73..=584 => 1 << 6,
        585..=4680 => 1 << 3,
        4681..=37448 => 1,
        _ => 0,
    }
}

/// Number of 16 KiB intervals needed for a reference of `length` bases.
pub fn interval_count_for_length(length: u32) -> usize {
    ((u64::from(length) + (1 << INTERVAL_SHIFT) - 1) >> INTERVAL_SHIFT) as usize
}

/// Per-reference interval offsets loaded from a BAI file.
///
/// Immutable once built; share it with `Arc` when several files use it.
///
/// # Example
///
/// ```no_run
/// use bamread::io::bam::{BamFile, BamIndex};
///
/// # fn main() -> bamread::Result<()> {
/// let bam = BamFile::open("sample.bam")?;
/// let index = BamIndex::from_path("sample.bam.bai", bam.references())?;
/// if let Some(intervals) = index.reference(0) {
///     println!("chr0: {} intervals", intervals.len());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BamIndex {
    references: Vec<Option<Vec<VirtualPosition>>>,
}

impl BamIndex {
    /// Load an index file. `references` is the header table of the BAM it indexes.
    pub fn from_path<P: AsRef<Path>>(path: P, references: &[ReferenceSeq]) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        debug!(
            "Read BAI index {} ({} bytes)",
            path.as_ref().display(),
            data.len()
        );
        Self::from_bytes(&data, references)
    }

    /// Build an index from the raw bytes of a BAI file.
    ///
    /// # Errors
    ///
    /// [`BamError::Index`] for a bad magic, zero references, truncated data,
    /// an interval list longer than the reference needs, or data for a
    /// reference the header does not have.
    pub fn from_bytes(data: &[u8], references: &[ReferenceSeq]) -> Result<Self> {
        let mut cursor = Cursor { data, pos: 0 };

        if cursor.take(4, "magic")? != BAI_MAGIC {
            return Err(BamError::Index(format!(
                "Invalid BAI magic: expected {:?}, got {:?}",
                BAI_MAGIC,
                &data[..4]
            )));
        }

        let n_ref = cursor.count("reference count")?;
        if n_ref == 0 {
            return Err(BamError::Index("BAI index has no references".into()));
        }

        let mut loaded = vec![None; references.len()];
        for ref_id in 0..n_ref {
            let raw = RawReferenceIndex::parse(&mut cursor)?;
            if !raw.has_data() {
                continue;
            }
            let Some(reference) = references.get(ref_id) else {
                return Err(BamError::Index(format!(
                    "BAI index has data for reference {} but the header has only {}",
                    ref_id,
                    references.len()
                )));
            };
            let intervals = raw.build_intervals(reference)?;
            debug!(
                "BAI reference {} ({}): {} bins, {} intervals",
                ref_id,
                reference.name,
                raw.bins.len(),
                intervals.len()
            );
            loaded[ref_id] = Some(intervals);
        }

        Ok(Self { references: loaded })
    }

    /// Interval offsets for a reference, or `None` when the index holds no
    /// data for it. Unset intervals are [`VirtualPosition::is_unset`].
    pub fn reference(&self, ref_id: usize) -> Option<&[VirtualPosition]> {
        self.references.get(ref_id)?.as_deref()
    }

    /// Whether the index holds data for `ref_id`.
    pub fn has_reference(&self, ref_id: usize) -> bool {
        self.reference(ref_id).is_some()
    }

    /// Number of intervals stored for `ref_id` (0 when absent).
    pub fn interval_count(&self, ref_id: usize) -> usize {
        self.reference(ref_id).map_or(0, <[_]>::len)
    }

    /// Number of header references the index was built against.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize, what: &str) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| {
                BamError::Index(format!(
                    "BAI index truncated reading {} at offset {}",
                    what, self.pos
                ))
            })?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn u32(&mut self, what: &str) -> Result<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Non-negative int32 count.
    fn count(&mut self, what: &str) -> Result<usize> {
        let value = self.u32(what)? as i32;
        usize::try_from(value)
            .map_err(|_| BamError::Index(format!("BAI index has negative {}: {}", what, value)))
    }
}

fn read_u64(b: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&b[..8]);
    u64::from_le_bytes(buf)
}

/// Chunk list of one bin, still in file encoding.
struct RawBin<'a> {
    bin: u32,
    chunks: &'a [u8],
}

impl RawBin<'_> {
    /// `(start, end)` virtual offsets as raw integers.
    fn chunks(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.chunks
            .chunks_exact(16)
            .map(|c| (read_u64(&c[..8]), read_u64(&c[8..])))
    }
}

struct RawReferenceIndex<'a> {
    bins: Vec<RawBin<'a>>,
    intervals: &'a [u8],
}

impl<'a> RawReferenceIndex<'a> {
    fn parse(cursor: &mut Cursor<'a>) -> Result<Self> {
        let n_bin = cursor.count("bin count")?;
        let mut bins = Vec::with_capacity(n_bin.min(MAX_BIN as usize));
        for _ in 0..n_bin {
            let bin = cursor.u32("bin number")?;
            let n_chunk = cursor.count("chunk count")?;
            let chunks = cursor.take(n_chunk.saturating_mul(16), "chunks")?;
            // Pseudo-bins and empty bins contribute nothing
            if bin < MAX_BIN && !chunks.is_empty() {
                bins.push(RawBin { bin, chunks });
            }
        }
        let n_intv = cursor.count("interval count")?;
        let intervals = cursor.take(n_intv.saturating_mul(8), "intervals")?;
        Ok(Self { bins, intervals })
    }

    fn has_data(&self) -> bool {
        !self.bins.is_empty() || !self.intervals.is_empty()
    }

    /// Linear index with bin chunks folded in.
    fn build_intervals(&self, reference: &ReferenceSeq) -> Result<Vec<VirtualPosition>> {
        let max_ival = interval_count_for_length(reference.length);
        let n_intv = self.intervals.len() / 8;
        if n_intv > max_ival {
            return Err(BamError::Index(format!(
                "BAI index has {} intervals for reference {} but its length {} needs only {}",
                n_intv, reference.name, reference.length, max_ival
            )));
        }

        let mut intervals = vec![0u64; max_ival];
        for (slot, raw) in intervals.iter_mut().zip(self.intervals.chunks_exact(8)) {
            *slot = read_u64(raw);
        }

        // Finest bins: earliest chunk start that begins in each interval
        for bin in self.bins.iter().filter(|b| bin_interval_count(b.bin) == 1) {
            let ival = bin_to_interval(bin.bin) as usize;
            let Some(slot) = intervals.get_mut(ival) else {
                debug!(
                    "BAI bin {} lies past the end of reference {}",
                    bin.bin, reference.name
                );
                continue;
            };
            for (start, _) in bin.chunks() {
                if *slot == 0 || start < *slot {
                    *slot = start;
                }
            }
        }

        // Wider bins: a chunk that starts before an interval's first
        // alignment and runs through it holds alignments overlapping it
        let mut min_offset = vec![0u64; max_ival];
        for bin in self.bins.iter().filter(|b| bin_interval_count(b.bin) > 1) {
            let ival = bin_to_interval(bin.bin) as usize;
            let n_ival = (bin_interval_count(bin.bin) as usize).min(max_ival.saturating_sub(ival));
            for (start, end) in bin.chunks() {
                for l in ival..ival + n_ival {
                    let first = intervals[l];
                    if start < first && first <= end && (min_offset[l] == 0 || start < min_offset[l])
                    {
                        min_offset[l] = start;
                    }
                }
            }
        }

        Ok(intervals
            .into_iter()
            .zip(min_offset)
            .map(|(first, min)| VirtualPosition::from(if min != 0 { min } else { first }))
            .collect())
    }
}
