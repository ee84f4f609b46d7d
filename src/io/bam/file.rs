//! BAM file handle: header, record stream and indexed seeking.
//!
//! [`BamFile`] owns a BGZF backend, the decompressed block currently being
//! read and the parsed header. Records are decoded in place when they fit in
//! the current block and copied out when they straddle a block boundary.
//!
//! # Borrowing
//!
//! [`BamFile::read`] returns a [`Record`] that may borrow the decode buffer.
//! The borrow checker keeps it from outliving the next `read` or `seek`;
//! call [`Record::into_owned`] to keep it longer.
//!
//! ```no_run
//! use bamread::io::bam::BamFile;
//!
//! # fn main() -> bamread::Result<()> {
//! let mut bam = BamFile::open("sample.bam")?;
//! let mut kept = Vec::new();
//! while let Some(record) = bam.read()? {
//!     if record.mapping_quality() >= 30 {
//!         kept.push(record.into_owned());
//!     }
//! }
//! println!("{} high-quality records", kept.len());
//! # Ok(())
//! # }
//! ```

use super::error::DecodeError;
use super::header::read_raw_header;
use super::index::{BamIndex, INTERVAL_SHIFT};
use super::record::Record;
use super::sam_header::{Header, ReadGroup, ReferenceSeq};
use crate::error::{BamError, Result};
use crate::io::bgzf::{BgzfBackend, BgzfReader, ReaderOptions, ThreadedBgzfReader, VirtualPosition};
use log::debug;
use std::fs::File;
use std::io::{self, Read, Seek};
use std::path::Path;
use std::sync::Arc;

/// Bases covered by one linear-index interval.
const INTERVAL_WIDTH: u64 = 1 << INTERVAL_SHIFT;

/// The decompressed block being read and its cursor.
struct Blocks<B> {
    backend: B,
    buf: Vec<u8>,
    /// Read cursor into `buf`; before the block is loaded, the pending offset
    buf_pos: usize,
    /// Compressed offset of the block in `buf`
    block_start: u64,
    /// False after a reposition until the target block is read
    loaded: bool,
}

impl<B: BgzfBackend> Blocks<B> {
    fn new(backend: B) -> Self {
        let block_start = backend.position();
        Self {
            backend,
            buf: Vec::new(),
            buf_pos: 0,
            block_start,
            loaded: false,
        }
    }

    fn remaining(&self) -> &[u8] {
        if self.loaded {
            &self.buf[self.buf_pos..]
        } else {
            &[]
        }
    }

    fn consume(&mut self, n: usize) {
        self.buf_pos += n;
    }

    /// Make sure unread bytes are available. False at a clean end of stream.
    fn fill(&mut self) -> Result<bool> {
        if !self.remaining().is_empty() {
            return Ok(true);
        }

        let mut offset = if self.loaded { 0 } else { self.buf_pos };
        loop {
            let Some(start) = self.backend.read_block(&mut self.buf)? else {
                self.buf.clear();
                self.buf_pos = 0;
                self.block_start = self.backend.position();
                self.loaded = true;
                return Ok(false);
            };
            self.block_start = start;
            self.loaded = true;
            if offset > self.buf.len() {
                return Err(BamError::InvalidPosition(VirtualPosition::new(
                    start,
                    offset as u16,
                )));
            }
            self.buf_pos = offset;
            if self.buf_pos < self.buf.len() {
                return Ok(true);
            }
            // Empty block (EOF marker) or positioned at its very end
            offset = 0;
        }
    }

    /// Append up to `n` bytes to `dst`, crossing block boundaries.
    fn read_into(&mut self, n: usize, dst: &mut Vec<u8>) -> Result<usize> {
        let mut copied = 0;
        while copied < n && self.fill()? {
            let chunk = self.remaining().len().min(n - copied);
            dst.extend_from_slice(&self.buf[self.buf_pos..self.buf_pos + chunk]);
            self.consume(chunk);
            copied += chunk;
        }
        Ok(copied)
    }

    fn position(&self) -> VirtualPosition {
        if self.loaded && self.buf_pos >= self.buf.len() {
            VirtualPosition::new(self.backend.position(), 0)
        } else {
            VirtualPosition::new(self.block_start, self.buf_pos as u16)
        }
    }
}

// Lets the binary header readers run over the block stream. Crate errors
// travel inside io::Error and are unwrapped by `map_read_error`.
impl<B: BgzfBackend> Read for Blocks<B> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if !self.fill().map_err(io::Error::other)? {
            return Ok(0);
        }
        let n = self.remaining().len().min(out.len());
        out[..n].copy_from_slice(&self.buf[self.buf_pos..self.buf_pos + n]);
        self.consume(n);
        Ok(n)
    }
}

/// Options for opening a [`BamFile`].
///
/// # Example
///
/// ```no_run
/// use bamread::io::bam::OpenOptions;
/// use bamread::io::bgzf::ReaderOptions;
///
/// # fn main() -> bamread::Result<()> {
/// let bam = OpenOptions::new()
///     .reader_options(ReaderOptions::default().with_queue_depth(6))
///     .open_threaded("sample.bam")?;
/// println!("{} references", bam.references().len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    header_text: Option<String>,
    reader_options: ReaderOptions,
}

impl OpenOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse this SAM header text instead of the one embedded in the file.
    ///
    /// The binary reference table is still read from the file.
    pub fn header_text(mut self, text: impl Into<String>) -> Self {
        self.header_text = Some(text.into());
        self
    }

    /// BGZF window and queue settings.
    pub fn reader_options(mut self, options: ReaderOptions) -> Self {
        self.reader_options = options;
        self
    }

    /// Open a file with the synchronous, seekable backend.
    pub fn open<P: AsRef<Path>>(&self, path: P) -> Result<BamFile<BgzfReader<File>>> {
        self.open_reader(File::open(path)?)
    }

    /// Open a file with background decompression. Only forward reading is
    /// supported.
    pub fn open_threaded<P: AsRef<Path>>(&self, path: P) -> Result<BamFile<ThreadedBgzfReader>> {
        let backend = ThreadedBgzfReader::with_options(File::open(path)?, self.reader_options)?;
        self.open_backend(backend)
    }

    /// Open any seekable source with the synchronous backend.
    pub fn open_reader<R: Read + Seek>(&self, reader: R) -> Result<BamFile<BgzfReader<R>>> {
        let backend = BgzfReader::with_options(reader, self.reader_options)?;
        self.open_backend(backend)
    }

    /// Read the header through an already constructed backend.
    pub fn open_backend<B: BgzfBackend>(&self, backend: B) -> Result<BamFile<B>> {
        let mut blocks = Blocks::new(backend);
        let raw = read_raw_header(&mut blocks)?;
        let text = self.header_text.clone().unwrap_or(raw.text);
        let header = Header::parse(text, raw.references)?;

        // Resolve "end of block" to the next block so rewind lands on a record
        blocks.fill()?;
        let first = blocks.position();
        debug!(
            "Opened BAM: {} references, {} read groups, first record at {}",
            header.reference_count(),
            header.read_groups().len(),
            first
        );

        Ok(BamFile {
            blocks,
            header: Arc::new(header),
            first,
            index: None,
        })
    }
}

/// An open BAM file.
///
/// Generic over the BGZF backend: [`BgzfReader`] supports repositioning and
/// seeking, [`ThreadedBgzfReader`] decompresses ahead for forward scans.
pub struct BamFile<B> {
    blocks: Blocks<B>,
    header: Arc<Header>,
    /// Position of the first record
    first: VirtualPosition,
    index: Option<Arc<BamIndex>>,
}

impl BamFile<BgzfReader<File>> {
    /// Open a BAM file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open(path)
    }
}

impl BamFile<ThreadedBgzfReader> {
    /// Open a BAM file with background decompression.
    pub fn open_threaded<P: AsRef<Path>>(path: P) -> Result<Self> {
        OpenOptions::new().open_threaded(path)
    }
}

impl<B: BgzfBackend> BamFile<B> {
    /// Read the next record.
    ///
    /// Returns `Ok(None)` at a clean end of stream, i.e. between records.
    ///
    /// # Errors
    ///
    /// [`BamError::Truncated`] when the stream ends inside a record,
    /// [`BamError::Decode`] for malformed records.
    pub fn read(&mut self) -> Result<Option<Record<'_>>> {
        if !self.blocks.fill()? {
            return Ok(None);
        }

        let size = {
            let mut raw = Vec::with_capacity(4);
            if self.blocks.read_into(4, &mut raw)? < 4 {
                return Err(BamError::Truncated(format!(
                    "EOF inside record length at {}",
                    self.blocks.position()
                )));
            }
            i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]])
        };
        if size <= 0 {
            return Err(DecodeError::InvalidBlockSize { size }.into());
        }
        let size = size as usize;

        if self.blocks.remaining().len() >= size {
            let start = self.blocks.buf_pos;
            self.blocks.consume(size);
            return Ok(Some(Record::parse(&self.blocks.buf[start..start + size])?));
        }

        // Straddles a block boundary
        let mut data = Vec::new();
        let got = self.blocks.read_into(size, &mut data)?;
        if got < size {
            return Err(BamError::Truncated(format!(
                "EOF inside record: expected {} bytes, got {}",
                size, got
            )));
        }
        Ok(Some(Record::from_vec(data)?))
    }

    /// Iterate over the remaining records, each detached from the buffer.
    pub fn records(&mut self) -> Records<'_, B> {
        Records { file: self }
    }

    /// Current position: the next record starts here.
    pub fn position(&self) -> VirtualPosition {
        self.blocks.position()
    }

    /// Resume reading at `pos`, a value previously returned by [`position`](Self::position).
    ///
    /// # Errors
    ///
    /// [`BamError::InvalidPosition`] for positions before the first record,
    /// past the end of the file, or past the end of the current block.
    /// [`BamError::Unsupported`] when the backend cannot reposition and
    /// `pos` is outside the current block.
    pub fn set_position(&mut self, pos: VirtualPosition) -> Result<()> {
        let fpos = pos.compressed_offset();
        let bpos = pos.block_offset() as usize;

        if fpos < self.first.compressed_offset()
            || fpos > self.blocks.backend.file_size()
            || (fpos == self.first.compressed_offset()
                && pos.block_offset() < self.first.block_offset())
        {
            return Err(BamError::InvalidPosition(pos));
        }

        if self.blocks.loaded && fpos == self.blocks.block_start {
            if bpos > self.blocks.buf.len() {
                return Err(BamError::InvalidPosition(pos));
            }
            self.blocks.buf_pos = bpos;
            return Ok(());
        }

        self.blocks.backend.set_position(fpos)?;
        self.blocks.buf.clear();
        self.blocks.buf_pos = bpos;
        self.blocks.block_start = fpos;
        self.blocks.loaded = false;
        Ok(())
    }

    /// Go back to the first record.
    pub fn rewind(&mut self) -> Result<()> {
        self.set_position(self.first)
    }

    /// Fraction of the compressed file consumed (advisory).
    pub fn proportional_position(&self) -> f32 {
        self.blocks.backend.proportional_position()
    }

    /// Shared handle to the parsed header.
    pub fn header(&self) -> &Arc<Header> {
        &self.header
    }

    /// SAM header text.
    pub fn header_text(&self) -> &str {
        self.header.text()
    }

    /// `@HD VN` value.
    pub fn version(&self) -> Option<&str> {
        self.header.version()
    }

    /// Reference sequences; the slice index is the reference id.
    pub fn references(&self) -> &[ReferenceSeq] {
        self.header.references()
    }

    /// Reference sequence by id.
    pub fn reference(&self, id: usize) -> Option<&ReferenceSeq> {
        self.header.reference(id)
    }

    /// Read groups sorted by name.
    pub fn read_groups(&self) -> &[ReadGroup] {
        self.header.read_groups()
    }

    /// Read group by its `ID`.
    pub fn read_group_by_name(&self, name: &str) -> Option<&ReadGroup> {
        self.header.read_group_by_name(name)
    }

    /// Load a BAI index for this file, replacing any previous one.
    pub fn open_index<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let index = BamIndex::from_path(path, self.header.references())?;
        self.set_index(Arc::new(index));
        Ok(())
    }

    /// Use an index that is already loaded.
    pub fn set_index(&mut self, index: Arc<BamIndex>) {
        self.index = Some(index);
    }

    /// The loaded index, if any.
    pub fn index(&self) -> Option<&Arc<BamIndex>> {
        self.index.as_ref()
    }

    /// Whether an index is loaded.
    pub fn is_indexed(&self) -> bool {
        self.index.is_some()
    }

    /// Whether the loaded index has data for `ref_id`.
    pub fn index_has_reference(&self, ref_id: usize) -> bool {
        self.index
            .as_ref()
            .is_some_and(|index| index.has_reference(ref_id))
    }

    /// Position the file at the first record overlapping `[start, end)` on
    /// reference `ref_id`.
    ///
    /// Returns `Ok(false)` when no record overlaps the window. `end` is
    /// clamped to the reference length.
    ///
    /// # Errors
    ///
    /// - [`BamError::Index`]: no index, unknown reference, reference missing
    ///   from the index, `start` past the reference end, or an index entry
    ///   that does not lead to a record of this reference
    /// - [`BamError::Corruption`]: record positions decrease while scanning,
    ///   so the file is not coordinate sorted
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bamread::io::bam::BamFile;
    ///
    /// # fn main() -> bamread::Result<()> {
    /// let mut bam = BamFile::open("sample.bam")?;
    /// bam.open_index("sample.bam.bai")?;
    /// if bam.seek(0, 10_000, 20_000)? {
    ///     while let Some(record) = bam.read()? {
    ///         if record.reference_id() != 0 || record.position() >= 20_000 {
    ///             break;
    ///         }
    ///         println!("{}", String::from_utf8_lossy(record.read_name()));
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn seek(&mut self, ref_id: usize, start: u64, end: u64) -> Result<bool> {
        let index = self
            .index
            .clone()
            .ok_or_else(|| BamError::Index("no index loaded".into()))?;
        let length = self
            .header
            .reference(ref_id)
            .map(|r| u64::from(r.length))
            .ok_or_else(|| BamError::Index(format!("unknown reference id {}", ref_id)))?;
        let intervals = index.reference(ref_id).ok_or_else(|| {
            BamError::Index(format!("reference {} has no data in the index", ref_id))
        })?;
        if start >= length {
            return Err(BamError::Index(format!(
                "start {} is past the end of reference {} (length {})",
                start, ref_id, length
            )));
        }
        let end = end.min(length);
        if end <= start {
            return Ok(false);
        }
        let (start, end) = (start as i64, end as i64);

        // First interval at or after `start` that has an alignment
        let first_ival = (start as u64 >> INTERVAL_SHIFT) as usize;
        let last_ival = (end as u64).div_ceil(INTERVAL_WIDTH) as usize;
        let Some(mut ival) = (first_ival..last_ival)
            .find(|&i| intervals.get(i).is_some_and(|p| !p.is_unset()))
        else {
            debug!("Seek {}:{}-{}: no indexed interval", ref_id, start, end);
            return Ok(false);
        };
        let mut rpos = intervals[ival];

        // The interval offset is the first alignment starting in it, which
        // can lie beyond a narrow window; step back until it does not. An
        // interval below `first_ival` holds alignments starting before the
        // window, so the walk goes no further than one interval below it.
        let (mut pos, mut rec_end) = loop {
            self.set_position(rpos).map_err(|e| match e {
                BamError::InvalidPosition(p) => {
                    BamError::Index(format!("index offset {} is not a valid position", p))
                }
                other => other,
            })?;
            let (rec_ref, pos, rec_end) = self.next_span()?.ok_or_else(|| {
                BamError::Index(format!("index offset {} is past the last record", rpos))
            })?;
            if rec_ref != ref_id as i32 {
                return Err(BamError::Index(format!(
                    "index offset {} leads to reference {} instead of {}",
                    rpos, rec_ref, ref_id
                )));
            }
            if pos < end {
                break (pos, rec_end);
            }
            if ival == 0 || ival < first_ival || intervals[ival - 1].is_unset() {
                debug!(
                    "Seek {}:{}-{}: first indexed record at {} is past the window",
                    ref_id, start, end, pos
                );
                return Ok(false);
            }
            ival -= 1;
            rpos = intervals[ival];
        };

        let mut prev = pos;
        loop {
            if pos >= end {
                return Ok(false);
            }
            if pos >= start || rec_end > start {
                debug!("Seek {}:{}-{}: first overlap at {}", ref_id, start, end, rpos);
                self.set_position(rpos)?;
                return Ok(true);
            }

            rpos = self.position();
            let Some((rec_ref, next_pos, next_end)) = self.next_span()? else {
                return Ok(false);
            };
            if rec_ref != ref_id as i32 {
                return Ok(false);
            }
            if next_pos < prev {
                return Err(BamError::Corruption(format!(
                    "record at {} starts at {} after a record at {} on reference {}; \
                     the file is not coordinate sorted or the index is stale",
                    rpos, next_pos, prev, ref_id
                )));
            }
            prev = next_pos;
            pos = next_pos;
            rec_end = next_end;
        }
    }

    /// Reference id, start and end of the next record.
    fn next_span(&mut self) -> Result<Option<(i32, i64, i64)>> {
        Ok(self.read()?.map(|r| {
            (
                r.reference_id(),
                i64::from(r.position()),
                r.end_position(),
            )
        }))
    }
}

/// Iterator over owned records, created by [`BamFile::records`].
pub struct Records<'f, B> {
    file: &'f mut BamFile<B>,
}

impl<B: BgzfBackend> Iterator for Records<'_, B> {
    type Item = Result<Record<'static>>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.file.read() {
            Ok(Some(record)) => Some(Ok(record.into_owned())),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bam::cigar::CigarOp;
    use crate::io::bam::index::tests::BaiBuilder;
    use crate::io::bam::record::tests::RecordBuilder;
    use crate::io::bgzf::{compress_block, BGZF_EOF};
    use std::io::Cursor;

    const HEADER_TEXT: &str = "@HD\tVN:1.6\tSO:coordinate\n@SQ\tSN:chr1\tLN:100000\n\
                               @SQ\tSN:chr2\tLN:5000\n@RG\tID:rg1\tSM:s1\n";

    fn header_bytes(text: &str) -> Vec<u8> {
        let mut d = b"BAM\x01".to_vec();
        d.extend_from_slice(&(text.len() as i32).to_le_bytes());
        d.extend_from_slice(text.as_bytes());
        d.extend_from_slice(&2i32.to_le_bytes());
        for (name, len) in [("chr1", 100000i32), ("chr2", 5000)] {
            d.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
            d.extend_from_slice(name.as_bytes());
            d.push(0);
            d.extend_from_slice(&len.to_le_bytes());
        }
        d
    }

    fn framed(record: &[u8]) -> Vec<u8> {
        let mut d = (record.len() as i32).to_le_bytes().to_vec();
        d.extend_from_slice(record);
        d
    }

    fn record(ref_id: i32, pos: i32, span: u32) -> Vec<u8> {
        framed(&RecordBuilder::new(ref_id, pos, &[CigarOp::Match(span)], &vec![b'A'; span as usize]).build())
    }

    /// Compress each chunk into its own block, then append the EOF marker.
    /// Returns the file and the compressed offset of each block.
    fn bgzf(chunks: &[Vec<u8>]) -> (Vec<u8>, Vec<u64>) {
        let mut file = Vec::new();
        let mut offsets = Vec::new();
        for chunk in chunks {
            offsets.push(file.len() as u64);
            file.extend_from_slice(&compress_block(chunk));
        }
        file.extend_from_slice(&BGZF_EOF);
        (file, offsets)
    }

    fn open(file: Vec<u8>) -> BamFile<BgzfReader<Cursor<Vec<u8>>>> {
        OpenOptions::new().open_reader(Cursor::new(file)).unwrap()
    }

    #[test]
    fn test_header_and_records_in_one_block() {
        let mut data = header_bytes(HEADER_TEXT);
        data.extend(record(0, 10, 20));
        data.extend(record(0, 30, 20));
        let (file, _) = bgzf(&[data]);
        let mut bam = open(file);

        assert_eq!(bam.version(), Some("1.6"));
        assert_eq!(bam.references().len(), 2);
        assert_eq!(bam.references()[1].name, "chr2");
        assert_eq!(bam.read_group_by_name("rg1").map(|rg| rg.id), Some(0));

        let first = bam.read().unwrap().unwrap();
        assert!(first.is_borrowed());
        assert_eq!(first.position(), 10);
        assert_eq!(bam.read().unwrap().unwrap().position(), 30);
        assert!(bam.read().unwrap().is_none());
        assert!(bam.read().unwrap().is_none());
    }

    #[test]
    fn test_record_straddling_blocks_is_owned() {
        let mut data = header_bytes(HEADER_TEXT);
        let rec = record(0, 10, 50);
        let split = data.len() + rec.len() / 2;
        data.extend(rec);
        let (file, _) = bgzf(&[data[..split].to_vec(), data[split..].to_vec()]);
        let mut bam = open(file);

        let r = bam.read().unwrap().unwrap();
        assert!(!r.is_borrowed());
        assert_eq!(r.read_len(), 50);
        assert!(bam.read().unwrap().is_none());
    }

    #[test]
    fn test_record_length_straddling_blocks() {
        let mut data = header_bytes(HEADER_TEXT);
        let split = data.len() + 2;
        data.extend(record(1, 7, 5));
        let (file, _) = bgzf(&[data[..split].to_vec(), data[split..].to_vec()]);
        let mut bam = open(file);
        assert_eq!(bam.read().unwrap().unwrap().position(), 7);
    }

    #[test]
    fn test_truncated_record() {
        let mut data = header_bytes(HEADER_TEXT);
        let rec = record(0, 10, 50);
        data.extend_from_slice(&rec[..rec.len() - 5]);
        let (file, _) = bgzf(&[data]);
        let mut bam = open(file);
        assert!(bam.read().unwrap_err().is_truncated());
    }

    #[test]
    fn test_invalid_block_size() {
        let mut data = header_bytes(HEADER_TEXT);
        data.extend_from_slice(&(-4i32).to_le_bytes());
        let (file, _) = bgzf(&[data]);
        let mut bam = open(file);
        assert!(matches!(
            bam.read(),
            Err(BamError::Decode(DecodeError::InvalidBlockSize { size: -4 }))
        ));
    }

    #[test]
    fn test_header_text_override() {
        let (file, _) = bgzf(&[header_bytes(HEADER_TEXT)]);
        let bam = OpenOptions::new()
            .header_text("@SQ\tSN:chr2\tLN:5000\tSP:human\n")
            .open_reader(Cursor::new(file))
            .unwrap();
        assert_eq!(bam.version(), None);
        assert_eq!(bam.references()[1].species.as_deref(), Some("human"));
        assert!(bam.read_groups().is_empty());
    }

    #[test]
    fn test_position_rewind_and_replay() {
        let header = header_bytes(HEADER_TEXT);
        let block2: Vec<u8> = [record(0, 100, 10), record(0, 200, 10)].concat();
        let (file, offsets) = bgzf(&[header, block2]);
        let mut bam = open(file);

        // Header fills block 0 exactly, so records start at block 1
        assert_eq!(bam.position(), VirtualPosition::new(offsets[1], 0));

        bam.read().unwrap();
        let second = bam.position();
        assert_eq!(second.compressed_offset(), offsets[1]);
        assert_eq!(bam.read().unwrap().unwrap().position(), 200);

        bam.set_position(second).unwrap();
        assert_eq!(bam.read().unwrap().unwrap().position(), 200);

        bam.rewind().unwrap();
        assert_eq!(bam.read().unwrap().unwrap().position(), 100);
    }

    #[test]
    fn test_set_position_rejects_invalid() {
        let mut data = header_bytes(HEADER_TEXT);
        data.extend(record(0, 100, 10));
        let (file, offsets) = bgzf(&[data]);
        let size = file.len() as u64;
        let mut bam = open(file);
        let first = bam.position();

        // Before the first record
        let before = VirtualPosition::new(offsets[0], first.block_offset() - 1);
        assert!(matches!(bam.set_position(before), Err(BamError::InvalidPosition(_))));
        // Past the end of the file
        let past = VirtualPosition::new(size + 1, 0);
        assert!(matches!(bam.set_position(past), Err(BamError::InvalidPosition(_))));
        // Past the end of the current block
        let beyond = VirtualPosition::new(offsets[0], 60000);
        assert!(matches!(bam.set_position(beyond), Err(BamError::InvalidPosition(_))));
    }

    #[test]
    fn test_records_iterator() {
        let mut data = header_bytes(HEADER_TEXT);
        for pos in [5, 6, 7] {
            data.extend(record(0, pos, 3));
        }
        let (file, _) = bgzf(&[data]);
        let mut bam = open(file);
        let positions: Vec<i32> = bam.records().map(|r| r.unwrap().position()).collect();
        assert_eq!(positions, vec![5, 6, 7]);
    }

    /// Header in block 0, then one block per group of records on chr1.
    fn indexed_file(groups: &[&[(i32, u32)]]) -> (BamFile<BgzfReader<Cursor<Vec<u8>>>>, Vec<u64>) {
        let mut chunks = vec![header_bytes(HEADER_TEXT)];
        for group in groups {
            chunks.push(group.iter().flat_map(|&(pos, span)| record(0, pos, span)).collect());
        }
        let (file, offsets) = bgzf(&chunks);
        (open(file), offsets)
    }

    fn with_intervals(bam: &mut BamFile<BgzfReader<Cursor<Vec<u8>>>>, intervals: Vec<u64>) {
        let bai = BaiBuilder::default().reference(vec![], intervals).build();
        let index = BamIndex::from_bytes(&bai, bam.references()).unwrap();
        bam.set_index(Arc::new(index));
    }

    #[test]
    fn test_seek_finds_first_overlap() {
        // Interval 1 (16384..) starts with the record at 16000, which
        // reaches into it
        let (mut bam, offsets) =
            indexed_file(&[&[(100, 50), (16000, 1000)], &[(17000, 50), (18000, 50)]]);
        let second = record(0, 100, 50).len() as u64;
        with_intervals(&mut bam, vec![offsets[1] << 16, (offsets[1] << 16) | second]);
        assert!(bam.is_indexed());
        assert!(bam.index_has_reference(0));
        assert!(!bam.index_has_reference(1));

        // The record at 16000 spans into the window
        assert!(bam.seek(0, 16500, 17500).unwrap());
        assert_eq!(bam.read().unwrap().unwrap().position(), 16000);

        assert!(bam.seek(0, 17500, 30000).unwrap());
        assert_eq!(bam.read().unwrap().unwrap().position(), 18000);

        // Nothing between 200 and 15000
        assert!(!bam.seek(0, 200, 15000).unwrap());
    }

    #[test]
    fn test_seek_steps_back_after_overshoot() {
        // The only record in interval 1 starts well after the window
        let (mut bam, offsets) = indexed_file(&[&[(100, 20000)], &[(30000, 10)]]);
        with_intervals(&mut bam, vec![offsets[1] << 16, offsets[2] << 16]);
        assert!(bam.seek(0, 17000, 17100).unwrap());
        assert_eq!(bam.read().unwrap().unwrap().position(), 100);
    }

    #[test]
    fn test_seek_errors() {
        let (mut bam, offsets) = indexed_file(&[&[(100, 10)]]);
        assert!(matches!(bam.seek(0, 0, 10), Err(BamError::Index(_))));

        with_intervals(&mut bam, vec![offsets[1] << 16]);
        assert!(matches!(bam.seek(1, 0, 10), Err(BamError::Index(_))));
        assert!(matches!(bam.seek(5, 0, 10), Err(BamError::Index(_))));
        assert!(matches!(bam.seek(0, 100000, 100010), Err(BamError::Index(_))));
    }

    #[test]
    fn test_seek_detects_unsorted_file() {
        let (mut bam, offsets) = indexed_file(&[&[(100, 10), (50, 10), (500, 10)]]);
        with_intervals(&mut bam, vec![offsets[1] << 16]);
        assert!(matches!(bam.seek(0, 400, 600), Err(BamError::Corruption(_))));
    }

    #[test]
    fn test_seek_index_mismatch() {
        let mut chunks = vec![header_bytes(HEADER_TEXT)];
        chunks.push(record(1, 100, 10));
        let (file, offsets) = bgzf(&chunks);
        let mut bam = open(file);
        with_intervals(&mut bam, vec![offsets[1] << 16]);
        assert!(matches!(bam.seek(0, 0, 1000), Err(BamError::Index(_))));
    }
}
