//! Synchronous, seekable BGZF reader.

use super::block::{self, Inflater, FIXED_HEADER_LEN, FOOTER_LEN};
use super::{BgzfBackend, ReaderOptions, WINDOW_ALIGNMENT};
use crate::error::{BamError, Result};
use log::{debug, trace};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Reads BGZF blocks through a large raw window.
///
/// Refills always start on a 64 KiB boundary, so nearby repositioning
/// (the common case after an index seek) stays inside the window without
/// touching the file.
///
/// # Example
///
/// ```no_run
/// use bamread::io::bgzf::{BgzfBackend, BgzfReader};
///
/// # fn main() -> bamread::Result<()> {
/// let mut reader = BgzfReader::open("alignments.bam")?;
/// let mut block = Vec::new();
/// while let Some(offset) = reader.read_block(&mut block)? {
///     println!("block at {} holds {} bytes", offset, block.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct BgzfReader<R> {
    inner: R,
    file_size: u64,
    window: Box<[u8]>,
    /// File offset of `window[0]`
    window_start: u64,
    /// Valid bytes in `window`
    window_len: usize,
    /// Cursor within `window`; may exceed `window_len` after a far seek
    head: usize,
    inflater: Inflater,
}

impl BgzfReader<File> {
    /// Open a BGZF file with default options.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(File::open(path)?)
    }
}

impl<R: Read + Seek> BgzfReader<R> {
    /// Wrap a seekable source with default options.
    pub fn new(inner: R) -> Result<Self> {
        Self::with_options(inner, ReaderOptions::default())
    }

    /// Wrap a seekable source.
    pub fn with_options(mut inner: R, options: ReaderOptions) -> Result<Self> {
        let file_size = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        debug!(
            "Opened BGZF source: {} bytes, {} byte window",
            file_size,
            options.window_size()
        );

        Ok(Self {
            inner,
            file_size,
            window: vec![0u8; options.window_size()].into_boxed_slice(),
            window_start: 0,
            window_len: 0,
            head: 0,
            inflater: Inflater::new(),
        })
    }

    /// Consume the reader, returning the underlying source.
    pub fn into_inner(self) -> R {
        self.inner
    }

    fn available(&self) -> usize {
        self.window_len.saturating_sub(self.head)
    }

    /// Make at least `n` bytes available at the cursor if the file has them.
    fn ensure(&mut self, n: usize) -> Result<bool> {
        if self.available() >= n {
            return Ok(true);
        }
        self.refill()?;
        Ok(self.available() >= n)
    }

    fn refill(&mut self) -> Result<()> {
        let absolute = self.window_start + self.head as u64;
        let aligned = absolute & !(WINDOW_ALIGNMENT - 1);

        self.inner.seek(SeekFrom::Start(aligned))?;
        let mut filled = 0;
        while filled < self.window.len() {
            match self.inner.read(&mut self.window[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        trace!("Window refill at {}: {} bytes", aligned, filled);
        self.window_start = aligned;
        self.window_len = filled;
        self.head = (absolute - aligned) as usize;
        Ok(())
    }

    fn truncated(&self, what: &str, start: u64) -> BamError {
        BamError::Truncated(format!(
            "EOF inside BGZF {} (block at offset {}, file is {} bytes)",
            what, start, self.file_size
        ))
    }
}

impl<R: Read + Seek> super::sealed::Sealed for BgzfReader<R> {}

impl<R: Read + Seek> BgzfBackend for BgzfReader<R> {
    fn read_block(&mut self, dst: &mut Vec<u8>) -> Result<Option<u64>> {
        let start = self.position();

        if !self.ensure(FIXED_HEADER_LEN)? {
            if self.available() == 0 {
                dst.clear();
                return Ok(None);
            }
            return Err(self.truncated("header", start));
        }
        let xlen = block::parse_fixed_header(&self.window[self.head..self.head + FIXED_HEADER_LEN])?;
        let header_len = FIXED_HEADER_LEN + xlen;

        if !self.ensure(header_len)? {
            return Err(self.truncated("header", start));
        }
        let total = block::parse_block_size(
            &self.window[self.head + FIXED_HEADER_LEN..self.head + header_len],
        )?;
        if total < header_len + FOOTER_LEN {
            return Err(BamError::Format(format!(
                "BGZF block at offset {} is {} bytes, smaller than its own header",
                start, total
            )));
        }

        if !self.ensure(total)? {
            return Err(self.truncated("block", start));
        }
        let raw = &self.window[self.head..self.head + total];
        let n = self.inflater.inflate_into(raw, header_len, dst)?;
        self.head += total;

        trace!("BGZF block at {}: {} -> {} bytes", start, total, n);
        Ok(Some(start))
    }

    fn position(&self) -> u64 {
        self.window_start + self.head as u64
    }

    fn file_size(&self) -> u64 {
        self.file_size
    }

    fn set_position(&mut self, pos: u64) -> Result<()> {
        let window_end = self.window_start + self.window_len as u64;
        if pos >= self.window_start && pos < window_end {
            self.head = (pos - self.window_start) as usize;
        } else {
            // Force a refill on the next read
            self.window_start = pos & !(WINDOW_ALIGNMENT - 1);
            self.window_len = 0;
            self.head = (pos - self.window_start) as usize;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bgzf::{compress_block, BGZF_EOF, MIN_WINDOW_SIZE};
    use std::io::Cursor;

    fn build_file(payloads: &[&[u8]]) -> (Vec<u8>, Vec<u64>) {
        let mut file = Vec::new();
        let mut offsets = Vec::new();
        for p in payloads {
            offsets.push(file.len() as u64);
            file.extend_from_slice(&compress_block(p));
        }
        file.extend_from_slice(&BGZF_EOF);
        (file, offsets)
    }

    #[test]
    fn test_reads_all_blocks_then_eof() {
        let (file, offsets) = build_file(&[b"first", b"second", b"third"]);
        let mut reader = BgzfReader::new(Cursor::new(file.clone())).unwrap();
        let mut buf = Vec::new();

        assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[0]));
        assert_eq!(buf, b"first");
        assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[1]));
        assert_eq!(buf, b"second");
        assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[2]));
        assert_eq!(buf, b"third");

        // EOF marker is an empty block, then clean end
        assert!(reader.read_block(&mut buf).unwrap().is_some());
        assert!(buf.is_empty());
        assert_eq!(reader.read_block(&mut buf).unwrap(), None);
        assert_eq!(reader.read_block(&mut buf).unwrap(), None);
        assert_eq!(reader.position(), file.len() as u64);
        assert_eq!(reader.proportional_position(), 1.0);
    }

    #[test]
    fn test_empty_file_is_clean_eof() {
        let mut reader = BgzfReader::new(Cursor::new(Vec::new())).unwrap();
        let mut buf = vec![1, 2, 3];
        assert_eq!(reader.read_block(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_truncated_block() {
        let (mut file, _) = build_file(&[b"some data to compress"]);
        file.truncate(20);
        let mut reader = BgzfReader::new(Cursor::new(file)).unwrap();
        let mut buf = Vec::new();
        let err = reader.read_block(&mut buf).unwrap_err();
        assert!(err.is_truncated(), "got {err:?}");
    }

    #[test]
    fn test_truncated_header() {
        let mut reader = BgzfReader::new(Cursor::new(vec![31u8, 139, 8])).unwrap();
        let mut buf = Vec::new();
        assert!(reader.read_block(&mut buf).unwrap_err().is_truncated());
    }

    #[test]
    fn test_set_position_replays_block() {
        let (file, offsets) = build_file(&[b"aaa", b"bbb", b"ccc"]);
        let mut reader = BgzfReader::new(Cursor::new(file)).unwrap();
        let mut buf = Vec::new();
        while reader.read_block(&mut buf).unwrap().is_some() {}

        reader.set_position(offsets[1]).unwrap();
        assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[1]));
        assert_eq!(buf, b"bbb");
    }

    #[test]
    fn test_blocks_spanning_window_refills() {
        // Incompressible-ish payloads so the file outgrows the minimum window
        let payloads: Vec<Vec<u8>> = (0..12u32)
            .map(|seed| {
                let mut x = seed.wrapping_mul(2654435761).wrapping_add(1);
                (0..40_000)
                    .map(|_| {
                        x ^= x << 13;
                        x ^= x >> 17;
                        x ^= x << 5;
                        x as u8
                    })
                    .collect()
            })
            .collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let (file, offsets) = build_file(&refs);
        assert!(file.len() > MIN_WINDOW_SIZE * 2);

        let opts = ReaderOptions::default().with_window_size(MIN_WINDOW_SIZE);
        let mut reader = BgzfReader::with_options(Cursor::new(file), opts).unwrap();
        let mut buf = Vec::new();
        for (i, payload) in payloads.iter().enumerate() {
            assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[i]));
            assert_eq!(&buf, payload);
        }

        // Far jump backwards lands outside the current window
        reader.set_position(offsets[2]).unwrap();
        assert_eq!(reader.read_block(&mut buf).unwrap(), Some(offsets[2]));
        assert_eq!(buf, payloads[2]);
    }

    #[test]
    fn test_garbage_is_format_error() {
        let mut reader = BgzfReader::new(Cursor::new(b"this is not gzip at all".to_vec())).unwrap();
        let mut buf = Vec::new();
        assert!(matches!(
            reader.read_block(&mut buf),
            Err(BamError::Format(_))
        ));
    }
}
