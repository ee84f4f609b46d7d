//! Builders for synthetic BGZF, BAM and BAI fixtures.

#![allow(dead_code)]

use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::Write;
use tempfile::NamedTempFile;

pub use bamread::io::bgzf::BGZF_EOF;

/// Compress `data` (at most 64 KiB) into one BGZF block.
pub fn bgzf_block(data: &[u8]) -> Vec<u8> {
    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data).unwrap();
    let deflated = deflate.finish().unwrap();

    let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, b'B', b'C', 2, 0, 0, 0];
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());
    let bsize = (block.len() - 1) as u16;
    block[16..18].copy_from_slice(&bsize.to_le_bytes());
    block
}

/// One block per chunk plus the EOF marker. Returns the file and each
/// block's compressed offset.
pub fn bgzf_file(chunks: &[Vec<u8>]) -> (Vec<u8>, Vec<u64>) {
    let mut file = Vec::new();
    let mut offsets = Vec::new();
    for chunk in chunks {
        offsets.push(file.len() as u64);
        file.extend_from_slice(&bgzf_block(chunk));
    }
    file.extend_from_slice(&BGZF_EOF);
    (file, offsets)
}

/// Magic, SAM text and binary reference table.
pub fn header_bytes(text: &str, references: &[(&str, u32)]) -> Vec<u8> {
    let mut d = b"BAM\x01".to_vec();
    d.extend_from_slice(&(text.len() as i32).to_le_bytes());
    d.extend_from_slice(text.as_bytes());
    d.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (name, len) in references {
        d.extend_from_slice(&(name.len() as i32 + 1).to_le_bytes());
        d.extend_from_slice(name.as_bytes());
        d.push(0);
        d.extend_from_slice(&(*len as i32).to_le_bytes());
    }
    d
}

/// Alignment record fields; `build` produces length-prefixed bytes.
#[derive(Debug, Clone)]
pub struct RecordSpec {
    pub ref_id: i32,
    pub pos: i32,
    pub name: String,
    pub flags: u16,
    /// `(op code, length)` pairs
    pub cigar: Vec<(u32, u32)>,
    pub seq: Vec<u8>,
    pub qual: Vec<u8>,
    pub tags: Vec<u8>,
}

impl RecordSpec {
    /// A mapped read with a single `M` op covering `len` bases.
    pub fn mapped(ref_id: i32, pos: i32, len: usize, name: &str) -> Self {
        Self {
            ref_id,
            pos,
            name: name.to_string(),
            flags: 0,
            cigar: vec![(0, len as u32)],
            seq: b"ACGT".iter().cycle().take(len).copied().collect(),
            qual: vec![30; len],
            tags: Vec::new(),
        }
    }

    pub fn tag_z(mut self, name: &str, value: &str) -> Self {
        self.tags.extend_from_slice(name.as_bytes());
        self.tags.push(b'Z');
        self.tags.extend_from_slice(value.as_bytes());
        self.tags.push(0);
        self
    }

    pub fn tag_i(mut self, name: &str, value: i32) -> Self {
        self.tags.extend_from_slice(name.as_bytes());
        self.tags.push(b'i');
        self.tags.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Reference bases covered by the CIGAR.
    pub fn span(&self) -> i64 {
        self.cigar
            .iter()
            .filter(|(op, _)| matches!(op, 0 | 2 | 3 | 7 | 8))
            .map(|&(_, len)| i64::from(len))
            .sum()
    }

    pub fn build(&self) -> Vec<u8> {
        let nibble = |b: u8| b"=ACMGRSVTWYHKDBN".iter().position(|&c| c == b).unwrap_or(15) as u8;
        let mut d = Vec::new();
        d.extend_from_slice(&self.ref_id.to_le_bytes());
        d.extend_from_slice(&self.pos.to_le_bytes());
        d.push(self.name.len() as u8 + 1);
        d.push(60);
        d.extend_from_slice(&4680u16.to_le_bytes());
        d.extend_from_slice(&(self.cigar.len() as u16).to_le_bytes());
        d.extend_from_slice(&self.flags.to_le_bytes());
        d.extend_from_slice(&(self.seq.len() as i32).to_le_bytes());
        d.extend_from_slice(&(-1i32).to_le_bytes());
        d.extend_from_slice(&(-1i32).to_le_bytes());
        d.extend_from_slice(&0i32.to_le_bytes());
        d.extend_from_slice(self.name.as_bytes());
        d.push(0);
        for &(op, len) in &self.cigar {
            d.extend_from_slice(&((len << 4) | op).to_le_bytes());
        }
        for pair in self.seq.chunks(2) {
            d.push((nibble(pair[0]) << 4) | pair.get(1).map_or(0, |&b| nibble(b)));
        }
        d.extend_from_slice(&self.qual);
        d.extend_from_slice(&self.tags);

        let mut framed = (d.len() as i32).to_le_bytes().to_vec();
        framed.extend(d);
        framed
    }
}

/// BAI bytes. Each reference is `(bins, intervals)` with bins as
/// `(bin number, [(chunk start, chunk end)])`.
pub fn bai_bytes(references: &[(Vec<(u32, Vec<(u64, u64)>)>, Vec<u64>)]) -> Vec<u8> {
    let mut out = b"BAI\x01".to_vec();
    out.extend_from_slice(&(references.len() as i32).to_le_bytes());
    for (bins, intervals) in references {
        out.extend_from_slice(&(bins.len() as i32).to_le_bytes());
        for (bin, chunks) in bins {
            out.extend_from_slice(&bin.to_le_bytes());
            out.extend_from_slice(&(chunks.len() as i32).to_le_bytes());
            for (s, e) in chunks {
                out.extend_from_slice(&s.to_le_bytes());
                out.extend_from_slice(&e.to_le_bytes());
            }
        }
        out.extend_from_slice(&(intervals.len() as i32).to_le_bytes());
        for i in intervals {
            out.extend_from_slice(&i.to_le_bytes());
        }
    }
    out
}

/// A coordinate-sorted BAM with its BAI.
pub struct IndexedBam {
    pub bam: Vec<u8>,
    pub bai: Vec<u8>,
    /// Virtual position of each record, in file order
    pub positions: Vec<u64>,
}

/// Pack `records` (sorted by reference then position) `per_block` to a
/// BGZF block after a header block, and build a linear index the way
/// indexers do: each 16 KiB interval points at the first record that
/// overlaps it.
pub fn indexed_bam(
    text: &str,
    references: &[(&str, u32)],
    records: &[RecordSpec],
    per_block: usize,
) -> IndexedBam {
    let mut chunks = vec![header_bytes(text, references)];
    let mut in_block = Vec::new();
    for group in records.chunks(per_block.max(1)) {
        let mut block = Vec::new();
        let mut offsets = Vec::new();
        for r in group {
            offsets.push(block.len() as u64);
            block.extend(r.build());
        }
        in_block.push(offsets);
        chunks.push(block);
    }
    let (bam, block_offsets) = bgzf_file(&chunks);

    let positions: Vec<u64> = in_block
        .iter()
        .enumerate()
        .flat_map(|(b, offsets)| {
            let base = block_offsets[b + 1] << 16;
            offsets.iter().map(move |&o| base | o).collect::<Vec<_>>()
        })
        .collect();

    let mut linear: Vec<Vec<u64>> = references
        .iter()
        .map(|&(_, len)| vec![0; ((len as usize) + 16383) >> 14])
        .collect();
    for (r, &vpos) in records.iter().zip(&positions) {
        let Some(intervals) = usize::try_from(r.ref_id).ok().and_then(|id| linear.get_mut(id)) else {
            continue;
        };
        let first = (r.pos.max(0) as usize) >> 14;
        let last = ((r.pos as i64 + r.span().max(1) - 1) as usize) >> 14;
        for slot in intervals.iter_mut().take(last + 1).skip(first) {
            if *slot == 0 {
                *slot = vpos;
            }
        }
    }
    let bai = bai_bytes(
        &linear
            .into_iter()
            .map(|intervals| {
                // Trailing unset intervals are not written
                let used = intervals.iter().rposition(|&v| v != 0).map_or(0, |i| i + 1);
                (Vec::new(), intervals[..used].to_vec())
            })
            .collect::<Vec<_>>(),
    );

    IndexedBam { bam, bai, positions }
}

/// Route library logging to the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Write bytes to a temporary file that lives as long as the handle.
pub fn temp_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}
