//! BGZF member framing and inflate.
//!
//! # Block Structure
//!
//! Each BGZF block is a complete gzip member:
//! - Bytes 0-1: Gzip magic (31, 139)
//! - Byte 2: CM=8 (deflate)
//! - Byte 3: FLG with FEXTRA (4) set
//! - Bytes 4-9: MTIME, XFL, OS
//! - Bytes 10-11: XLEN (extra field length)
//! - Bytes 12+: Extra subfields, one of which must be
//!   SI1=66 ('B'), SI2=67 ('C'), SLEN=2, BSIZE (total block size - 1)
//! - Raw deflate payload
//! - CRC32 and ISIZE (4 bytes each)

use super::MAX_BLOCK_SIZE;
use crate::error::{BamError, Result};
use flate2::{Decompress, FlushDecompress, Status};

/// Bytes of the gzip header up to and including XLEN.
pub(crate) const FIXED_HEADER_LEN: usize = 12;

/// CRC32 + ISIZE.
pub(crate) const FOOTER_LEN: usize = 8;

/// The 28-byte empty block conventionally written at the end of BGZF files.
pub const BGZF_EOF: [u8; 28] = [
    0x1f, 0x8b, 0x08, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0xff, 0x06, 0x00, 0x42, 0x43, 0x02, 0x00,
    0x1b, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
];

/// Validate the fixed gzip header and return XLEN.
pub(crate) fn parse_fixed_header(header: &[u8]) -> Result<usize> {
    if header.len() < FIXED_HEADER_LEN {
        return Err(BamError::Truncated(format!(
            "gzip header needs {} bytes, got {}",
            FIXED_HEADER_LEN,
            header.len()
        )));
    }

    if header[0] != 31 || header[1] != 139 {
        return Err(BamError::Format(format!(
            "Invalid gzip magic bytes: expected [31, 139], got [{}, {}]",
            header[0], header[1]
        )));
    }
    if header[2] != 8 {
        return Err(BamError::Format(format!(
            "Unsupported gzip compression method: {}",
            header[2]
        )));
    }
    if header[3] & 0x04 == 0 {
        return Err(BamError::Format(
            "gzip member has no extra field; not a BGZF block".to_string(),
        ));
    }

    Ok(u16::from_le_bytes([header[10], header[11]]) as usize)
}

/// Find the BC subfield in the gzip extra field and return the total block size.
pub(crate) fn parse_block_size(extra: &[u8]) -> Result<usize> {
    let mut pos = 0;

    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == b'B' && si2 == b'C' {
            if slen != 2 || pos + 6 > extra.len() {
                return Err(BamError::Format(format!(
                    "Malformed BC subfield (SLEN={})",
                    slen
                )));
            }
            let bsize = u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]);
            return Ok(bsize as usize + 1);
        }

        pos += 4 + slen;
    }

    Err(BamError::Format(
        "BC subfield not found in gzip extra field; not a BGZF block".to_string(),
    ))
}

/// Reusable raw-deflate decompressor for BGZF payloads.
pub(crate) struct Inflater {
    inner: Decompress,
}

impl Inflater {
    pub(crate) fn new() -> Self {
        Self {
            inner: Decompress::new(false),
        }
    }

    /// Inflate one complete block (header through footer) into `dst`.
    ///
    /// The deflate stream must end exactly at the footer, otherwise BSIZE
    /// disagrees with what the member actually consumed.
    pub(crate) fn inflate_into(
        &mut self,
        block: &[u8],
        header_len: usize,
        dst: &mut Vec<u8>,
    ) -> Result<usize> {
        let footer_start = block.len() - FOOTER_LEN;
        let payload = &block[header_len..footer_start];
        let footer = &block[footer_start..];
        let expected_crc = u32::from_le_bytes([footer[0], footer[1], footer[2], footer[3]]);
        let expected_len = u32::from_le_bytes([footer[4], footer[5], footer[6], footer[7]]) as usize;

        if expected_len > MAX_BLOCK_SIZE {
            return Err(BamError::Format(format!(
                "BGZF block claims {} uncompressed bytes (max {})",
                expected_len, MAX_BLOCK_SIZE
            )));
        }

        dst.clear();
        dst.reserve(MAX_BLOCK_SIZE);
        self.inner.reset(false);

        let status = self
            .inner
            .decompress_vec(payload, dst, FlushDecompress::Finish)
            .map_err(|e| BamError::Format(format!("Corrupt deflate data: {}", e)))?;

        if status != Status::StreamEnd {
            return Err(BamError::Format(
                "Deflate stream does not end at the BGZF block boundary".to_string(),
            ));
        }
        if self.inner.total_in() as usize != payload.len() {
            return Err(BamError::Format(format!(
                "BSIZE mismatch: block payload is {} bytes but deflate consumed {}",
                payload.len(),
                self.inner.total_in()
            )));
        }
        if dst.len() != expected_len {
            return Err(BamError::Format(format!(
                "ISIZE mismatch: expected {} bytes, inflated {}",
                expected_len,
                dst.len()
            )));
        }
        if crc32fast::hash(dst) != expected_crc {
            return Err(BamError::Format("BGZF block CRC32 mismatch".to_string()));
        }

        Ok(dst.len())
    }
}

/// Compress `data` into a single BGZF block.
#[cfg(test)]
pub(crate) fn compress_block(data: &[u8]) -> Vec<u8> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;
    use std::io::Write;

    let mut deflate = DeflateEncoder::new(Vec::new(), Compression::default());
    deflate.write_all(data).expect("in-memory deflate");
    let deflated = deflate.finish().expect("in-memory deflate");

    let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255];
    block.extend_from_slice(&6u16.to_le_bytes());
    block.extend_from_slice(&[b'B', b'C']);
    block.extend_from_slice(&2u16.to_le_bytes());
    let bsize_pos = block.len();
    block.extend_from_slice(&0u16.to_le_bytes());
    block.extend_from_slice(&deflated);
    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    let bsize = (block.len() - 1) as u16;
    block[bsize_pos..bsize_pos + 2].copy_from_slice(&bsize.to_le_bytes());
    block
}
