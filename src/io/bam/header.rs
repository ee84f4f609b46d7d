//! Binary BAM header section.
//!
//! The decompressed stream starts with:
//!
//! ```text
//! - 4 bytes: Magic ("BAM\1")
//! - 4 bytes: SAM header text length (l_text, int32)
//! - l_text bytes: SAM header text (may be NUL padded)
//! - 4 bytes: Number of reference sequences (n_ref, int32)
//! - For each reference:
//!   - 4 bytes: Reference name length (l_name, int32, includes NUL terminator)
//!   - l_name bytes: Reference name (NUL-terminated)
//!   - 4 bytes: Reference length (int32)
//! ```
//!
//! The text is interpreted separately by [`sam_header`](super::sam_header).

use crate::error::{BamError, Result};
use std::io::{self, Read};

/// BAM magic bytes.
pub const BAM_MAGIC: &[u8; 4] = b"BAM\x01";

/// One entry of the binary reference table, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawReference {
    /// Reference sequence name (e.g., "chr1")
    pub name: String,
    /// Reference sequence length in bases
    pub length: u32,
}

/// Header text plus binary reference table, before SAM text parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHeader {
    /// SAM header text with trailing NUL padding removed
    pub text: String,
    /// Reference table in file order; the index is the reference id
    pub references: Vec<RawReference>,
}

/// Map a failed read into a crate error.
///
/// Readers layered over BGZF smuggle their own `BamError` through
/// `io::Error`; it is recovered here unchanged.
pub(crate) fn map_read_error(e: io::Error, what: &str) -> BamError {
    if let Some(inner) = e.get_ref().and_then(|r| r.downcast_ref::<BamError>()) {
        return inner.clone();
    }
    if e.kind() == io::ErrorKind::UnexpectedEof {
        return BamError::Truncated(format!("EOF while reading {}", what));
    }
    BamError::Io(e)
}

fn read_i32<R: Read>(reader: &mut R, what: &str) -> Result<i32> {
    let mut buf = [0u8; 4];
    reader
        .read_exact(&mut buf)
        .map_err(|e| map_read_error(e, what))?;
    Ok(i32::from_le_bytes(buf))
}

fn read_bytes<R: Read>(reader: &mut R, len: usize, what: &str) -> Result<Vec<u8>> {
    // take() keeps a corrupt length from pre-allocating gigabytes
    let mut buf = Vec::new();
    reader
        .by_ref()
        .take(len as u64)
        .read_to_end(&mut buf)
        .map_err(|e| map_read_error(e, what))?;
    if buf.len() < len {
        return Err(BamError::Truncated(format!(
            "EOF while reading {}: expected {} bytes, got {}",
            what,
            len,
            buf.len()
        )));
    }
    Ok(buf)
}

/// Read and validate BAM magic bytes.
pub fn read_magic<R: Read>(reader: &mut R) -> Result<()> {
    let mut magic = [0u8; 4];
    reader
        .read_exact(&mut magic)
        .map_err(|e| map_read_error(e, "BAM magic"))?;

    if &magic != BAM_MAGIC {
        return Err(BamError::Format(format!(
            "Invalid BAM magic: expected {:?}, got {:?}",
            BAM_MAGIC, magic
        )));
    }
    Ok(())
}

/// Read the length-prefixed SAM header text.
pub fn read_header_text<R: Read>(reader: &mut R) -> Result<String> {
    let len = read_i32(reader, "SAM header length")?;
    if len < 0 {
        return Err(BamError::Format(format!(
            "Invalid SAM header length: {}",
            len
        )));
    }

    let mut bytes = read_bytes(reader, len as usize, "SAM header text")?;
    while bytes.last() == Some(&0) {
        bytes.pop();
    }

    String::from_utf8(bytes)
        .map_err(|e| BamError::Format(format!("Invalid UTF-8 in SAM header: {}", e)))
}

/// Read one binary reference entry.
pub fn read_reference<R: Read>(reader: &mut R) -> Result<RawReference> {
    let name_len = read_i32(reader, "reference name length")?;
    if name_len <= 0 {
        return Err(BamError::Format(format!(
            "Invalid reference name length: {}",
            name_len
        )));
    }

    let mut name = read_bytes(reader, name_len as usize, "reference name")?;
    if name.pop() != Some(0) {
        return Err(BamError::Format(
            "Reference name not NUL-terminated".to_string(),
        ));
    }
    let name = String::from_utf8(name)
        .map_err(|e| BamError::Format(format!("Invalid UTF-8 in reference name: {}", e)))?;

    let length = read_i32(reader, "reference length")?;
    if length < 0 {
        return Err(BamError::Format(format!(
            "Invalid length {} for reference {}",
            length, name
        )));
    }

    Ok(RawReference {
        name,
        length: length as u32,
    })
}

/// Read the reference count and every reference entry.
pub fn read_references<R: Read>(reader: &mut R) -> Result<Vec<RawReference>> {
    let count = read_i32(reader, "reference count")?;
    if count < 0 {
        return Err(BamError::Format(format!(
            "Invalid reference count: {}",
            count
        )));
    }

    // Cap the pre-allocation; a corrupt count fails on read instead
    let mut references = Vec::with_capacity((count as usize).min(1 << 16));
    for i in 0..count {
        let reference = read_reference(reader).map_err(|e| match e {
            BamError::Format(m) => BamError::Format(format!("reference {}: {}", i, m)),
            other => other,
        })?;
        references.push(reference);
    }
    Ok(references)
}

/// Read magic, header text and reference table.
pub fn read_raw_header<R: Read>(reader: &mut R) -> Result<RawHeader> {
    read_magic(reader)?;
    let text = read_header_text(reader)?;
    let references = read_references(reader)?;
    Ok(RawHeader { text, references })
}
