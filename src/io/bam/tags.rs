//! BAM optional tags (auxiliary data).
//!
//! Optional tags store additional information about alignments such as:
//! - Edit distance (NM:i)
//! - Read group (RG:Z)
//! - Original base qualities (OQ:Z)
//! - Complete Genomics gap data (GC:Z, GS:Z, GQ:Z)
//!
//! # Format
//!
//! Each tag is encoded as:
//! - 2 bytes: tag name (e.g., "NM")
//! - 1 byte: value type (`A c C s S i I f d Z H B`)
//! - N bytes: value (format depends on type)
//!
//! The tag region is scanned once per record into a [`TagIndex`]: one
//! `(offset, length)` entry per tag, sorted by name for binary-search lookup.
//! Values are decoded on access, straight from the record bytes.

use super::error::DecodeError;
use std::ops::ControlFlow;

/// Location of one tag inside the record bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TagEntry {
    offset: u32,
    len: u32,
}

/// Name-sorted index of a record's optional tags.
///
/// Entries with the same name keep file order, so lookup of a duplicated
/// name returns the first occurrence in the record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagIndex {
    entries: Vec<TagEntry>,
}

fn element_size(subtype: u8) -> Option<usize> {
    match subtype {
        b'c' | b'C' | b'A' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        b'd' => Some(8),
        _ => None,
    }
}

/// Total encoded length (name + type + payload) of the tag at `pos`.
fn encoded_len(data: &[u8], pos: usize) -> Result<usize, DecodeError> {
    let rest = &data[pos..];
    if rest.len() < 3 {
        let mut tag = [0u8; 2];
        tag[..rest.len().min(2)].copy_from_slice(&rest[..rest.len().min(2)]);
        return Err(DecodeError::TruncatedTag { tag });
    }
    let tag = [rest[0], rest[1]];
    let type_code = rest[2];
    let payload = &rest[3..];

    let payload_len = match type_code {
        b'Z' | b'H' => match payload.iter().position(|&b| b == 0) {
            Some(nul) => nul + 1,
            None => return Err(DecodeError::UnterminatedString { tag }),
        },
        b'B' => {
            if payload.len() < 5 {
                return Err(DecodeError::TruncatedTag { tag });
            }
            let subtype = payload[0];
            let size = element_size(subtype)
                .filter(|_| subtype != b'A')
                .ok_or(DecodeError::InvalidArraySubtype { tag, subtype })?;
            let count = u32::from_le_bytes([payload[1], payload[2], payload[3], payload[4]]);
            (count as usize)
                .checked_mul(size)
                .and_then(|n| n.checked_add(5))
                .ok_or(DecodeError::TruncatedTag { tag })?
        }
        other => element_size(other).ok_or(DecodeError::InvalidTagType {
            tag,
            type_code: other,
        })?,
    };

    if payload_len > payload.len() {
        return Err(DecodeError::TruncatedTag { tag });
    }
    Ok(3 + payload_len)
}

impl TagIndex {
    /// Scan the tag region `data[start..]`.
    ///
    /// # Errors
    ///
    /// Unknown type codes, unterminated strings, and tags running past the
    /// end of `data` are rejected.
    pub fn build(data: &[u8], start: usize) -> Result<Self, DecodeError> {
        let mut entries = Vec::new();
        let mut pos = start;

        while pos < data.len() {
            let len = encoded_len(data, pos)?;
            entries.push(TagEntry {
                offset: pos as u32,
                len: len as u32,
            });
            pos += len;
        }

        // Stable: duplicates stay in file order
        entries.sort_by_key(|e| [data[e.offset as usize], data[e.offset as usize + 1]]);
        Ok(Self { entries })
    }

    /// Number of tags.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the record has no optional tags.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up a tag by name in the record bytes the index was built from.
    pub fn find<'a>(&self, data: &'a [u8], name: [u8; 2]) -> Option<Tag<'a>> {
        let name_at = |e: &TagEntry| [data[e.offset as usize], data[e.offset as usize + 1]];
        let i = self.entries.partition_point(|e| name_at(e) < name);
        self.entries
            .get(i)
            .filter(|e| name_at(e) == name)
            .map(|e| Tag::from_entry(data, *e))
    }

    /// Visit every tag in name order until `f` breaks.
    pub fn for_each<'a, B, F>(&self, data: &'a [u8], mut f: F) -> ControlFlow<B>
    where
        F: FnMut(Tag<'a>) -> ControlFlow<B>,
    {
        for e in &self.entries {
            f(Tag::from_entry(data, *e))?;
        }
        ControlFlow::Continue(())
    }
}

/// One optional tag, borrowed from its record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tag<'a> {
    name: [u8; 2],
    type_code: u8,
    value: TagValue<'a>,
    raw: &'a [u8],
}

impl<'a> Tag<'a> {
    fn from_entry(data: &'a [u8], e: TagEntry) -> Self {
        let raw = &data[e.offset as usize..(e.offset + e.len) as usize];
        let type_code = raw[2];
        Tag {
            name: [raw[0], raw[1]],
            type_code,
            value: TagValue::parse(type_code, &raw[3..]),
            raw,
        }
    }

    /// Two-character tag name.
    pub fn name(&self) -> [u8; 2] {
        self.name
    }

    /// Type code (`A c C s S i I f d Z H B`).
    pub fn type_code(&self) -> u8 {
        self.type_code
    }

    /// Decoded value.
    pub fn value(&self) -> TagValue<'a> {
        self.value
    }

    /// Encoded bytes, name and type included.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Integer value for `c C s S i I` tags that fits in `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self.value {
            TagValue::Int8(v) => Some(i32::from(v)),
            TagValue::UInt8(v) => Some(i32::from(v)),
            TagValue::Int16(v) => Some(i32::from(v)),
            TagValue::UInt16(v) => Some(i32::from(v)),
            TagValue::Int32(v) => Some(v),
            TagValue::UInt32(v) => i32::try_from(v).ok(),
            _ => None,
        }
    }

    /// String bytes (NUL excluded) for `Z` and `H` tags.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self.value {
            TagValue::String(s) | TagValue::Hex(s) => Some(s),
            _ => None,
        }
    }

    /// `Z` value as UTF-8.
    pub fn as_str(&self) -> Option<&'a str> {
        match self.value {
            TagValue::String(s) => std::str::from_utf8(s).ok(),
            _ => None,
        }
    }
}

/// Typed tag value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TagValue<'a> {
    /// `A`: printable character
    Char(u8),
    /// `c`
    Int8(i8),
    /// `C`
    UInt8(u8),
    /// `s`
    Int16(i16),
    /// `S`
    UInt16(u16),
    /// `i`
    Int32(i32),
    /// `I`
    UInt32(u32),
    /// `f`
    Float(f32),
    /// `d`
    Double(f64),
    /// `Z`: string, NUL excluded
    String(&'a [u8]),
    /// `H`: hex string, NUL excluded
    Hex(&'a [u8]),
    /// `B`: numeric array
    Array(ArrayValue<'a>),
}

impl<'a> TagValue<'a> {
    // Payload sizes were validated when the index was built
    fn parse(type_code: u8, p: &'a [u8]) -> Self {
        match type_code {
            b'A' => TagValue::Char(p[0]),
            b'c' => TagValue::Int8(p[0] as i8),
            b'C' => TagValue::UInt8(p[0]),
            b's' => TagValue::Int16(i16::from_le_bytes([p[0], p[1]])),
            b'S' => TagValue::UInt16(u16::from_le_bytes([p[0], p[1]])),
            b'i' => TagValue::Int32(i32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            b'I' => TagValue::UInt32(u32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            b'f' => TagValue::Float(f32::from_le_bytes([p[0], p[1], p[2], p[3]])),
            b'd' => TagValue::Double(f64::from_le_bytes([
                p[0], p[1], p[2], p[3], p[4], p[5], p[6], p[7],
            ])),
            b'Z' => TagValue::String(&p[..p.len() - 1]),
            b'H' => TagValue::Hex(&p[..p.len() - 1]),
            _ => {
                let count = u32::from_le_bytes([p[1], p[2], p[3], p[4]]) as usize;
                TagValue::Array(ArrayValue {
                    subtype: p[0],
                    count,
                    data: &p[5..],
                })
            }
        }
    }
}

/// Numeric array payload of a `B` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayValue<'a> {
    subtype: u8,
    count: usize,
    data: &'a [u8],
}

impl<'a> ArrayValue<'a> {
    /// Element type code (`c C s S i I f`).
    pub fn subtype(&self) -> u8 {
        self.subtype
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.count
    }

    /// True for a zero-length array.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Packed little-endian elements.
    pub fn raw(&self) -> &'a [u8] {
        self.data
    }

    /// Integer element `i`; `None` for float arrays or out of range.
    pub fn get_int(&self, i: usize) -> Option<i64> {
        if i >= self.count {
            return None;
        }
        let d = self.data;
        let v = match self.subtype {
            b'c' => i64::from(d[i] as i8),
            b'C' => i64::from(d[i]),
            b's' => i64::from(i16::from_le_bytes([d[2 * i], d[2 * i + 1]])),
            b'S' => i64::from(u16::from_le_bytes([d[2 * i], d[2 * i + 1]])),
            b'i' => i64::from(i32::from_le_bytes([d[4 * i], d[4 * i + 1], d[4 * i + 2], d[4 * i + 3]])),
            b'I' => i64::from(u32::from_le_bytes([d[4 * i], d[4 * i + 1], d[4 * i + 2], d[4 * i + 3]])),
            _ => return None,
        };
        Some(v)
    }

    /// Float element `i` of an `f` array.
    pub fn get_float(&self, i: usize) -> Option<f32> {
        if self.subtype != b'f' || i >= self.count {
            return None;
        }
        let d = &self.data[4 * i..4 * i + 4];
        Some(f32::from_le_bytes([d[0], d[1], d[2], d[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn tag_i(name: &[u8; 2], v: i32) -> Vec<u8> {
        let mut t = vec![name[0], name[1], b'i'];
        t.extend_from_slice(&v.to_le_bytes());
        t
    }

    fn tag_z(name: &[u8; 2], s: &str) -> Vec<u8> {
        let mut t = vec![name[0], name[1], b'Z'];
        t.extend_from_slice(s.as_bytes());
        t.push(0);
        t
    }

    #[test]
    fn test_empty_region() {
        let idx = TagIndex::build(&[1, 2, 3], 3).unwrap();
        assert!(idx.is_empty());
        assert!(idx.find(&[1, 2, 3], *b"NM").is_none());
    }

    #[test]
    fn test_lookup_each_type() {
        let mut data = vec![0xAA; 4]; // unrelated prefix
        data.extend_from_slice(&[b'X', b'A', b'A', b'q']);
        data.extend_from_slice(&[b'X', b'c', b'c', 0xFE]);
        data.extend_from_slice(&[b'X', b's', b'S', 0x10, 0x27]);
        data.extend_from_slice(&tag_i(b"NM", 3));
        data.extend_from_slice(&[b'X', b'f', b'f']);
        data.extend_from_slice(&1.5f32.to_le_bytes());
        data.extend_from_slice(&tag_z(b"RG", "grp1"));
        data.extend_from_slice(&[b'X', b'H', b'H', b'1', b'A', 0]);
        data.extend_from_slice(&[b'X', b'B', b'B', b's', 2, 0, 0, 0, 0xFF, 0xFF, 7, 0]);

        let idx = TagIndex::build(&data, 4).unwrap();
        assert_eq!(idx.len(), 8);

        assert_eq!(idx.find(&data, *b"XA").unwrap().value(), TagValue::Char(b'q'));
        assert_eq!(idx.find(&data, *b"Xc").unwrap().as_i32(), Some(-2));
        assert_eq!(idx.find(&data, *b"Xs").unwrap().as_i32(), Some(10000));
        assert_eq!(idx.find(&data, *b"NM").unwrap().as_i32(), Some(3));
        assert_eq!(idx.find(&data, *b"Xf").unwrap().value(), TagValue::Float(1.5));
        assert_eq!(idx.find(&data, *b"Xf").unwrap().as_i32(), None);
        assert_eq!(idx.find(&data, *b"RG").unwrap().as_str(), Some("grp1"));
        assert_eq!(idx.find(&data, *b"XH").unwrap().as_bytes(), Some(&b"1A"[..]));

        match idx.find(&data, *b"XB").unwrap().value() {
            TagValue::Array(a) => {
                assert_eq!(a.len(), 2);
                assert_eq!(a.get_int(0), Some(-1));
                assert_eq!(a.get_int(1), Some(7));
                assert_eq!(a.get_int(2), None);
            }
            other => panic!("expected array, got {other:?}"),
        }
        assert!(idx.find(&data, *b"ZZ").is_none());
    }

    #[test]
    fn test_duplicate_name_first_in_file_wins() {
        let mut data = tag_i(b"NM", 1);
        data.extend_from_slice(&tag_z(b"AS", "x"));
        data.extend_from_slice(&tag_i(b"NM", 2));
        let idx = TagIndex::build(&data, 0).unwrap();
        assert_eq!(idx.find(&data, *b"NM").unwrap().as_i32(), Some(1));
    }

    #[test]
    fn test_for_each_sorted_and_breakable() {
        let mut data = tag_i(b"ZB", 1);
        data.extend_from_slice(&tag_i(b"AA", 2));
        data.extend_from_slice(&tag_i(b"MM", 3));
        let idx = TagIndex::build(&data, 0).unwrap();

        let mut names = Vec::new();
        let flow = idx.for_each(&data, |t| {
            names.push(t.name());
            ControlFlow::<()>::Continue(())
        });
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(names, vec![*b"AA", *b"MM", *b"ZB"]);

        let found = idx.for_each(&data, |t| match t.as_i32() {
            Some(3) => ControlFlow::Break(t.name()),
            _ => ControlFlow::Continue(()),
        });
        assert_eq!(found, ControlFlow::Break(*b"MM"));
    }

    #[test]
    fn test_unterminated_string() {
        let data = [b'R', b'G', b'Z', b'a', b'b'];
        assert_eq!(
            TagIndex::build(&data, 0),
            Err(DecodeError::UnterminatedString { tag: *b"RG" })
        );
    }

    #[test]
    fn test_invalid_type_and_subtype() {
        let data = [b'X', b'X', b'q', 0];
        assert!(matches!(
            TagIndex::build(&data, 0),
            Err(DecodeError::InvalidTagType { type_code: b'q', .. })
        ));

        let data = [b'X', b'X', b'B', b'Z', 0, 0, 0, 0];
        assert!(matches!(
            TagIndex::build(&data, 0),
            Err(DecodeError::InvalidArraySubtype { subtype: b'Z', .. })
        ));
    }

    #[test]
    fn test_truncated_payloads() {
        let data = [b'N', b'M', b'i', 1, 0];
        assert_eq!(
            TagIndex::build(&data, 0),
            Err(DecodeError::TruncatedTag { tag: *b"NM" })
        );
        let data = [b'N'];
        assert!(matches!(
            TagIndex::build(&data, 0),
            Err(DecodeError::TruncatedTag { .. })
        ));
        // Array count claims more elements than present
        let data = [b'X', b'B', b'B', b'i', 3, 0, 0, 0, 1, 0, 0, 0];
        assert!(matches!(
            TagIndex::build(&data, 0),
            Err(DecodeError::TruncatedTag { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_lookup_exact(
            names in prop::collection::vec(("[A-Za-z]", "[A-Za-z0-9]"), 0..20),
            wanted in ("[A-Za-z]", "[A-Za-z0-9]"),
        ) {
            let names: Vec<[u8; 2]> = names
                .iter()
                .map(|(a, b)| [a.as_bytes()[0], b.as_bytes()[0]])
                .collect();
            let mut data = Vec::new();
            for (i, n) in names.iter().enumerate() {
                data.extend_from_slice(&tag_i(n, i as i32));
            }
            let idx = TagIndex::build(&data, 0).unwrap();

            for (i, n) in names.iter().enumerate() {
                let tag = idx.find(&data, *n).unwrap();
                prop_assert_eq!(tag.name(), *n);
                let first = names.iter().position(|m| m == n).unwrap();
                prop_assert_eq!(tag.as_i32(), Some(first as i32));
                prop_assert!(first <= i);
            }

            let wanted = [wanted.0.as_bytes()[0], wanted.1.as_bytes()[0]];
            prop_assert_eq!(idx.find(&data, wanted).is_some(), names.contains(&wanted));
        }
    }
}
