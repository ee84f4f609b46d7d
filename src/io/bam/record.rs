//! BAM alignment records.
//!
//! A [`Record`] is a view over one record's bytes (everything after the
//! `block_size` prefix). The fixed fields, CIGAR and tag layout are
//! validated once when the view is built; field accessors then decode on
//! demand straight from the bytes.
//!
//! # Binary Format
//!
//! ```text
//! BAM Record (binary, little-endian):
//! - block_size (int32): Total record size in bytes (excluding this field)
//! - refID (int32): Reference sequence ID (-1 for unmapped)
//! - pos (int32): 0-based leftmost position (-1 for unmapped)
//! - l_read_name (uint8): Length of read name (includes null terminator)
//! - mapq (uint8): Mapping quality (255 = unavailable)
//! - bin (uint16): BAI index bin (for indexing)
//! - n_cigar_op (uint16): Number of CIGAR operations
//! - flag (uint16): Bitwise FLAGS
//! - l_seq (int32): Sequence length
//! - next_refID (int32): Reference ID of mate/next read
//! - next_pos (int32): Position of mate/next read
//! - tlen (int32): Template length
//! - read_name (char[l_read_name]): Null-terminated read name
//! - cigar (uint32[n_cigar_op]): CIGAR operations
//! - seq (uint8[(l_seq+1)/2]): 4-bit encoded sequence
//! - qual (char[l_seq]): Phred quality scores
//! - tags: Optional tags (variable length)
//! ```
//!
//! # Ownership
//!
//! Records read from a [`BamFile`](super::BamFile) borrow the file's
//! decode buffer when the record lies inside one BGZF block, and own a
//! private copy when it straddles blocks. A borrowed record must be dropped
//! or converted with [`Record::into_owned`] before the next read; the
//! borrow checker enforces this.

use super::cigar::{self, AlignmentDetails, CigarOp};
use super::error::DecodeError;
use super::sequence::{decode_base, decode_range_into};
use super::tags::{Tag, TagIndex};
use crate::error::{BamError, Result};
use std::borrow::Cow;
use std::ops::ControlFlow;

/// Size of the fixed-width prefix.
const FIXED_LEN: usize = 32;

/// Flag: segment unmapped.
pub const FLAG_UNMAPPED: u16 = 0x4;
/// Flag: SEQ is reverse complemented.
pub const FLAG_REVERSE: u16 = 0x10;

fn i32_at(data: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn u16_at(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

/// Quality values together with the ASCII offset they are stored with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qualities<'r> {
    /// Stored values
    pub values: &'r [u8],
    /// Subtract this to get Phred scores (0 for binary, 33 for text tags)
    pub offset: u8,
}

impl Qualities<'_> {
    /// Phred scores with the offset removed.
    pub fn to_phred(&self) -> Vec<u8> {
        self.values
            .iter()
            .map(|q| q.saturating_sub(self.offset))
            .collect()
    }
}

/// One alignment record.
#[derive(Debug, Clone)]
pub struct Record<'a> {
    data: Cow<'a, [u8]>,
    cigar_offset: usize,
    seq_offset: usize,
    qual_offset: usize,
    tags_offset: usize,
    tags: TagIndex,
}

impl<'a> Record<'a> {
    /// View `data` (a record without its `block_size` prefix) in place.
    pub fn parse(data: &'a [u8]) -> std::result::Result<Self, DecodeError> {
        Self::new(Cow::Borrowed(data))
    }

    /// Build a record from borrowed or owned bytes.
    ///
    /// # Errors
    ///
    /// Rejects records whose sections run past the end of `data`, CIGAR
    /// ops outside `MIDNSHP=X`, and malformed optional tags.
    pub fn new(data: Cow<'a, [u8]>) -> std::result::Result<Self, DecodeError> {
        let len = data.len();
        if len < FIXED_LEN {
            return Err(DecodeError::RecordTooShort { length: len });
        }

        let name_len = data[8] as usize;
        if name_len == 0 {
            return Err(DecodeError::InvalidReadNameLength);
        }
        let read_len = i32_at(&data, 16);
        if read_len < 0 {
            return Err(DecodeError::NegativeSequenceLength { length: read_len });
        }
        let read_len = read_len as usize;
        let n_cigar = u16_at(&data, 12) as usize;

        let check = |section: &'static str, end: usize| {
            if end > len {
                Err(DecodeError::SectionOverrun {
                    section,
                    end,
                    length: len,
                })
            } else {
                Ok(end)
            }
        };
        let cigar_offset = check("read name", FIXED_LEN + name_len)?;
        let seq_offset = check("CIGAR", cigar_offset + 4 * n_cigar)?;
        let qual_offset = check("sequence", seq_offset + read_len.div_ceil(2))?;
        let tags_offset = check("quality", qual_offset + read_len)?;

        for raw in data[cigar_offset..seq_offset].chunks_exact(4) {
            CigarOp::from_raw(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))?;
        }
        let tags = TagIndex::build(&data, tags_offset)?;

        Ok(Record {
            data,
            cigar_offset,
            seq_offset,
            qual_offset,
            tags_offset,
            tags,
        })
    }

    /// Detach from the file's decode buffer.
    pub fn into_owned(self) -> Record<'static> {
        Record {
            data: Cow::Owned(self.data.into_owned()),
            cigar_offset: self.cigar_offset,
            seq_offset: self.seq_offset,
            qual_offset: self.qual_offset,
            tags_offset: self.tags_offset,
            tags: self.tags,
        }
    }

    /// True while the record aliases a decode buffer.
    pub fn is_borrowed(&self) -> bool {
        matches!(self.data, Cow::Borrowed(_))
    }

    /// Record bytes (without the `block_size` prefix).
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Reference id, -1 when unplaced.
    pub fn reference_id(&self) -> i32 {
        i32_at(&self.data, 0)
    }

    /// 0-based leftmost position, -1 when unplaced.
    pub fn position(&self) -> i32 {
        i32_at(&self.data, 4)
    }

    /// Mapping quality (255 = unavailable).
    pub fn mapping_quality(&self) -> u8 {
        self.data[9]
    }

    /// BAI bin.
    pub fn bin(&self) -> u16 {
        u16_at(&self.data, 10)
    }

    /// Number of CIGAR ops.
    pub fn cigar_count(&self) -> usize {
        u16_at(&self.data, 12) as usize
    }

    /// SAM flags.
    pub fn flags(&self) -> u16 {
        u16_at(&self.data, 14)
    }

    /// Read length in bases.
    pub fn read_len(&self) -> usize {
        self.tags_offset - self.qual_offset
    }

    /// Mate reference id.
    pub fn mate_reference_id(&self) -> i32 {
        i32_at(&self.data, 20)
    }

    /// Mate 0-based position.
    pub fn mate_position(&self) -> i32 {
        i32_at(&self.data, 24)
    }

    /// Observed template length.
    pub fn insert_size(&self) -> i32 {
        i32_at(&self.data, 28)
    }

    /// Read name without its NUL terminator.
    pub fn read_name(&self) -> &[u8] {
        let name = &self.data[FIXED_LEN..self.cigar_offset];
        name.strip_suffix(&[0]).unwrap_or(name)
    }

    /// Flag 0x4 clear and placed on a reference.
    pub fn is_mapped(&self) -> bool {
        self.flags() & FLAG_UNMAPPED == 0 && self.reference_id() >= 0 && self.position() >= 0
    }

    /// Flag 0x10 set.
    pub fn is_reverse(&self) -> bool {
        self.flags() & FLAG_REVERSE != 0
    }

    /// Packed CIGAR element `i` (`length << 4 | code`).
    pub fn cigar_raw(&self, i: usize) -> u32 {
        let at = self.cigar_offset + 4 * i;
        u32::from_le_bytes([
            self.data[at],
            self.data[at + 1],
            self.data[at + 2],
            self.data[at + 3],
        ])
    }

    /// CIGAR ops in order. Codes were validated when the record was built.
    pub fn cigar_ops(&self) -> impl Iterator<Item = CigarOp> + '_ {
        (0..self.cigar_count()).filter_map(move |i| CigarOp::from_raw(self.cigar_raw(i)).ok())
    }

    /// CIGAR ops collected.
    pub fn cigar(&self) -> Vec<CigarOp> {
        self.cigar_ops().collect()
    }

    /// Bases covered on the reference (M, D, N, =, X).
    pub fn reference_span(&self) -> u64 {
        self.cigar_ops()
            .filter(|op| op.consumes_reference())
            .map(|op| u64::from(op.length()))
            .sum()
    }

    /// Read bases accounted for by the CIGAR (M, I, S, =, X).
    pub fn query_length(&self) -> u64 {
        self.cigar_ops()
            .filter(|op| op.consumes_query())
            .map(|op| u64::from(op.length()))
            .sum()
    }

    /// Position and reference span, or `None` when unplaced.
    pub fn position_and_span(&self) -> Option<(i32, u64)> {
        let pos = self.position();
        (pos >= 0).then(|| (pos, self.reference_span()))
    }

    /// Exclusive end coordinate on the reference (`position + span`).
    pub fn end_position(&self) -> i64 {
        i64::from(self.position()) + self.reference_span() as i64
    }

    /// Where each CIGAR op starts on the reference and the read.
    pub fn alignment_detail(&self) -> Result<AlignmentDetails> {
        let ops = self.cigar();
        Ok(cigar::alignment_detail(&ops, self.position(), self.read_len())?)
    }

    /// Packed 4-bit sequence bytes.
    pub fn sequence_raw(&self) -> &[u8] {
        &self.data[self.seq_offset..self.qual_offset]
    }

    /// Whole read sequence as IUPAC letters.
    pub fn sequence(&self) -> Vec<u8> {
        self.sequence_range(0, 0)
    }

    /// Bases `start..stop`; `stop` of 0 or past the end means the read end.
    pub fn sequence_range(&self, start: usize, stop: usize) -> Vec<u8> {
        let n = self.read_len();
        let stop = if stop == 0 || stop > n { n } else { stop };
        let mut out = Vec::new();
        if start < stop {
            decode_range_into(self.sequence_raw(), start, stop, &mut out);
        }
        out
    }

    /// Base at read offset `i`.
    pub fn base(&self, i: usize) -> Option<u8> {
        (i < self.read_len()).then(|| decode_base(self.sequence_raw(), i))
    }

    /// Binary Phred qualities (0xFF throughout when absent).
    pub fn quality(&self) -> &[u8] {
        &self.data[self.qual_offset..self.tags_offset]
    }

    /// `OQ:Z` original qualities when present, else the record qualities.
    ///
    /// # Errors
    ///
    /// An `OQ` value whose length differs from the read length is
    /// [`BamError::Inconsistent`].
    pub fn original_quality(&self) -> Result<Qualities<'_>> {
        match self.tag(*b"OQ").and_then(|t| t.as_bytes()) {
            Some(oq) if oq.len() == self.read_len() => Ok(Qualities {
                values: oq,
                offset: 33,
            }),
            Some(oq) => Err(BamError::Inconsistent(format!(
                "OQ has {} values for a read of length {}",
                oq.len(),
                self.read_len()
            ))),
            None => Ok(Qualities {
                values: self.quality(),
                offset: 0,
            }),
        }
    }

    /// Record carries a `CS` color-space read.
    pub fn has_color_space(&self) -> bool {
        self.color_space().is_some()
    }

    fn color_space(&self) -> Option<&[u8]> {
        self.tag(*b"CS").and_then(|t| t.as_bytes())
    }

    /// Primer base of the color-space read.
    pub fn cs_key(&self) -> Option<u8> {
        self.color_space().and_then(|cs| cs.first().copied())
    }

    /// Color calls after the key, with `'4'` written as `'.'`.
    pub fn cs_sequence(&self) -> Option<Vec<u8>> {
        self.color_space().map(|cs| {
            cs.iter()
                .skip(1)
                .map(|&c| if c == b'4' { b'.' } else { c })
                .collect()
        })
    }

    /// `CQ` qualities aligned to [`cs_sequence`](Self::cs_sequence), or the
    /// record qualities when there is no color-space data.
    ///
    /// # Errors
    ///
    /// `CQ` must have as many values as `CS` (first one is skipped) or one
    /// fewer; anything else is [`BamError::Inconsistent`].
    pub fn cs_quality(&self) -> Result<Qualities<'_>> {
        let cq = self.tag(*b"CQ").and_then(|t| t.as_bytes());
        match (self.color_space(), cq) {
            (Some(cs), Some(cq)) if cs.len() == cq.len() => Ok(Qualities {
                values: cq.get(1..).unwrap_or_default(),
                offset: 33,
            }),
            (Some(cs), Some(cq)) if cs.len() == cq.len() + 1 => Ok(Qualities {
                values: cq,
                offset: 33,
            }),
            (Some(cs), Some(cq)) => Err(BamError::Inconsistent(format!(
                "CQ has {} values but CS has {}",
                cq.len(),
                cs.len()
            ))),
            _ => Ok(Qualities {
                values: self.quality(),
                offset: 0,
            }),
        }
    }

    /// Optional tag by name. For a repeated name the first in the record wins.
    pub fn tag(&self, name: [u8; 2]) -> Option<Tag<'_>> {
        self.tags.find(&self.data, name)
    }

    /// Tag index of this record.
    pub fn tags(&self) -> &TagIndex {
        &self.tags
    }

    /// Visit every tag in name order until `f` breaks.
    pub fn for_each_tag<'s, B, F>(&'s self, f: F) -> ControlFlow<B>
    where
        F: FnMut(Tag<'s>) -> ControlFlow<B>,
    {
        self.tags.for_each(&self.data, f)
    }

    /// `RG:Z` read group name.
    pub fn read_group(&self) -> Option<&str> {
        self.tag(*b"RG").and_then(|t| t.as_str())
    }

    /// Trace id from an `XT:Z:ti|<number>` tag.
    pub fn ti(&self) -> Option<u64> {
        let xt = self.tag(*b"XT")?.as_str()?;
        let digits = xt.strip_prefix("ti|")?;
        let end = digits
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(digits.len());
        digits[..end].parse().ok()
    }

    /// `GC`, `GS` and `GQ` are all present.
    pub fn has_cg_data(&self) -> bool {
        [*b"GC", *b"GS", *b"GQ"]
            .iter()
            .all(|name| self.tag(*name).is_some())
    }

    /// Complete Genomics alignment group `"<ZI>_<ZA>"`.
    pub fn cg_align_group(&self) -> Option<String> {
        let za = self.tag(*b"ZA")?.as_i32()?;
        let zi = self.tag(*b"ZI")?.as_i32()?;
        Some(format!("{}_{}", zi, za))
    }
}

impl Record<'static> {
    /// Take ownership of record bytes.
    pub fn from_vec(data: Vec<u8>) -> std::result::Result<Self, DecodeError> {
        Record::new(Cow::Owned(data))
    }
}
