//! CIGAR (Compact Idiosyncratic Gapped Alignment Report) decoding.
//!
//! CIGAR strings describe how a read aligns to the reference, including
//! matches, insertions, deletions, and other operations.
//!
//! # BAM Format
//!
//! In BAM, CIGAR is stored as 32-bit integers:
//! - Low 4 bits: operation type (0-8, indexing `MIDNSHP=X`)
//! - High 28 bits: operation length (0 to 268,435,455)
//!
//! # Operations
//!
//! - M: Match/mismatch (alignment match, can include mismatches)
//! - I: Insertion to reference
//! - D: Deletion from reference
//! - N: Skipped region from reference (intron for RNA-seq)
//! - S: Soft clipping (bases present in read, not in alignment)
//! - H: Hard clipping (bases not present in read)
//! - P: Padding (silent deletion from padded reference)
//! - =: Sequence match (bases match reference)
//! - X: Sequence mismatch (bases don't match reference)
//! - B: Backwards overlap. Never decoded from a record; produced only by
//!   the Complete Genomics expansion in [`cg`](super::cg).

use super::error::DecodeError;
use std::fmt;

/// Op characters indexed by op code. Codes 0-8 are valid in records.
pub const CIGAR_OP_CHARS: &[u8; 10] = b"MIDNSHP=XB";

/// Number of op codes a record may carry.
const RECORD_OP_CODES: u32 = 9;

/// CIGAR operation types.
///
/// Each operation describes a type of alignment event and its length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CigarOp {
    /// Match or mismatch (M)
    Match(u32),
    /// Insertion to reference (I)
    Insertion(u32),
    /// Deletion from reference (D)
    Deletion(u32),
    /// Skipped region from reference (N)
    RefSkip(u32),
    /// Soft clipping (S)
    SoftClip(u32),
    /// Hard clipping (H)
    HardClip(u32),
    /// Padding (P)
    Padding(u32),
    /// Sequence match (=)
    SeqMatch(u32),
    /// Sequence mismatch (X)
    SeqMismatch(u32),
    /// Backwards overlap (B)
    Back(u32),
}

impl CigarOp {
    /// Build an op from its code (0-9, indexing [`CIGAR_OP_CHARS`]) and length.
    pub fn new(code: u32, length: u32) -> Option<Self> {
        let op = match code {
            0 => CigarOp::Match(length),
            1 => CigarOp::Insertion(length),
            2 => CigarOp::Deletion(length),
            3 => CigarOp::RefSkip(length),
            4 => CigarOp::SoftClip(length),
            5 => CigarOp::HardClip(length),
            6 => CigarOp::Padding(length),
            7 => CigarOp::SeqMatch(length),
            8 => CigarOp::SeqMismatch(length),
            9 => CigarOp::Back(length),
            _ => return None,
        };
        Some(op)
    }

    /// Decode one packed record element (`length << 4 | code`).
    ///
    /// # Errors
    ///
    /// Op codes outside `MIDNSHP=X` are rejected.
    ///
    /// # Example
    ///
    /// ```
    /// use bamread::io::bam::CigarOp;
    ///
    /// // 100M = 100 << 4 | 0
    /// assert_eq!(CigarOp::from_raw(1600).unwrap(), CigarOp::Match(100));
    /// assert!(CigarOp::from_raw(0x19).is_err());
    /// ```
    pub fn from_raw(raw: u32) -> Result<Self, DecodeError> {
        let code = raw & 0x0F;
        if code >= RECORD_OP_CODES {
            return Err(DecodeError::InvalidCigarOp { value: code });
        }
        CigarOp::new(code, raw >> 4).ok_or(DecodeError::InvalidCigarOp { value: code })
    }

    /// Packed form (`length << 4 | code`).
    pub fn to_raw(&self) -> u32 {
        (self.length() << 4) | self.code()
    }

    /// Op code (index into [`CIGAR_OP_CHARS`]).
    pub fn code(&self) -> u32 {
        match self {
            CigarOp::Match(_) => 0,
            CigarOp::Insertion(_) => 1,
            CigarOp::Deletion(_) => 2,
            CigarOp::RefSkip(_) => 3,
            CigarOp::SoftClip(_) => 4,
            CigarOp::HardClip(_) => 5,
            CigarOp::Padding(_) => 6,
            CigarOp::SeqMatch(_) => 7,
            CigarOp::SeqMismatch(_) => 8,
            CigarOp::Back(_) => 9,
        }
    }

    /// Get the operation count/length.
    pub fn length(&self) -> u32 {
        match *self {
            CigarOp::Match(len)
            | CigarOp::Insertion(len)
            | CigarOp::Deletion(len)
            | CigarOp::RefSkip(len)
            | CigarOp::SoftClip(len)
            | CigarOp::HardClip(len)
            | CigarOp::Padding(len)
            | CigarOp::SeqMatch(len)
            | CigarOp::SeqMismatch(len)
            | CigarOp::Back(len) => len,
        }
    }

    /// Same op type with a different length.
    pub fn with_length(&self, length: u32) -> Self {
        // Codes come from an existing op, so they are always in range
        CigarOp::new(self.code(), length).unwrap_or(CigarOp::Match(length))
    }

    /// Check if this operation has zero length.
    pub fn is_empty(&self) -> bool {
        self.length() == 0
    }

    /// Get the operation type as a character (for SAM format).
    pub fn as_char(&self) -> char {
        CIGAR_OP_CHARS[self.code() as usize] as char
    }

    /// M, D, N, = and X advance along the reference.
    pub fn consumes_reference(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Deletion(_)
                | CigarOp::RefSkip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// M, I, S, = and X advance along the read.
    pub fn consumes_query(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_)
                | CigarOp::Insertion(_)
                | CigarOp::SoftClip(_)
                | CigarOp::SeqMatch(_)
                | CigarOp::SeqMismatch(_)
        )
    }

    /// M, = and X: read and reference bases are aligned.
    pub fn is_alignment_match(&self) -> bool {
        matches!(
            self,
            CigarOp::Match(_) | CigarOp::SeqMatch(_) | CigarOp::SeqMismatch(_)
        )
    }
}

impl fmt::Display for CigarOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.length(), self.as_char())
    }
}

/// Sum of lengths of reference-consuming ops (M, D, N, =, X).
pub fn reference_span(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_reference())
        .map(|op| u64::from(op.length()))
        .sum()
}

/// Sum of lengths of query-consuming ops (M, I, S, =, X).
pub fn query_length(ops: &[CigarOp]) -> u64 {
    ops.iter()
        .filter(|op| op.consumes_query())
        .map(|op| u64::from(op.length()))
        .sum()
}

/// Where one CIGAR op starts on the reference and on the read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentDetail {
    /// The op
    pub op: CigarOp,
    /// 0-based reference coordinate where the op starts (`None` for H and P)
    pub reference_position: Option<i64>,
    /// 0-based read offset where the op starts (`None` for H and P)
    pub read_position: Option<u64>,
}

/// Per-op placement of a whole alignment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlignmentDetails {
    /// One entry per CIGAR op, in order
    pub ops: Vec<AlignmentDetail>,
    /// Index of the first M/=/X op
    pub first_match: Option<usize>,
    /// Index of the last M/=/X op
    pub last_match: Option<usize>,
}

/// Walk a CIGAR from `position`, recording where each op starts.
///
/// Unplaced alignments (`position < 0`) yield no ops.
///
/// # Errors
///
/// An op starting beyond `read_len` on the read means the CIGAR and the
/// sequence disagree.
pub fn alignment_detail(
    ops: &[CigarOp],
    position: i32,
    read_len: usize,
) -> Result<AlignmentDetails, DecodeError> {
    let mut details = AlignmentDetails::default();
    if position < 0 {
        return Ok(details);
    }

    let mut ref_pos = i64::from(position);
    let mut read_pos = 0u64;
    details.ops.reserve(ops.len());

    for (i, op) in ops.iter().enumerate() {
        if read_pos > read_len as u64 {
            return Err(DecodeError::ReadPositionOutOfRange {
                op_index: i,
                read_pos,
                read_len,
            });
        }

        let placed = !matches!(op, CigarOp::HardClip(_) | CigarOp::Padding(_));
        details.ops.push(AlignmentDetail {
            op: *op,
            reference_position: placed.then_some(ref_pos),
            read_position: placed.then_some(read_pos),
        });

        if op.is_alignment_match() {
            details.first_match.get_or_insert(i);
            details.last_match = Some(i);
        }
        if op.consumes_reference() {
            ref_pos += i64::from(op.length());
        }
        if op.consumes_query() {
            read_pos += u64::from(op.length());
        }
    }

    Ok(details)
}
