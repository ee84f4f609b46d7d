//! Record-level decode errors.
//!
//! These describe why one alignment record could not be interpreted. They
//! are wrapped into [`BamError::Decode`](crate::BamError::Decode) when they
//! cross the file API.

use std::{error, fmt};

/// Errors that can occur while decoding a single BAM record.
///
/// # Example
///
/// ```
/// use bamread::io::bam::error::DecodeError;
///
/// fn describe(err: &DecodeError) -> String {
///     match err {
///         DecodeError::InvalidCigarOp { value } => format!("bad CIGAR code {}", value),
///         DecodeError::InvalidTagType { tag, .. } => {
///             format!("bad tag {}{}", tag[0] as char, tag[1] as char)
///         }
///         other => other.to_string(),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// Record length prefix is zero or negative
    InvalidBlockSize {
        /// The declared size
        size: i32,
    },

    /// Record is shorter than its fixed 32-byte prefix
    RecordTooShort {
        /// Actual record length
        length: usize,
    },

    /// A variable-length section extends past the end of the record
    SectionOverrun {
        /// Section name ("CIGAR", "sequence", ...)
        section: &'static str,
        /// Offset at which the section ends
        end: usize,
        /// Record length
        length: usize,
    },

    /// Read name length of zero (the NUL terminator is always counted)
    InvalidReadNameLength,

    /// Negative read length
    NegativeSequenceLength {
        /// The declared length
        length: i32,
    },

    /// CIGAR op code outside `MIDNSHP=X`
    InvalidCigarOp {
        /// The op code (low 4 bits)
        value: u32,
    },

    /// Unknown optional tag type code
    InvalidTagType {
        /// The tag name
        tag: [u8; 2],
        /// The type code
        type_code: u8,
    },

    /// Unknown element type inside a `B` array tag
    InvalidArraySubtype {
        /// The tag name
        tag: [u8; 2],
        /// The subtype code
        subtype: u8,
    },

    /// Tag payload extends past the end of the record
    TruncatedTag {
        /// The tag name (zeroed if the name itself is cut short)
        tag: [u8; 2],
    },

    /// `Z` or `H` tag without a NUL terminator
    UnterminatedString {
        /// The tag name
        tag: [u8; 2],
    },

    /// A CIGAR walk placed the read cursor beyond the read length
    ReadPositionOutOfRange {
        /// CIGAR op index
        op_index: usize,
        /// Read position reached
        read_pos: u64,
        /// Read length
        read_len: usize,
    },
}

impl error::Error for DecodeError {}

fn tag_str(tag: &[u8; 2]) -> String {
    format!("{}{}", tag[0] as char, tag[1] as char)
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBlockSize { size } => {
                write!(f, "Invalid record block size: {} (must be > 0)", size)
            }

            Self::RecordTooShort { length } => {
                write!(
                    f,
                    "Record too short: {} bytes (fixed fields need 32)",
                    length
                )
            }

            Self::SectionOverrun {
                section,
                end,
                length,
            } => {
                write!(
                    f,
                    "Record {} section ends at byte {} but record is {} bytes",
                    section, end, length
                )
            }

            Self::InvalidReadNameLength => {
                write!(f, "Invalid read name length: 0 (must be >= 1)")
            }

            Self::NegativeSequenceLength { length } => {
                write!(f, "Invalid negative sequence length: {}", length)
            }

            Self::InvalidCigarOp { value } => {
                write!(f, "Invalid CIGAR operation code: {}", value)
            }

            Self::InvalidTagType { tag, type_code } => {
                write!(
                    f,
                    "Invalid tag type for {}: {:?}",
                    tag_str(tag),
                    *type_code as char
                )
            }

            Self::InvalidArraySubtype { tag, subtype } => {
                write!(
                    f,
                    "Invalid array subtype for {}: {:?}",
                    tag_str(tag),
                    *subtype as char
                )
            }

            Self::TruncatedTag { tag } => {
                write!(f, "Tag {} extends past end of record", tag_str(tag))
            }

            Self::UnterminatedString { tag } => {
                write!(f, "Missing NUL terminator in tag {}", tag_str(tag))
            }

            Self::ReadPositionOutOfRange {
                op_index,
                read_pos,
                read_len,
            } => {
                write!(
                    f,
                    "CIGAR op {} reaches read position {} beyond read length {}",
                    op_index, read_pos, read_len
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_tag_errors() {
        let err = DecodeError::InvalidTagType {
            tag: *b"NM",
            type_code: b'q',
        };
        assert_eq!(err.to_string(), "Invalid tag type for NM: 'q'");

        let err = DecodeError::UnterminatedString { tag: *b"RG" };
        assert_eq!(err.to_string(), "Missing NUL terminator in tag RG");
    }

    #[test]
    fn test_converts_into_bam_error() {
        let err: crate::BamError = DecodeError::InvalidCigarOp { value: 11 }.into();
        assert!(matches!(
            err,
            crate::BamError::Decode(DecodeError::InvalidCigarOp { value: 11 })
        ));
    }
}
