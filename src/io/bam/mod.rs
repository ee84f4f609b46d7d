//! BAM (Binary Alignment Map) decoding.
//!
//! A BAM file is a BGZF stream holding a SAM header followed by
//! length-prefixed binary alignment records. This module provides:
//!
//! - Header parsing: binary reference table plus the `@SQ`/`@RG` lines of
//!   the SAM text
//! - [`Record`]: a zero-copy view over one record, with a sorted tag index
//! - [`BamFile`]: the reading handle, over either BGZF backend
//! - [`BamIndex`]: BAI loading, used by [`BamFile::seek`]
//! - Complete Genomics gapped-read expansion ([`cg`])
//!
//! # Memory
//!
//! Records that fit in the current decompressed block borrow it; only records
//! that straddle a block boundary are copied. Nothing is accumulated, so
//! memory stays at one block plus the backend's read window regardless of
//! file size.
//!
//! # Example
//!
//! ```no_run
//! use bamread::io::bam::BamFile;
//!
//! # fn main() -> bamread::Result<()> {
//! let mut bam = BamFile::open("alignments.bam")?;
//! println!("Header: {} references", bam.references().len());
//!
//! while let Some(record) = bam.read()? {
//!     if record.is_mapped() {
//!         println!(
//!             "{} at {}:{}",
//!             String::from_utf8_lossy(record.read_name()),
//!             record.reference_id(),
//!             record.position()
//!         );
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Region Queries
//!
//! ```no_run
//! use bamread::io::bam::BamFile;
//!
//! # fn main() -> bamread::Result<()> {
//! let mut bam = BamFile::open("alignments.bam")?;
//! bam.open_index("alignments.bam.bai")?;
//!
//! if bam.seek(0, 1_000_000, 1_001_000)? {
//!     let record = bam.read()?.expect("seek found a record");
//!     assert!(record.position() < 1_001_000);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cg;
pub mod cigar;
pub mod error;
pub mod file;
pub mod header;
pub mod index;
pub mod record;
pub mod sam_header;
pub mod sequence;
pub mod tags;

// Re-export main types for convenience
pub use cigar::{AlignmentDetail, AlignmentDetails, CigarOp};
pub use error::DecodeError;
pub use file::{BamFile, OpenOptions, Records};
pub use index::BamIndex;
pub use record::{Qualities, Record};
pub use sam_header::{Header, ReadGroup, ReferenceSeq};
pub use tags::{ArrayValue, Tag, TagIndex, TagValue};
