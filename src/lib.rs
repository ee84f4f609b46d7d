//! bamread: streaming BAM/BGZF decoder with BAI coordinate seeking
//!
//! # Overview
//!
//! bamread reads coordinate-sorted alignment files one record at a time with
//! constant memory. Records are decoded in place from the current BGZF block,
//! so a full pass over a file allocates almost nothing per record.
//!
//! ## Key Features
//!
//! - **BGZF**: block-at-a-time inflate with CRC and size checks, read through
//!   a large aligned window
//! - **Read-ahead**: optional background thread that keeps decompressed
//!   blocks queued
//! - **Zero-copy records**: borrowed views with a sorted tag index, owned
//!   copies on request
//! - **Region queries**: BAI loading and seek to the first overlapping record
//! - **Vendor tags**: original and color-space qualities, Complete Genomics
//!   gapped-read expansion
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamread::BamFile;
//!
//! # fn main() -> bamread::Result<()> {
//! let mut bam = BamFile::open("sample.bam")?;
//!
//! while let Some(record) = bam.read()? {
//!     // The record borrows the decode buffer until the next read
//!     println!("{} {}", record.reference_id(), record.position());
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io::bgzf`]: BGZF blocks, virtual positions, synchronous and threaded readers
//! - [`io::bam`]: header, records, tags, CIGAR, BAI index and the file handle
//! - [`error`]: crate error type
//!
//! ## Logging
//!
//! Diagnostics go through the [`log`] facade. Install any logger (for example
//! `env_logger`) to see window refills, header and index summaries, and seek
//! decisions.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{BamError, Result};
pub use io::bam::{BamFile, BamIndex, CigarOp, Header, OpenOptions, Record};
pub use io::bgzf::{BgzfReader, ReaderOptions, ThreadedBgzfReader, VirtualPosition};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
