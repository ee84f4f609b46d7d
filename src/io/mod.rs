//! I/O module: BGZF block decoding and the BAM reader built on it.

pub mod bam;
pub mod bgzf;

pub use bam::{BamFile, BamIndex, Record};
pub use bgzf::{BgzfReader, ThreadedBgzfReader, VirtualPosition};
