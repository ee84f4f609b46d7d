//! Complete Genomics gapped-read expansion.
//!
//! CG reads are stored with their small reference overlaps collapsed. Three
//! tags carry what was removed:
//! - `GC:Z`: run-length layout of the read, e.g. `5S2G8S`. `S` runs are
//!   kept bases, `G` runs are gaps where two bases overlap the reference.
//! - `GS:Z`: the overlapping bases, two per gap position
//! - `GQ:Z`: their qualities, Phred+33
//!
//! Expansion splices the extra bases back into the read and rewrites the
//! CIGAR with explicit backwards (`B`) steps so the read length grows by the
//! total gap length while the net reference span stays the same.

use super::cigar::CigarOp;
use super::record::Record;
use crate::error::{BamError, Result};

/// Maximum number of kept segments in a CG read.
pub const CG_NUM_SEGS: usize = 4;

/// `S G S G S G S`
const MAX_CG_SEGS: usize = 2 * CG_NUM_SEGS - 1;

/// Expanded CG reads are always this long.
const CG_READ_LEN: usize = 35;

/// Parse a `GC` value into alternating kept/gap run lengths.
///
/// Segment 0 is a kept run; repeated ops extend the current segment. The
/// sum of all runs must fit in a `u32`.
///
/// # Example
///
/// ```
/// use bamread::io::bam::cg::parse_gc;
///
/// assert_eq!(parse_gc(b"5S2G8S").unwrap(), [5, 2, 8, 0, 0, 0, 0]);
/// assert_eq!(parse_gc(b"3S2S1G").unwrap(), [5, 1, 0, 0, 0, 0, 0]);
/// ```
pub fn parse_gc(gc: &[u8]) -> Result<[u32; MAX_CG_SEGS]> {
    let mut segs = [0u32; MAX_CG_SEGS];
    let mut seg = 0;
    let mut last_op = b'S';
    let mut total = 0u32;
    let mut rest = gc;

    while !rest.is_empty() {
        let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
        let op = *rest.get(digits).ok_or_else(|| {
            BamError::Format(format!(
                "GC tag {:?} ends without an op",
                String::from_utf8_lossy(gc)
            ))
        })?;
        let len: u32 = std::str::from_utf8(&rest[..digits])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                BamError::Format(format!(
                    "GC tag {:?} has a run without a length",
                    String::from_utf8_lossy(gc)
                ))
            })?;
        if op != b'S' && op != b'G' {
            return Err(BamError::Format(format!(
                "GC tag op {:?} is not S or G",
                op as char
            )));
        }

        if op != last_op {
            last_op = op;
            seg += 1;
            if seg >= MAX_CG_SEGS {
                return Err(BamError::Format(format!(
                    "GC tag {:?} has more than {} segments",
                    String::from_utf8_lossy(gc),
                    MAX_CG_SEGS
                )));
            }
        }
        // Read offsets derived from the runs must stay within u32
        total = total.checked_add(len).ok_or_else(|| {
            BamError::Format(format!(
                "GC tag {:?} runs add up past {}",
                String::from_utf8_lossy(gc),
                u32::MAX
            ))
        })?;
        segs[seg] += len;
        rest = &rest[digits + 1..];
    }

    Ok(segs)
}

/// Remove empty and padding ops, then merge neighbours of the same type
/// whose combined length fits in a `u32`.
pub fn canonicalize(ops: &mut Vec<CigarOp>) {
    ops.retain(|op| !op.is_empty() && !matches!(op, CigarOp::Padding(_)));

    let mut i = 1;
    while i < ops.len() {
        let merged = if ops[i].code() == ops[i - 1].code() {
            ops[i - 1].length().checked_add(ops[i].length())
        } else {
            None
        };
        match merged {
            Some(length) => {
                let op = ops[i - 1].with_length(length);
                ops.splice(i - 1..=i, [op]);
            }
            None => i += 1,
        }
    }
}

/// Split the query-consuming op that spans read offset `s + g` into
/// `[left][g B][g M][right]`, dropping empty halves.
pub fn insert_b(ops: &mut Vec<CigarOp>, s: u32, g: u32) {
    let target = u64::from(s) + u64::from(g);
    let mut pos = 0u64;

    for i in 0..ops.len() {
        let op = ops[i];
        if !op.consumes_query() {
            continue;
        }
        let next = pos + u64::from(op.length());
        if pos <= target && target <= next {
            // target - pos <= op.length()
            let left = (target - pos) as u32;
            let right = op.length() - left;
            let pieces = [
                op.with_length(left),
                CigarOp::Back(g),
                CigarOp::Match(g),
                op.with_length(right),
            ];
            let keep_left = usize::from(left == 0);
            let drop_right = usize::from(right == 0);
            ops.splice(i..=i, pieces[keep_left..4 - drop_right].iter().copied());
            return;
        }
        pos = next;
    }
}

impl Record<'_> {
    /// Sequence and Phred qualities with the `GS`/`GQ` overlap bases spliced in.
    ///
    /// Returns `Ok(None)` when the record has no CG data.
    ///
    /// # Errors
    ///
    /// [`BamError::Inconsistent`] when `GS`, `GQ`, `GC`, the CIGAR and the
    /// read length disagree.
    pub fn cg_seq_qual(&self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        let (Some(gc), Some(gs), Some(gq)) = (
            self.tag(*b"GC").and_then(|t| t.as_bytes()),
            self.tag(*b"GS").and_then(|t| t.as_bytes()),
            self.tag(*b"GQ").and_then(|t| t.as_bytes()),
        ) else {
            return Ok(None);
        };
        let sn = self.read_len();

        if gs.len() != gq.len() {
            return Err(BamError::Inconsistent(format!(
                "GS has {} bases but GQ has {}",
                gs.len(),
                gq.len()
            )));
        }
        if self.query_length() != sn as u64 {
            return Err(BamError::Inconsistent(format!(
                "CIGAR covers {} read bases but the read has {}",
                self.query_length(),
                sn
            )));
        }

        let segs = parse_gc(gc)?;
        let kept: usize = segs.iter().step_by(2).map(|&n| n as usize).sum();
        let gaps: usize = segs.iter().skip(1).step_by(2).map(|&n| n as usize).sum();
        if 2 * gaps != gs.len() || kept + gaps > sn || sn + gaps != CG_READ_LEN {
            return Err(BamError::Inconsistent(format!(
                "GC {:?} does not fit GS length {} and read length {}",
                String::from_utf8_lossy(gc),
                gs.len(),
                sn
            )));
        }

        let mut seq = self.sequence();
        let mut qual = self.quality().to_vec();
        if gaps == 0 {
            return Ok(Some((seq, qual)));
        }

        // Shift everything after the first kept run right by the gap total,
        // then fill forward: each gap position takes two GS bases in place of
        // one read base, each kept run is copied back down.
        let mut nsi = segs[0] as usize;
        let mut osi = nsi + gaps;
        seq.resize(sn + gaps, 0);
        qual.resize(sn + gaps, 0);
        seq.copy_within(nsi..sn, osi);
        qual.copy_within(nsi..sn, osi);

        let mut k = 0;
        for i in 1..CG_NUM_SEGS {
            if nsi >= osi {
                break;
            }
            for _ in 0..segs[2 * i - 1] {
                for _ in 0..2 {
                    seq[nsi] = gs[k];
                    qual[nsi] = gq[k].wrapping_sub(33);
                    nsi += 1;
                    k += 1;
                }
                osi += 1;
            }
            if nsi < osi {
                for _ in 0..segs[2 * i] {
                    seq[nsi] = seq[osi];
                    qual[nsi] = qual[osi];
                    nsi += 1;
                    osi += 1;
                }
            }
        }

        Ok(Some((seq, qual)))
    }

    /// Canonical CIGAR with a `B`/`M` pair inserted at every CG gap.
    ///
    /// Returns `Ok(None)` when the record has no `GC` tag.
    pub fn cg_cigar(&self) -> Result<Option<Vec<CigarOp>>> {
        let Some(gc) = self.tag(*b"GC").and_then(|t| t.as_bytes()) else {
            return Ok(None);
        };
        let segs = parse_gc(gc)?;

        let mut ops = self.cigar();
        canonicalize(&mut ops);

        let mut s = 0;
        for i in 0..CG_NUM_SEGS - 1 {
            s += segs[2 * i];
            let g = segs[2 * i + 1];
            if g > 0 {
                insert_b(&mut ops, s, g);
                s += g;
            }
        }
        Ok(Some(ops))
    }
}
