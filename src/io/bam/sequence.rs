//! Packed 4-bit read sequences.
//!
//! BAM stores two bases per byte, high nibble first. Each nibble indexes
//! `=ACMGRSVTWYHKDBN`.

/// 4-bit code to IUPAC base.
pub const SEQ_LOOKUP: &[u8; 16] = b"=ACMGRSVTWYHKDBN";

/// Base at read offset `i`.
///
/// `data` must hold at least `i / 2 + 1` bytes.
#[inline]
pub fn decode_base(data: &[u8], i: usize) -> u8 {
    let byte = data[i / 2];
    let nibble = if i % 2 == 0 { byte >> 4 } else { byte & 0x0F };
    SEQ_LOOKUP[nibble as usize]
}

/// Append bases `start..end` to `out`.
///
/// `data` must hold at least `ceil(end / 2)` bytes.
pub fn decode_range_into(data: &[u8], start: usize, end: usize, out: &mut Vec<u8>) {
    out.reserve(end.saturating_sub(start));
    let mut i = start;

    // Leading odd base, then whole bytes two bases at a time
    if i < end && i % 2 == 1 {
        out.push(decode_base(data, i));
        i += 1;
    }
    while i + 1 < end {
        let byte = data[i / 2];
        out.push(SEQ_LOOKUP[(byte >> 4) as usize]);
        out.push(SEQ_LOOKUP[(byte & 0x0F) as usize]);
        i += 2;
    }
    if i < end {
        out.push(decode_base(data, i));
    }
}
