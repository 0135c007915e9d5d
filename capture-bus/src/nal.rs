//! Annex-B bitstream helpers.

use std::ops::Range;

/// Splits an Annex-B byte stream into NAL units. Each range starts at its
/// start code (3 or 4 bytes) so the ranges cover `data` without gaps:
/// concatenating them in order reproduces the input. Bytes before the first
/// start code form their own leading range.
pub fn split_annexb(data: &[u8]) -> Vec<Range<usize>> {
    let mut starts = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            // 4-byte start code
            let start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            starts.push(start);
            i += 3;
        } else {
            i += 1;
        }
    }

    if starts.first() != Some(&0) {
        starts.insert(0, 0);
    }

    let mut ranges = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(data.len());
        if end > start {
            ranges.push(start..end);
        }
    }
    ranges
}

/// NAL unit type of a unit starting with a start code, if any.
pub fn nal_type(unit: &[u8]) -> Option<u8> {
    let header = if unit.starts_with(&[0, 0, 0, 1]) {
        unit.get(4)
    } else if unit.starts_with(&[0, 0, 1]) {
        unit.get(3)
    } else {
        None
    };
    header.map(|h| h & 0x1f)
}
