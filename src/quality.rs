//! JPEG quality estimation.
//!
//! Re-encoding an 82-quality JPEG at quality 95 produces a larger file
//! with no visual gain. When the caller asks for `auto` quality, this
//! module estimates the quality the source was originally encoded at by
//! reading its luminance quantization table and matching it against the
//! standard table scaled to each quality level with the libjpeg formula.
//!
//! Estimation is best effort and never fails a conversion: a non-JPEG
//! source, an unreadable file or a missing table all yield
//! [`QualityDecision::DetectionFailed`], which converters answer by
//! leaving their encoder at its default quality.

use log::debug;
use std::fs;
use std::path::Path;

use crate::options::QualityRequest;

/// Outcome of quality resolution for one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityDecision {
    /// Encode at exactly this quality.
    Fixed(u8),
    /// No usable estimate; the encoder keeps its own default.
    DetectionFailed,
}

/// Resolve the effective quality for `source`.
///
/// A fixed request passes through untouched. `auto` reads the source and
/// estimates; the estimate is capped at `max_quality`. The cap applies
/// only to estimates, never to an explicitly requested quality.
pub fn resolve(source: &Path, requested: QualityRequest, max_quality: u8) -> QualityDecision {
    match requested {
        QualityRequest::Fixed(q) => QualityDecision::Fixed(q),
        QualityRequest::Auto => {
            let bytes = match fs::read(source) {
                Ok(bytes) => bytes,
                Err(e) => {
                    debug!(
                        "quality detection: could not read {}: {e}",
                        source.display()
                    );
                    return QualityDecision::DetectionFailed;
                }
            };
            match estimate_jpeg_quality(&bytes) {
                Some(q) => QualityDecision::Fixed(q.min(max_quality)),
                None => QualityDecision::DetectionFailed,
            }
        }
    }
}

/// Estimate the encoding quality of a JPEG byte stream.
///
/// Returns `None` for anything that is not a JPEG with a readable
/// luminance quantization table.
pub fn estimate_jpeg_quality(data: &[u8]) -> Option<u8> {
    let table = find_luminance_table(data)?;
    let observed: u32 = table.iter().map(|&v| v as u32).sum();
    let mut best_q = 1u8;
    let mut best_diff = u32::MAX;
    for q in 1..=100u8 {
        let diff = observed.abs_diff(scaled_table_sum(q));
        // On a tie the higher quality wins; under-estimating would
        // degrade the re-encode.
        if diff <= best_diff {
            best_diff = diff;
            best_q = q;
        }
    }
    Some(best_q)
}

/// Walk the JPEG marker segments up to the start of scan data and return
/// the luminance quantization table (table id 0) if one is declared.
fn find_luminance_table(data: &[u8]) -> Option<[u16; 64]> {
    if data.len() < 4 || data[0] != 0xFF || data[1] != 0xD8 {
        return None;
    }
    let mut pos = 2;
    while pos + 4 <= data.len() {
        if data[pos] != 0xFF {
            return None;
        }
        let marker = data[pos + 1];
        pos += 2;
        match marker {
            // Fill byte; the real marker follows.
            0xFF => {
                pos -= 1;
                continue;
            }
            // Standalone markers carry no length field.
            0x01 | 0xD0..=0xD8 => continue,
            // End of image or start of scan: all tables precede these.
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let length = u16::from_be_bytes([*data.get(pos)?, *data.get(pos + 1)?]) as usize;
        if length < 2 {
            return None;
        }
        let segment = data.get(pos + 2..pos + length)?;
        if marker == 0xDB
            && let Some(table) = luminance_table_in_segment(segment)
        {
            return Some(table);
        }
        pos += length;
    }
    None
}

/// Scan the entries of one DQT segment for table id 0.
///
/// A segment may hold several tables back to back, each prefixed by a
/// precision/id byte: high nibble 0 for 8-bit entries, 1 for 16-bit
/// big-endian entries; low nibble is the table id.
fn luminance_table_in_segment(mut segment: &[u8]) -> Option<[u16; 64]> {
    while let Some((&pq_tq, rest)) = segment.split_first() {
        let precision = pq_tq >> 4;
        let id = pq_tq & 0x0F;
        let entry_len = match precision {
            0 => 64,
            1 => 128,
            _ => return None,
        };
        let entries = rest.get(..entry_len)?;
        if id == 0 {
            // Entries arrive in zigzag order; a sum is order independent,
            // so no reordering is needed.
            let mut table = [0u16; 64];
            if precision == 0 {
                for (slot, &byte) in table.iter_mut().zip(entries) {
                    *slot = byte as u16;
                }
            } else {
                for (slot, pair) in table.iter_mut().zip(entries.chunks_exact(2)) {
                    *slot = u16::from_be_bytes([pair[0], pair[1]]);
                }
            }
            return Some(table);
        }
        segment = &rest[entry_len..];
    }
    None
}

/// Standard luminance quantization table (JPEG Annex K), row major.
const STD_LUMINANCE: [u16; 64] = [
    16, 11, 10, 16, 24, 40, 51, 61, //
    12, 12, 14, 19, 26, 58, 60, 55, //
    14, 13, 16, 24, 40, 57, 69, 56, //
    14, 17, 22, 29, 51, 87, 80, 62, //
    18, 22, 37, 56, 68, 109, 103, 77, //
    24, 35, 55, 64, 81, 104, 113, 92, //
    49, 64, 78, 87, 103, 121, 120, 101, //
    72, 92, 95, 98, 112, 100, 103, 99,
];

/// Sum of the standard table scaled to `quality`, 1..=100, with the
/// libjpeg scaling formula.
fn scaled_table_sum(quality: u8) -> u32 {
    let scale: u32 = if quality < 50 {
        5000 / quality as u32
    } else {
        200 - 2 * quality as u32
    };
    STD_LUMINANCE
        .iter()
        .map(|&v| ((v as u32 * scale + 50) / 100).clamp(1, 255))
        .sum()
}
