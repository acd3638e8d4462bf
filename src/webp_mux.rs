//! WebP container editing.
//!
//! The webp encoder emits a bare stream: a RIFF wrapper around a single
//! `VP8 ` or `VP8L` chunk. Carrying an ICC profile or EXIF block over
//! from the source means rewriting that wrapper into the extended layout:
//! a `VP8X` header chunk declaring what follows, an `ICCP` chunk before
//! the image data, an `EXIF` chunk after it. That is plain RIFF surgery
//! on a handful of chunks, done here directly.
//!
//! Chunk layout: four byte tag, little endian u32 payload size, payload,
//! one zero pad byte when the payload size is odd. The RIFF header's own
//! size field covers everything after its first eight bytes.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum MuxError {
    #[error("not a webp stream")]
    NotWebP,
    #[error("webp stream is truncated")]
    Truncated,
}

const FLAG_ICC: u8 = 0x20;
const FLAG_ALPHA: u8 = 0x10;
const FLAG_EXIF: u8 = 0x08;

/// Attach metadata to an encoded webp stream.
///
/// With neither `icc` nor `exif` the stream is returned as is. Otherwise
/// the container is rebuilt in extended form: a fresh `VP8X` leads (flags
/// merged with any existing `VP8X`), the profile precedes the image
/// chunks, EXIF follows them. `width`, `height` and `has_alpha` describe
/// the encoded image and fill the `VP8X` canvas fields.
pub fn with_metadata(
    encoded: &[u8],
    icc: Option<&[u8]>,
    exif: Option<&[u8]>,
    width: u32,
    height: u32,
    has_alpha: bool,
) -> Result<Vec<u8>, MuxError> {
    if icc.is_none() && exif.is_none() {
        return Ok(encoded.to_vec());
    }
    let chunks = parse_chunks(encoded)?;

    let mut flags = 0u8;
    for chunk in &chunks {
        if chunk.fourcc == *b"VP8X"
            && let Some(&existing) = chunk.payload.first()
        {
            flags |= existing;
        }
    }
    if icc.is_some() {
        flags |= FLAG_ICC;
    }
    if exif.is_some() {
        flags |= FLAG_EXIF;
    }
    if has_alpha {
        flags |= FLAG_ALPHA;
    }

    let extra = icc.map_or(0, <[u8]>::len) + exif.map_or(0, <[u8]>::len);
    let mut out = Vec::with_capacity(encoded.len() + extra + 64);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(b"WEBP");

    push_chunk(&mut out, b"VP8X", &vp8x_payload(flags, width, height));
    if let Some(icc) = icc {
        push_chunk(&mut out, b"ICCP", icc);
    }
    for chunk in &chunks {
        let replaced = chunk.fourcc == *b"VP8X"
            || (icc.is_some() && chunk.fourcc == *b"ICCP")
            || (exif.is_some() && chunk.fourcc == *b"EXIF");
        if !replaced {
            push_chunk(&mut out, &chunk.fourcc, chunk.payload);
        }
    }
    if let Some(exif) = exif {
        push_chunk(&mut out, b"EXIF", exif);
    }

    let riff_size = (out.len() - 8) as u32;
    out[4..8].copy_from_slice(&riff_size.to_le_bytes());
    Ok(out)
}

#[derive(Debug)]
pub(crate) struct Chunk<'a> {
    pub fourcc: [u8; 4],
    pub payload: &'a [u8],
}

/// Split a webp stream into its chunks.
pub(crate) fn parse_chunks(data: &[u8]) -> Result<Vec<Chunk<'_>>, MuxError> {
    if data.len() < 12 || &data[0..4] != b"RIFF" || &data[8..12] != b"WEBP" {
        return Err(MuxError::NotWebP);
    }
    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos < data.len() {
        let header = data.get(pos..pos + 8).ok_or(MuxError::Truncated)?;
        let fourcc = [header[0], header[1], header[2], header[3]];
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
        let payload = data.get(pos + 8..pos + 8 + size).ok_or(MuxError::Truncated)?;
        chunks.push(Chunk { fourcc, payload });
        pos += 8 + size + (size % 2);
    }
    Ok(chunks)
}

fn push_chunk(out: &mut Vec<u8>, fourcc: &[u8; 4], payload: &[u8]) {
    out.extend_from_slice(fourcc);
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    if payload.len() % 2 == 1 {
        out.push(0);
    }
}

fn vp8x_payload(flags: u8, width: u32, height: u32) -> [u8; 10] {
    // Canvas fields are 24-bit little endian, stored minus one.
    let w = width.saturating_sub(1).to_le_bytes();
    let h = height.saturating_sub(1).to_le_bytes();
    let mut payload = [0u8; 10];
    payload[0] = flags;
    payload[4..7].copy_from_slice(&w[..3]);
    payload[7..10].copy_from_slice(&h[..3]);
    payload
}
