use anyhow::{Result, anyhow, bail};
use img_parts::Bytes;
use img_parts::jpeg::{Jpeg, JpegSegment, markers};

/// Preamble that distinguishes an EXIF `APP1` from XMP and other `APP1`s.
pub const EXIF_HEADER: &[u8] = b"Exif\0\0";

/// Largest value the 2-byte segment length can hold (it counts itself).
const MAX_SEGMENT_LEN: usize = 0xFFFF;

/// Encoded size of the SOI marker that precedes the first segment.
const SOI_LEN: usize = 2;

fn is_exif(segment: &JpegSegment) -> bool {
    segment.marker() == markers::APP1 && segment.contents().starts_with(EXIF_HEADER)
}

/// `true` when the bytes start with the SOI marker followed by another
/// marker.
pub fn is_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 4 && bytes[0] == 0xFF && bytes[1] == markers::SOI && bytes[2] == 0xFF
}

/// Parse the segment list, `None` for anything that is not a readable JPEG.
fn parse(bytes: &[u8]) -> Option<Jpeg> {
    if !is_jpeg(bytes) {
        return None;
    }
    match Jpeg::from_bytes(Bytes::copy_from_slice(bytes)) {
        Ok(jpeg) => Some(jpeg),
        Err(e) => {
            log::debug!("Failed to parse JPEG segments: {e}");
            None
        }
    }
}

/// Payload (starting at `Exif\0\0`) of the first EXIF `APP1` segment.
pub fn find_exif(bytes: &[u8]) -> Option<Bytes> {
    parse(bytes)?
        .segments()
        .iter()
        .find(|s| is_exif(s))
        .map(|s| s.contents().clone())
}

/// Number of EXIF `APP1` segments in the header.
pub fn count_exif_segments(bytes: &[u8]) -> usize {
    parse(bytes)
        .map(|jpeg| jpeg.segments().iter().filter(|s| is_exif(s)).count())
        .unwrap_or(0)
}

/// Offset of the SOS marker, i.e. where the scan begins.
pub fn scan_data_offset(bytes: &[u8]) -> Option<usize> {
    let jpeg = parse(bytes)?;
    let header: usize = jpeg
        .segments()
        .iter()
        .take_while(|s| s.marker() != markers::SOS)
        .map(JpegSegment::len)
        .sum();
    Some(SOI_LEN + header)
}

/// Delete every EXIF `APP1` segment (marker, length and payload).
///
/// Other `APP1`s such as XMP and the entropy coded scan data are kept.
/// Input that is not a readable JPEG, or has no EXIF, comes back as is.
pub fn remove_exif(bytes: &[u8]) -> Vec<u8> {
    let Some(mut jpeg) = parse(bytes) else {
        return bytes.to_vec();
    };

    let before = jpeg.segments().len();
    jpeg.segments_mut().retain(|s| !is_exif(s));
    let removed = before - jpeg.segments().len();
    if removed == 0 {
        return bytes.to_vec();
    }

    log::debug!("Removed {removed} EXIF APP1 segment(s)");
    jpeg.encoder().bytes().to_vec()
}

/// Insert an EXIF `APP1` carrying `payload` (which must start with
/// `Exif\0\0`) right after SOI, ahead of every other segment.
///
/// Fails when the segment would exceed the 64 KiB length limit or the
/// segments cannot be parsed. Input without a JPEG signature comes back
/// as is.
pub fn insert_exif(bytes: &[u8], payload: &[u8]) -> Result<Vec<u8>> {
    if !is_jpeg(bytes) {
        return Ok(bytes.to_vec());
    }
    if !payload.starts_with(EXIF_HEADER) {
        bail!("EXIF payload must start with Exif\\0\\0");
    }

    let segment_len = payload.len() + 2;
    if segment_len > MAX_SEGMENT_LEN {
        bail!("EXIF segment too large ({segment_len} bytes, max {MAX_SEGMENT_LEN})");
    }

    let mut jpeg = Jpeg::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| anyhow!("Failed to parse JPEG: {e}"))?;
    let segment = JpegSegment::new_with_contents(markers::APP1, Bytes::copy_from_slice(payload));
    jpeg.segments_mut().insert(0, segment);
    Ok(jpeg.encoder().bytes().to_vec())
}
