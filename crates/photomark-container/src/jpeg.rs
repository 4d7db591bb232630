//! Marker-level JPEG scanning.
//!
//! Motion photos and Ultra HDR files are JPEG streams with extra payloads
//! appended after EOI, so `image`'s decoder (which stops at the first
//! complete image) cannot tell us where the primary stream ends. This
//! module walks the marker structure directly: segment lengths are u16
//! big-endian and include the length field itself, entropy-coded data after
//! SOS escapes literal `FF` as `FF 00`, and restart markers `D0..=D7` plus
//! `TEM` carry no length.

use std::ops::Range;

use photomark_core::WatermarkError;

pub const SOI: [u8; 2] = [0xFF, 0xD8];
pub const EOI: [u8; 2] = [0xFF, 0xD9];

/// APP1 payload prefix identifying an XMP packet.
pub const XMP_APP1_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Offset one past the EOI marker of the JPEG starting at `data[start]`.
///
/// Trailing bytes after that offset (motion video, gain map) are not
/// inspected. Fails with `MalformedContainer` if the stream is truncated
/// or does not start with SOI.
pub fn find_image_end(data: &[u8], start: usize) -> Result<usize, WatermarkError> {
    if start + 2 > data.len() || data[start..start + 2] != SOI {
        return Err(WatermarkError::malformed("missing SOI marker"));
    }
    let mut pos = start + 2;
    loop {
        if pos + 2 > data.len() {
            return Err(WatermarkError::malformed("truncated before EOI"));
        }
        if data[pos] != 0xFF {
            return Err(WatermarkError::malformed(format!(
                "expected marker at offset {pos}, found 0x{:02X}",
                data[pos]
            )));
        }
        // Fill bytes: any number of FF may pad before the marker id.
        while pos + 1 < data.len() && data[pos + 1] == 0xFF {
            pos += 1;
        }
        if pos + 2 > data.len() {
            return Err(WatermarkError::malformed("truncated marker"));
        }
        let marker = data[pos + 1];
        pos += 2;
        match marker {
            0xD9 => return Ok(pos),
            // TEM, SOI and RST0..=RST7 are standalone.
            0x01 | 0xD8 | 0xD0..=0xD7 => {}
            0xDA => {
                pos = skip_segment(data, pos)?;
                pos = skip_entropy_coded(data, pos)?;
            }
            _ => {
                pos = skip_segment(data, pos)?;
            }
        }
    }
}

fn skip_segment(data: &[u8], pos: usize) -> Result<usize, WatermarkError> {
    if pos + 2 > data.len() {
        return Err(WatermarkError::malformed("truncated segment length"));
    }
    let len = u16::from_be_bytes([data[pos], data[pos + 1]]) as usize;
    if len < 2 || pos + len > data.len() {
        return Err(WatermarkError::malformed("segment length out of range"));
    }
    Ok(pos + len)
}

/// Advance past entropy-coded scan data to the next real marker. `FF 00` is
/// a stuffed data byte and `FF D0..=D7` resumes the scan.
fn skip_entropy_coded(data: &[u8], mut pos: usize) -> Result<usize, WatermarkError> {
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            pos += 1;
            continue;
        }
        match data[pos + 1] {
            0x00 | 0xD0..=0xD7 => pos += 2,
            0xFF => pos += 1,
            _ => return Ok(pos),
        }
    }
    Err(WatermarkError::malformed("scan data ran off the end"))
}

/// Header segments of a JPEG, up to but excluding SOS.
struct SegmentIter<'a> {
    data: &'a [u8],
    pos: usize,
    done: bool,
}

struct Segment {
    marker: u8,
    /// Offset of the leading FF.
    start: usize,
    /// Offset one past the segment.
    end: usize,
    payload_start: usize,
}

impl<'a> SegmentIter<'a> {
    fn new(data: &'a [u8]) -> Self {
        let done = data.len() < 2 || data[0..2] != SOI;
        SegmentIter { data, pos: 2, done }
    }
}

impl Iterator for SegmentIter<'_> {
    type Item = Segment;

    fn next(&mut self) -> Option<Segment> {
        if self.done || self.pos + 4 > self.data.len() || self.data[self.pos] != 0xFF {
            return None;
        }
        let start = self.pos;
        let marker = self.data[self.pos + 1];
        // Stop at SOS or EOI; everything past them is scan data.
        if marker == 0xDA || marker == 0xD9 {
            self.done = true;
            return None;
        }
        let len =
            u16::from_be_bytes([self.data[self.pos + 2], self.data[self.pos + 3]]) as usize;
        if len < 2 || self.pos + 2 + len > self.data.len() {
            self.done = true;
            return None;
        }
        let end = self.pos + 2 + len;
        self.pos = end;
        Some(Segment {
            marker,
            start,
            end,
            payload_start: start + 4,
        })
    }
}

fn is_xmp_segment(data: &[u8], seg: &Segment) -> bool {
    seg.marker == 0xE1 && data[seg.payload_start..seg.end].starts_with(XMP_APP1_HEADER)
}

/// All XMP packets in header APP1 segments, signature stripped, in
/// encounter order. Vendor packets are not always valid UTF-8; bad bytes
/// are replaced rather than rejected.
pub fn extract_xmp_packets(data: &[u8]) -> Vec<String> {
    SegmentIter::new(data)
        .filter(|seg| is_xmp_segment(data, seg))
        .map(|seg| {
            let body = &data[seg.payload_start + XMP_APP1_HEADER.len()..seg.end];
            String::from_utf8_lossy(body).into_owned()
        })
        .collect()
}

/// Copy of the stream with every XMP APP1 segment removed. EXIF and all
/// other segments are preserved byte for byte, the scan data verbatim.
pub fn strip_xmp(data: &[u8]) -> Vec<u8> {
    let removals: Vec<(usize, usize)> = SegmentIter::new(data)
        .filter(|seg| is_xmp_segment(data, seg))
        .map(|seg| (seg.start, seg.end))
        .collect();
    if removals.is_empty() {
        return data.to_vec();
    }
    let mut out = Vec::with_capacity(data.len());
    let mut cursor = 0usize;
    for (start, end) in removals {
        out.extend_from_slice(&data[cursor..start]);
        cursor = end;
    }
    out.extend_from_slice(&data[cursor..]);
    out
}

/// Replace any existing XMP with `xmp` as a fresh APP1 segment directly
/// after SOI.
pub fn inject_xmp(data: &[u8], xmp: &str) -> Result<Vec<u8>, WatermarkError> {
    if data.len() < 2 || data[0..2] != SOI {
        return Err(WatermarkError::malformed("missing SOI marker"));
    }
    let payload_len = XMP_APP1_HEADER.len() + xmp.len();
    if payload_len + 2 > 0xFFFF {
        return Err(WatermarkError::SegmentTooLarge {
            size: payload_len + 2,
        });
    }
    let stripped = strip_xmp(data);
    let mut out = Vec::with_capacity(stripped.len() + payload_len + 4);
    out.extend_from_slice(&stripped[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&((payload_len + 2) as u16).to_be_bytes());
    out.extend_from_slice(XMP_APP1_HEADER);
    out.extend_from_slice(xmp.as_bytes());
    out.extend_from_slice(&stripped[2..]);
    Ok(out)
}

/// Offset of the first SOI at or after `from`, if any.
pub fn find_next_soi(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(2)
        .position(|w| w == SOI)
        .map(|p| from + p)
}

/// Byte ranges of complete JPEG streams embedded at or after `from`.
/// An SOI whose stream does not parse to an EOI is a false positive and is
/// skipped.
pub fn scan_trailing_jpegs(data: &[u8], from: usize) -> Vec<Range<usize>> {
    let mut ranges = Vec::new();
    let mut cursor = from;
    while let Some(soi) = find_next_soi(data, cursor) {
        match find_image_end(data, soi) {
            Ok(end) => {
                ranges.push(soi..end);
                cursor = end;
            }
            Err(_) => cursor = soi + 2,
        }
    }
    ranges
}
