//! Ultra HDR (JPEG_R) containers.
//!
//! An Ultra HDR file is an SDR primary JPEG with a gain-map JPEG appended
//! after its EOI. The primary's XMP carries a GContainer directory
//! describing the appended items; the gain map's own XMP (hdrgm namespace)
//! carries the recovery-curve parameters. Viewers sample the gain map over
//! normalized coordinates, so when the primary grows a border the gain map
//! must grow proportionally, with the new area filled at the encoded value
//! that means "no boost".

use image::codecs::jpeg::JpegEncoder;
use image::{GrayImage, Luma};
use photomark_core::WatermarkError;
use tracing::debug;

use crate::jpeg;
use crate::types::ContentBox;
use crate::xmp::{self, GainMapParams};

/// The split-apart pieces of an Ultra HDR file.
#[derive(Debug, Clone)]
pub struct ContainerParts {
    pub primary_jpeg: Vec<u8>,
    pub gainmap_jpeg: Vec<u8>,
    pub primary_xmp: Option<String>,
    pub gainmap_xmp: Option<String>,
    pub primary_len: usize,
}

/// Cheap probe for the Ultra HDR markers, usable on raw file bytes before
/// any parsing.
pub fn looks_like_ultrahdr(data: &[u8]) -> bool {
    const NEEDLES: [&[u8]; 4] = [
        b"http://ns.adobe.com/hdr-gain-map/1.0/",
        br#"hdrgm:Version="1.0""#,
        br#"Item:Semantic="GainMap""#,
        b"DirectoryItemSemantic>GainMap",
    ];
    NEEDLES
        .iter()
        .any(|needle| data.windows(needle.len()).any(|w| w == *needle))
}

fn looks_like_gainmap(jpeg_bytes: &[u8]) -> bool {
    const NS: &[u8] = b"http://ns.adobe.com/hdr-gain-map/1.0/";
    if jpeg_bytes.windows(NS.len()).any(|w| w == NS) {
        return true;
    }
    jpeg::extract_xmp_packets(jpeg_bytes)
        .iter()
        .any(|pkt| pkt.contains("hdrgm:Version") || pkt.contains("hdr-gain-map"))
}

/// Split a file into primary and gain-map JPEGs.
///
/// The GContainer directory is preferred: item lengths and paddings are
/// walked in document order from the primary's EOI until the `GainMap`
/// item is reached. Without a usable directory the tail is scanned for
/// embedded JPEGs, preferring the one whose XMP advertises the gain-map
/// namespace.
pub fn split(data: &[u8]) -> Result<ContainerParts, WatermarkError> {
    let primary_len = jpeg::find_image_end(data, 0)?;
    let primary = &data[..primary_len];
    let packets = jpeg::extract_xmp_packets(primary);
    let primary_xmp = packets.first().cloned();

    let mut gainmap: Option<Vec<u8>> = None;
    for pkt in &packets {
        let items = xmp::parse_container_items(pkt)?;
        if items.is_empty() {
            continue;
        }
        // A directory claiming more trailing bytes than the file holds is
        // untrustworthy; defer to the tail scan instead of slicing blind.
        let declared = xmp::trailing_length(&items) as usize;
        if declared == 0 || primary_len + declared > data.len() {
            debug!(declared, "directory trailing length unusable");
            break;
        }
        let mut cursor = primary_len;
        for item in &items {
            if item.is_primary() {
                continue;
            }
            let len = item.length as usize;
            if item.semantic.eq_ignore_ascii_case("GainMap") && len > 0 {
                if cursor + len <= data.len() {
                    gainmap = Some(data[cursor..cursor + len].to_vec());
                }
                break;
            }
            cursor += len + item.padding as usize;
        }
        break;
    }

    if gainmap.is_none() {
        let appended = jpeg::scan_trailing_jpegs(data, primary_len);
        let candidates: Vec<&[u8]> = appended.iter().map(|r| &data[r.clone()]).collect();
        gainmap = candidates
            .iter()
            .find(|c| looks_like_gainmap(c))
            .or_else(|| candidates.first())
            .map(|c| c.to_vec());
        if gainmap.is_some() {
            debug!(candidates = candidates.len(), "gain map located by tail scan");
        }
    }

    let gainmap_jpeg = gainmap.ok_or(WatermarkError::GainMapNotFound)?;
    let gainmap_xmp = jpeg::extract_xmp_packets(&gainmap_jpeg).into_iter().next();

    Ok(ContainerParts {
        primary_jpeg: primary.to_vec(),
        gainmap_jpeg,
        primary_xmp,
        gainmap_xmp,
        primary_len,
    })
}

/// Rebuild a JPEG_R byte stream: primary with the updated XMP injected,
/// gain map appended tightly after EOI.
pub fn rebuild(
    primary_jpeg: &[u8],
    primary_xmp: &str,
    gainmap_jpeg: &[u8],
) -> Result<Vec<u8>, WatermarkError> {
    let mut out = jpeg::inject_xmp(primary_jpeg, primary_xmp)?;
    out.extend_from_slice(gainmap_jpeg);
    Ok(out)
}

/// Update the GContainer directory for new primary and gain-map byte
/// lengths, zeroing padding (tightly packed).
pub fn update_directory_lengths(
    primary_xmp: &str,
    primary_len: u64,
    gainmap_len: u64,
) -> Result<String, WatermarkError> {
    let updated = xmp::update_item_length(primary_xmp, "Primary", primary_len)?;
    xmp::update_item_length(&updated, "GainMap", gainmap_len)
}

/// Grow a gain map to match a primary that gained borders.
///
/// New canvas dimensions scale with the primary growth (rounded, min 1);
/// the original map is pasted at the content-box origin scaled into
/// gain-map space; the rest is filled with the neutral encoded value.
/// Re-encoded at JPEG quality 100 with the original hdrgm XMP re-injected.
pub fn expand_gainmap_for_borders(
    orig_gainmap_jpeg: &[u8],
    orig_gainmap_xmp: Option<&str>,
    orig_primary_size: (u32, u32),
    new_primary_size: (u32, u32),
    content_box: ContentBox,
) -> Result<Vec<u8>, WatermarkError> {
    let (bw, bh) = orig_primary_size;
    let (nw, nh) = new_primary_size;
    if bw == 0 || bh == 0 {
        return Err(WatermarkError::malformed("zero-sized primary image"));
    }

    let gm = image::load_from_memory(orig_gainmap_jpeg)?.to_luma8();
    let (gw, gh) = gm.dimensions();

    let new_gw = ((gw as f64 * nw as f64 / bw as f64).round() as u32).max(1);
    let new_gh = ((gh as f64 * nh as f64 / bh as f64).round() as u32).max(1);
    let pad_x = (content_box.x as f64 * gw as f64 / bw as f64).round() as u32;
    let pad_y = (content_box.y as f64 * gh as f64 / bh as f64).round() as u32;

    let params = match orig_gainmap_xmp {
        Some(xml) => xmp::parse_gain_map_params(xml)?,
        None => GainMapParams::default(),
    };
    let neutral = xmp::neutral_gain_value(&params);

    let mut canvas = GrayImage::from_pixel(new_gw, new_gh, Luma([neutral]));
    image::imageops::overlay(&mut canvas, &gm, pad_x as i64, pad_y as i64);

    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, 100).encode(
        canvas.as_raw(),
        new_gw,
        new_gh,
        image::ExtendedColorType::L8,
    )?;

    match orig_gainmap_xmp {
        Some(xml) => jpeg::inject_xmp(&encoded, xml),
        None => Ok(encoded),
    }
}
