//! Motion photo splitting and reassembly.
//!
//! A motion photo is a JPEG with an MP4 appended after EOI. The video
//! boundary is advertised in vendor XMP attributes; several generations of
//! attribute names are tried in priority order. Some vendors set only the
//! motion flag, for those the last 8 MiB of the file are scanned for a
//! plausible `ftyp` box. The scan is a bounded heuristic: the declared box
//! size must be sane and a candidate sitting right after a JPEG EOI wins
//! over one that does not.

use std::path::{Path, PathBuf};

use photomark_core::WatermarkError;
use tempfile::TempDir;
use tracing::{debug, warn};

use crate::jpeg;
use crate::types::WatermarkMetadata;
use crate::video::VideoCompositor;
use crate::xmp;

const OFFSET_ATTRS: [&str; 3] = [
    "GCamera:MicroVideoOffset",
    "GCamera:MotionPhotoOffset",
    "Camera:MotionPhotoOffset",
];

const LENGTH_ATTRS: [&str; 3] = [
    "GCamera:MicroVideoLength",
    "GCamera:MotionPhotoLength",
    "Camera:MotionPhotoLength",
];

const MOTION_FLAG_ATTRS: [&str; 3] = [
    "GCamera:MotionPhoto",
    "GCamera:MicroVideo",
    "Camera:MotionPhoto",
];

const FTYP_SCAN_WINDOW: usize = 8 * 1024 * 1024;

/// An opened motion photo: still and video split apart, original XMP kept
/// for reassembly, scratch files in a private workspace that lives as long
/// as the session.
pub struct MotionPhotoSession {
    workspace: TempDir,
    still_path: PathBuf,
    video_bytes: Vec<u8>,
    xmp: String,
}

impl MotionPhotoSession {
    /// Split a motion photo into its still and video parts.
    ///
    /// Returns `Ok(None)` when the file carries no XMP or no recoverable
    /// video range; that is the ordinary plain-photo case, not a failure.
    pub fn prepare(path: &Path) -> Result<Option<Self>, WatermarkError> {
        let data = std::fs::read(path)?;
        let xmp = match jpeg::extract_xmp_packets(&data).into_iter().next() {
            Some(packet) => packet,
            None => return Ok(None),
        };

        let video_range = match locate_video(&data, &xmp)? {
            Some(range) => range,
            None => return Ok(None),
        };

        let workspace = TempDir::new()?;
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("photo");
        let still_path = workspace.path().join(format!("{stem}_motion_still.jpg"));
        std::fs::write(&still_path, &data[..video_range.0])?;
        debug!(
            video_start = video_range.0,
            video_len = video_range.1,
            "split motion photo"
        );

        Ok(Some(MotionPhotoSession {
            workspace,
            still_path,
            video_bytes: data[video_range.0..video_range.0 + video_range.1].to_vec(),
            xmp,
        }))
    }

    /// Path of the extracted still, inside the session workspace.
    pub fn still_path(&self) -> &Path {
        &self.still_path
    }

    pub fn has_motion(&self) -> bool {
        !self.video_bytes.is_empty()
    }

    /// Reassemble the container around a watermarked still.
    ///
    /// Burns the overlay into the video via `video_tool`, copies the
    /// original EXIF onto the still (best effort), rewrites the XMP
    /// boundary attributes to the new video length, and writes
    /// `still ++ video` to `output`.
    pub async fn finalize(
        &self,
        watermarked_still: &Path,
        output: &Path,
        metadata: &WatermarkMetadata,
        video_tool: &dyn VideoCompositor,
    ) -> Result<(), WatermarkError> {
        if !self.has_motion() {
            return Err(WatermarkError::MissingVideoData);
        }
        if self.xmp.is_empty() {
            return Err(WatermarkError::MissingMetadata);
        }

        let original_video = self.workspace.path().join("motion_original.mp4");
        tokio::fs::write(&original_video, &self.video_bytes).await?;

        let overlay_path = self.workspace.path().join("watermark_overlay.png");
        metadata.overlay.save(&overlay_path)?;

        let watermarked_video = self.workspace.path().join("motion_watermarked.mp4");
        video_tool
            .overlay(
                &original_video,
                &overlay_path,
                &watermarked_video,
                metadata.content_box,
            )
            .await?;
        let video_bytes = tokio::fs::read(&watermarked_video).await?;

        let mut still_bytes = tokio::fs::read(watermarked_still).await?;
        match copy_exif(&std::fs::read(&self.still_path)?, &still_bytes) {
            Ok(with_exif) => still_bytes = with_exif,
            Err(err) => warn!(error = %err, "EXIF copy onto watermarked still failed"),
        }

        let xmp = rewrite_boundaries(&self.xmp, video_bytes.len() as u64)?;
        let still_with_xmp = jpeg::inject_xmp(&still_bytes, &xmp)?;

        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut out = still_with_xmp;
        out.extend_from_slice(&video_bytes);
        tokio::fs::write(output, out).await?;
        Ok(())
    }

    /// Drop the session workspace. The error path is covered by `Drop`;
    /// calling this keeps removal failures visible.
    pub fn cleanup(self) -> Result<(), WatermarkError> {
        self.workspace.close()?;
        Ok(())
    }
}

fn attr_value(xmp: &str, names: &[&str]) -> Result<Option<u64>, WatermarkError> {
    for name in names {
        if let Some(raw) = xmp::read_attribute(xmp, name)? {
            if let Ok(value) = raw.trim().parse::<u64>() {
                if value > 0 {
                    return Ok(Some(value));
                }
            }
        }
    }
    Ok(None)
}

fn motion_flag_set(xmp: &str) -> Result<bool, WatermarkError> {
    for name in MOTION_FLAG_ATTRS {
        if let Some(raw) = xmp::read_attribute(xmp, name)? {
            if raw.trim() == "1" {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// `(start, len)` of the video blob, or `None` when no plausible range is
/// described by the XMP or found by scanning.
fn locate_video(data: &[u8], xmp: &str) -> Result<Option<(usize, usize)>, WatermarkError> {
    let file_len = data.len();
    let range = if let Some(length) = attr_value(xmp, &LENGTH_ATTRS)? {
        let length = length as usize;
        file_len.checked_sub(length).map(|start| (start, length))
    } else if let Some(offset) = attr_value(xmp, &OFFSET_ATTRS)? {
        let offset = offset as usize;
        file_len.checked_sub(offset).map(|start| (start, offset))
    } else if motion_flag_set(xmp)? {
        scan_for_ftyp(data).map(|start| (start, file_len - start))
    } else {
        None
    };
    // Out-of-bounds vendor values degrade to "no motion".
    Ok(range.filter(|&(start, len)| start > 0 && start < file_len && start + len <= file_len))
}

/// Scan the file tail for an MP4 `ftyp` box. The box starts four bytes
/// before the fourcc; its declared u32 size must be at least 8 and fit in
/// the remainder. A candidate directly preceded by `FF D9` anchors to the
/// primary JPEG end and wins over any other.
fn scan_for_ftyp(data: &[u8]) -> Option<usize> {
    let window_start = data.len().saturating_sub(FTYP_SCAN_WINDOW);
    let mut first_valid = None;
    for pos in window_start..data.len().saturating_sub(4) {
        if &data[pos..pos + 4] != b"ftyp" || pos < window_start + 4 {
            continue;
        }
        let box_start = pos - 4;
        let declared =
            u32::from_be_bytes([data[box_start], data[box_start + 1], data[box_start + 2], data[box_start + 3]])
                as usize;
        if declared < 8 || box_start + declared > data.len() {
            continue;
        }
        if box_start >= 2 && data[box_start - 2..box_start] == jpeg::EOI {
            return Some(box_start);
        }
        first_valid.get_or_insert(box_start);
    }
    first_valid
}

/// Rewrite every known boundary attribute, legacy names and GContainer
/// directory alike, to the new video byte length.
fn rewrite_boundaries(xmp_text: &str, video_len: u64) -> Result<String, WatermarkError> {
    let mut out = xmp_text.to_string();
    let value = video_len.to_string();
    for attr in OFFSET_ATTRS.iter().chain(LENGTH_ATTRS.iter()) {
        out = xmp::update_attribute(&out, attr, &value)?;
    }
    let items = xmp::parse_container_items(&out)?;
    if !items.is_empty() {
        out = xmp::update_item_length(&out, "MotionPhoto", video_len)?;
        out = xmp::zero_item_padding(&out, "Primary")?;
    }
    Ok(out)
}

fn copy_exif(original: &[u8], watermarked: &[u8]) -> Result<Vec<u8>, img_parts::Error> {
    use img_parts::jpeg::Jpeg;
    use img_parts::ImageEXIF;

    let source = Jpeg::from_bytes(original.to_vec().into())?;
    let mut target = Jpeg::from_bytes(watermarked.to_vec().into())?;
    if let Some(exif) = source.exif() {
        target.set_exif(Some(exif));
    }
    Ok(target.encoder().bytes().to_vec())
}
