//! Per-photo processing pipeline.
//!
//! Classifies the input (Ultra HDR container, motion photo, plain still),
//! renders the watermark frame, and writes exactly one output artifact per
//! successful run: `<stem>_watermark.<ext>` next to the input. Container
//! kinds the selected style cannot express degrade to a plain still before
//! any container work starts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::RgbaImage;
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use photomark_container::motion::MotionPhotoSession;
use photomark_container::ultrahdr::{self, ContainerParts};
use photomark_container::video::VideoCompositor;
use photomark_core::config::AppConfig;
use photomark_core::styles::StyleConfig;
use photomark_core::WatermarkError;
use tracing::{debug, info, warn};

use crate::compositor::{compose, ComposeRequest, Fonts};
use crate::{exif, logo};

/// Progress callback: fraction complete plus a stage label.
pub type Progress = Arc<dyn Fn(f32, &str) + Send + Sync>;

pub struct ProcessRequest {
    pub input: PathBuf,
    pub style_id: u32,
    pub quality_tier: String,
    pub logo_preference: Option<String>,
}

/// Shared pipeline dependencies, built once at startup.
pub struct ProcessDeps {
    pub config: Arc<AppConfig>,
    pub styles: Arc<StyleConfig>,
    pub fonts: Arc<Fonts>,
    /// Absent when no video tool was found at startup; motion photos then
    /// fail with a tool error instead of silently losing their video.
    pub video_tool: Option<Arc<dyn VideoCompositor>>,
}

enum Classified {
    Plain,
    Motion(MotionPhotoSession),
    UltraHdr(ContainerParts),
}

/// Run the full pipeline for one photo and return the output path.
pub async fn process_photo(
    request: &ProcessRequest,
    deps: &ProcessDeps,
    progress: &Progress,
) -> Result<PathBuf, WatermarkError> {
    let input = &request.input;
    let data = tokio::fs::read(input).await?;
    let style = deps.styles.resolve(request.style_id);

    let classified = classify(input, &data, style.supports_motion, style.supports_ultrahdr)?;
    let kind = match &classified {
        Classified::Plain => "plain",
        Classified::Motion(_) => "motion",
        Classified::UltraHdr(_) => "ultrahdr",
    };
    debug!(input = %input.display(), kind, style_id = style.style_id, "classified input");

    let photo = decode_source(&classified, &data)?;
    // Camera rotation is baked into the pixels up front so the
    // landscape/portrait decision and the footer placement see the photo
    // as displayed.
    let photo = match exif::orientation(input) {
        3 => image::imageops::rotate180(&photo),
        6 => image::imageops::rotate90(&photo),
        8 => image::imageops::rotate270(&photo),
        _ => photo,
    };
    let (w, h) = photo.dimensions();
    if w as u64 * h as u64 > deps.config.max_image_pixels {
        return Err(WatermarkError::ImageTooLarge {
            width: w,
            height: h,
        });
    }
    progress(0.10, "loaded");

    let make = exif::manufacturer(input)?;
    let brand = deps
        .config
        .normalize_brand(&make)
        .map(str::to_string)
        .unwrap_or_else(|| make.to_lowercase());
    let logo_path = logo::find_logo(
        &deps.config.logos_dir,
        &brand,
        request.logo_preference.as_deref(),
    )?;
    let logo_image = image::open(&logo_path)?.to_rgba8();
    let text = exif::read_exif_text(input)?;
    progress(0.30, "metadata");

    let needs_metadata = !matches!(classified, Classified::Plain);
    let (canvas, metadata) = compose(&ComposeRequest {
        photo: &photo,
        logo: &logo_image,
        camera_lines: &text.camera_lines,
        shooting_lines: &text.shooting_lines,
        style,
        globals: &deps.config.compositor,
        fonts: &deps.fonts,
        needs_metadata,
    })?;
    progress(0.70, "rendered");

    let quality = deps.config.quality_for_tier(&request.quality_tier);
    let encoded = encode_with_exif(&canvas, quality, &data)?;
    progress(0.90, "saving");

    let output = output_path(input);
    match classified {
        Classified::Plain => {
            tokio::fs::write(&output, &encoded).await?;
        }
        Classified::Motion(session) => {
            let tool = deps.video_tool.as_deref().ok_or_else(|| {
                WatermarkError::VideoToolUnavailable {
                    tool: deps.config.ffmpeg_path.clone(),
                }
            })?;
            let metadata = metadata.as_ref().ok_or(WatermarkError::MissingMetadata)?;

            let still = tempfile::Builder::new()
                .suffix(".jpg")
                .tempfile()
                .map_err(WatermarkError::from)?;
            tokio::fs::write(still.path(), &encoded).await?;
            let result = session
                .finalize(still.path(), &output, metadata, tool)
                .await;
            if let Err(err) = session.cleanup() {
                warn!(error = %err, "motion workspace cleanup failed");
            }
            result?;
        }
        Classified::UltraHdr(parts) => {
            let metadata = metadata.as_ref().ok_or(WatermarkError::MissingMetadata)?;
            let gainmap = ultrahdr::expand_gainmap_for_borders(
                &parts.gainmap_jpeg,
                parts.gainmap_xmp.as_deref(),
                (w, h),
                metadata.final_size,
                metadata.content_box,
            )?;
            let rebuilt = rebuild_container(&parts, &encoded, &gainmap)?;
            tokio::fs::write(&output, &rebuilt).await?;
        }
    }

    progress(1.0, "done");
    info!(output = %output.display(), kind, quality, "watermark written");
    Ok(output)
}

/// Container probe order: Ultra HDR split first (cheap signature check),
/// then motion preparation. Styles that cannot carry a container kind skip
/// its probe entirely.
fn classify(
    input: &Path,
    data: &[u8],
    allow_motion: bool,
    allow_ultrahdr: bool,
) -> Result<Classified, WatermarkError> {
    if allow_ultrahdr && ultrahdr::looks_like_ultrahdr(data) {
        match ultrahdr::split(data) {
            Ok(parts) => return Ok(Classified::UltraHdr(parts)),
            Err(err) => debug!(error = %err, "Ultra HDR probe matched but split failed"),
        }
    }
    if allow_motion {
        if let Some(session) = MotionPhotoSession::prepare(input)? {
            return Ok(Classified::Motion(session));
        }
    }
    Ok(Classified::Plain)
}

/// Decode the pixels to watermark: the extracted still for motion photos,
/// the primary image for Ultra HDR, the file itself otherwise.
fn decode_source(classified: &Classified, data: &[u8]) -> Result<RgbaImage, WatermarkError> {
    let image = match classified {
        Classified::Motion(session) => image::open(session.still_path())?,
        Classified::UltraHdr(parts) => image::load_from_memory(&parts.primary_jpeg)?,
        Classified::Plain => image::load_from_memory(data)?,
    };
    Ok(image.to_rgba8())
}

/// JPEG-encode the canvas at the tier quality and carry the original EXIF
/// block over, so shooting parameters survive the re-encode.
fn encode_with_exif(
    canvas: &RgbaImage,
    quality: u8,
    original: &[u8],
) -> Result<Vec<u8>, WatermarkError> {
    let rgb = image::DynamicImage::ImageRgba8(canvas.clone()).to_rgb8();
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, quality).encode(
        rgb.as_raw(),
        rgb.width(),
        rgb.height(),
        image::ExtendedColorType::Rgb8,
    )?;

    let original_exif = Jpeg::from_bytes(Bytes::copy_from_slice(original))
        .ok()
        .and_then(|jpeg| jpeg.exif());
    match original_exif {
        Some(blob) => {
            let mut jpeg = Jpeg::from_bytes(encoded.into())
                .map_err(|e| WatermarkError::unexpected(format!("re-parse failed: {}", e)))?;
            // The canvas is rendered upright; a stale Orientation tag would
            // make viewers rotate it again.
            let mut tiff = blob.to_vec();
            exif::reset_orientation_tag(&mut tiff);
            jpeg.set_exif(Some(tiff.into()));
            Ok(jpeg.encoder().bytes().to_vec())
        }
        None => Ok(encoded),
    }
}

/// Reassemble primary + gain map. The directory length of the primary item
/// depends on the XMP's own size after injection, so the update runs to a
/// fixed point (digit-count changes converge within a few rounds).
fn rebuild_container(
    parts: &ContainerParts,
    primary: &[u8],
    gainmap: &[u8],
) -> Result<Vec<u8>, WatermarkError> {
    let Some(xmp) = parts.primary_xmp.as_deref() else {
        let mut out = primary.to_vec();
        out.extend_from_slice(gainmap);
        return Ok(out);
    };

    let mut primary_len = primary.len() as u64;
    for _ in 0..4 {
        let updated =
            ultrahdr::update_directory_lengths(xmp, primary_len, gainmap.len() as u64)?;
        let rebuilt = ultrahdr::rebuild(primary, &updated, gainmap)?;
        let actual = (rebuilt.len() - gainmap.len()) as u64;
        if actual == primary_len {
            return Ok(rebuilt);
        }
        primary_len = actual;
    }
    Err(WatermarkError::unexpected(
        "container directory lengths failed to converge",
    ))
}

fn output_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("photo");
    let ext = input
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg");
    input.with_file_name(format!("{}_watermark.{}", stem, ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compositor::test_support;
    use crate::exif::fixtures;
    use photomark_core::styles;

    const STYLES: &str = r#"
[styles.1]
display_code = "classic"
"#;

    fn sample_photo_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = image::RgbImage::from_fn(w, h, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 120])
        });
        let mut out = Vec::new();
        JpegEncoder::new_with_quality(&mut out, 90)
            .encode(img.as_raw(), w, h, image::ExtendedColorType::Rgb8)
            .unwrap();
        out
    }

    fn with_exif_blob(jpeg: &[u8], tiff: Vec<u8>) -> Vec<u8> {
        let mut parsed = Jpeg::from_bytes(Bytes::copy_from_slice(jpeg)).unwrap();
        // img-parts stores the EXIF payload without the Exif\0\0 prefix.
        parsed.set_exif(Some(Bytes::from(tiff)));
        parsed.encoder().bytes().to_vec()
    }

    fn with_exif(jpeg: &[u8], make: &str, model: &str) -> Vec<u8> {
        with_exif_blob(jpeg, fixtures::tiff_blob(make, model))
    }

    fn test_deps(logos_dir: &Path, fonts: Fonts) -> ProcessDeps {
        let mut config = AppConfig::default();
        config.logos_dir = logos_dir.to_path_buf();
        ProcessDeps {
            config: Arc::new(config),
            styles: Arc::new(styles::parse(STYLES).unwrap()),
            fonts: Arc::new(fonts),
            video_tool: None,
        }
    }

    fn write_logo(dir: &Path) {
        let logo = image::RgbaImage::from_pixel(64, 32, image::Rgba([0, 0, 0, 255]));
        logo.save(dir.join("canon.png")).unwrap();
    }

    fn no_progress() -> Progress {
        Arc::new(|_, _| {})
    }

    #[tokio::test]
    async fn plain_landscape_produces_single_even_output() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping pipeline test");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write_logo(dir.path());

        let input = dir.path().join("shot.jpg");
        std::fs::write(&input, with_exif(&sample_photo_jpeg(400, 300), "Canon", "EOS R5"))
            .unwrap();

        let deps = test_deps(dir.path(), fonts);
        let request = ProcessRequest {
            input: input.clone(),
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        };
        let output = process_photo(&request, &deps, &no_progress()).await.unwrap();

        assert_eq!(output, dir.path().join("shot_watermark.jpg"));
        let rendered = image::open(&output).unwrap();
        assert_eq!(rendered.width() % 2, 0);
        assert_eq!(rendered.height() % 2, 0);
        // Footer adds roughly 9% of the photo height for landscape input.
        let footer = rendered.height() as i64 - 300;
        assert!((footer - 27).unsigned_abs() <= 1, "footer was {}", footer);
    }

    #[tokio::test]
    async fn camera_rotated_capture_is_made_upright() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping pipeline test");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write_logo(dir.path());

        // 400x300 stored pixels, orientation 6: displays as 300x400
        // portrait after the 90-degree rotation.
        let input = dir.path().join("rotated.jpg");
        std::fs::write(
            &input,
            with_exif_blob(
                &sample_photo_jpeg(400, 300),
                fixtures::tiff_blob_oriented("Canon", "EOS R5", 6),
            ),
        )
        .unwrap();

        let deps = test_deps(dir.path(), fonts);
        let request = ProcessRequest {
            input: input.clone(),
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        };
        let output = process_photo(&request, &deps, &no_progress()).await.unwrap();

        let rendered = image::open(&output).unwrap();
        assert_eq!(rendered.width(), 300);
        // Portrait footer ratio 0.08 of the upright height.
        let footer = rendered.height() as i64 - 400;
        assert!((footer - 32).unsigned_abs() <= 1, "footer was {}", footer);
        // The re-embedded tag reads upright so viewers do not rotate again.
        assert_eq!(exif::orientation(&output), 1);
    }

    #[tokio::test]
    async fn progress_hits_every_checkpoint_in_order() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping pipeline test");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write_logo(dir.path());
        let input = dir.path().join("shot.jpg");
        std::fs::write(&input, with_exif(&sample_photo_jpeg(120, 90), "Canon", "EOS R5"))
            .unwrap();

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let progress: Progress = Arc::new(move |fraction, stage: &str| {
            sink.lock().unwrap().push((fraction, stage.to_string()));
        });

        let deps = test_deps(dir.path(), fonts);
        let request = ProcessRequest {
            input,
            style_id: 1,
            quality_tier: "medium".into(),
            logo_preference: None,
        };
        process_photo(&request, &deps, &progress).await.unwrap();

        let seen = seen.lock().unwrap();
        let fractions: Vec<f32> = seen.iter().map(|(f, _)| *f).collect();
        assert_eq!(fractions, vec![0.10, 0.30, 0.70, 0.90, 1.0]);
        assert_eq!(seen.last().unwrap().1, "done");
    }

    #[tokio::test]
    async fn stripped_exif_fails_without_output() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping pipeline test");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write_logo(dir.path());
        let input = dir.path().join("bare.jpg");
        std::fs::write(&input, sample_photo_jpeg(200, 150)).unwrap();

        let deps = test_deps(dir.path(), fonts);
        let request = ProcessRequest {
            input: input.clone(),
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        };
        let err = process_photo(&request, &deps, &no_progress())
            .await
            .unwrap_err();
        assert!(matches!(err, WatermarkError::MissingExifData));
        assert!(!dir.path().join("bare_watermark.jpg").exists());
    }

    #[tokio::test]
    async fn oversized_photo_fails_fast() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping pipeline test");
            return;
        };
        let dir = tempfile::tempdir().unwrap();
        write_logo(dir.path());
        let input = dir.path().join("big.jpg");
        std::fs::write(&input, with_exif(&sample_photo_jpeg(500, 400), "Canon", "EOS R5"))
            .unwrap();

        let mut deps = test_deps(dir.path(), fonts);
        let mut config = AppConfig::default();
        config.logos_dir = dir.path().to_path_buf();
        config.max_image_pixels = 10_000;
        deps.config = Arc::new(config);

        let request = ProcessRequest {
            input,
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        };
        let err = process_photo(&request, &deps, &no_progress())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            WatermarkError::ImageTooLarge {
                width: 500,
                height: 400
            }
        ));
    }

    #[test]
    fn output_path_keeps_stem_and_extension() {
        assert_eq!(
            output_path(Path::new("/tmp/u/IMG_01.jpeg")),
            PathBuf::from("/tmp/u/IMG_01_watermark.jpeg")
        );
        assert_eq!(
            output_path(Path::new("photo")),
            PathBuf::from("photo_watermark.jpg")
        );
    }
}
