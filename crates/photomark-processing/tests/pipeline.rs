//! End-to-end pipeline tests over synthetic container files.
//!
//! Rendering tests need a real font; they look one up in the usual system
//! directories and skip when none is installed.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use img_parts::jpeg::Jpeg;
use img_parts::{Bytes, ImageEXIF};
use photomark_container::jpeg::inject_xmp;
use photomark_container::motion::MotionPhotoSession;
use photomark_container::ultrahdr;
use photomark_core::config::AppConfig;
use photomark_core::{styles, WatermarkError};
use photomark_processing::{process_photo, Fonts, ProcessDeps, ProcessRequest, Progress};

fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn system_fonts() -> Option<Fonts> {
    let mut pending = vec![
        PathBuf::from("/usr/share/fonts"),
        PathBuf::from("/usr/local/share/fonts"),
        PathBuf::from("/System/Library/Fonts"),
    ];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else if matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("ttf") | Some("otf")
            ) {
                if let Ok(fonts) = Fonts::load(&path, &path) {
                    return Some(fonts);
                }
            }
        }
    }
    None
}

/// Minimal little-endian TIFF with just `Make` and `Model` in IFD0, enough
/// for manufacturer detection; shooting fields degrade to placeholders.
fn tiff_make_model(make: &str, model: &str) -> Vec<u8> {
    let make_bytes = format!("{}\0", make).into_bytes();
    let model_bytes = format!("{}\0", model).into_bytes();
    let data_start = 8 + 2 + 2 * 12 + 4;

    let mut tiff = Vec::new();
    tiff.extend_from_slice(b"II");
    tiff.extend_from_slice(&42u16.to_le_bytes());
    tiff.extend_from_slice(&8u32.to_le_bytes());
    tiff.extend_from_slice(&2u16.to_le_bytes());
    for (tag, value, offset) in [
        (0x010Fu16, &make_bytes, data_start),
        (0x0110u16, &model_bytes, data_start + make_bytes.len()),
    ] {
        tiff.extend_from_slice(&tag.to_le_bytes());
        tiff.extend_from_slice(&2u16.to_le_bytes());
        tiff.extend_from_slice(&(value.len() as u32).to_le_bytes());
        if value.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..value.len()].copy_from_slice(value);
            tiff.extend_from_slice(&inline);
        } else {
            tiff.extend_from_slice(&(offset as u32).to_le_bytes());
        }
    }
    tiff.extend_from_slice(&0u32.to_le_bytes());
    tiff.extend_from_slice(&make_bytes);
    tiff.extend_from_slice(&model_bytes);
    tiff
}

fn encode_jpeg_rgb(w: u32, h: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(w, h, |x, y| {
        image::Rgb([(x * 2 % 256) as u8, (y * 3 % 256) as u8, 90])
    });
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, 90)
        .encode(img.as_raw(), w, h, image::ExtendedColorType::Rgb8)
        .unwrap();
    out
}

fn with_canon_exif(jpeg: &[u8]) -> Vec<u8> {
    let mut parsed = Jpeg::from_bytes(Bytes::copy_from_slice(jpeg)).unwrap();
    parsed.set_exif(Some(Bytes::from(tiff_make_model("Canon", "EOS R5"))));
    parsed.encoder().bytes().to_vec()
}

fn write_logo(dir: &Path) {
    let logo = image::RgbaImage::from_pixel(64, 32, image::Rgba([0, 0, 0, 255]));
    logo.save(dir.join("canon.png")).unwrap();
}

fn deps(logos_dir: &Path, fonts: Fonts, styles_toml: &str) -> ProcessDeps {
    let mut config = AppConfig::default();
    config.logos_dir = logos_dir.to_path_buf();
    ProcessDeps {
        config: Arc::new(config),
        styles: Arc::new(styles::parse(styles_toml).unwrap()),
        fonts: Arc::new(fonts),
        video_tool: None,
    }
}

fn no_progress() -> Progress {
    Arc::new(|_, _| {})
}

fn gainmap_jpeg_with_xmp() -> Vec<u8> {
    let gray = image::GrayImage::from_pixel(100, 75, image::Luma([200]));
    let mut encoded = Vec::new();
    JpegEncoder::new_with_quality(&mut encoded, 100)
        .encode(gray.as_raw(), 100, 75, image::ExtendedColorType::L8)
        .unwrap();
    let xmp = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF>
      <rdf:Description hdrgm:Version="1.0" hdrgm:GainMapMin="-1.0" hdrgm:GainMapMax="1.0" hdrgm:Gamma="1.0"/>
    </rdf:RDF></x:xmpmeta>"#;
    inject_xmp(&encoded, xmp).unwrap()
}

fn ultrahdr_file() -> Vec<u8> {
    let gainmap = gainmap_jpeg_with_xmp();
    let primary = with_canon_exif(&encode_jpeg_rgb(200, 150));
    let xmp = format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF>
      <rdf:Description hdrgm:Version="1.0">
        <Container:Directory><rdf:Seq>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="Primary" Item:Mime="image/jpeg"/>
          </rdf:li>
          <rdf:li rdf:parseType="Resource">
            <Container:Item Item:Semantic="GainMap" Item:Mime="image/jpeg" Item:Length="{}"/>
          </rdf:li>
        </rdf:Seq></Container:Directory>
      </rdf:Description>
    </rdf:RDF></x:xmpmeta>"#,
        gainmap.len()
    );
    let mut out = inject_xmp(&primary, &xmp).unwrap();
    out.extend_from_slice(&gainmap);
    out
}

fn motion_file(video_len: usize) -> Vec<u8> {
    let still = with_canon_exif(&encode_jpeg_rgb(160, 120));
    let xmp = format!(
        r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF>
      <rdf:Description GCamera:MicroVideo="1" GCamera:MicroVideoVersion="1"
        GCamera:MicroVideoOffset="{len}" GCamera:MicroVideoLength="{len}"/>
    </rdf:RDF></x:xmpmeta>"#,
        len = video_len
    );
    let mut out = inject_xmp(&still, &xmp).unwrap();
    let mut video = vec![0u8; video_len];
    video[..4].copy_from_slice(&16u32.to_be_bytes());
    video[4..8].copy_from_slice(b"ftyp");
    out.extend_from_slice(&video);
    out
}

#[tokio::test]
async fn ultrahdr_round_trip_scales_gainmap_and_fills_neutral() {
    init_logging();
    let Some(fonts) = system_fonts() else {
        eprintln!("no system font found, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    write_logo(dir.path());
    let input = dir.path().join("hdr.jpg");
    std::fs::write(&input, ultrahdr_file()).unwrap();

    let deps = deps(dir.path(), fonts, "[styles.1]\ndisplay_code = \"classic\"\n");
    let output = process_photo(
        &ProcessRequest {
            input,
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        },
        &deps,
        &no_progress(),
    )
    .await
    .unwrap();

    let bytes = std::fs::read(&output).unwrap();
    let parts = ultrahdr::split(&bytes).unwrap();
    let primary = image::load_from_memory(&parts.primary_jpeg).unwrap();
    assert_eq!(primary.width() % 2, 0);
    assert_eq!(primary.height() % 2, 0);
    assert!(primary.height() > 150);

    // The gain map grew with the primary; its new bottom band carries the
    // neutral value for min -1 / max 1, which encodes to 128.
    let gm = image::load_from_memory(&parts.gainmap_jpeg).unwrap().to_luma8();
    assert_eq!(gm.width(), 100);
    assert!(gm.height() > 75);
    let band: Vec<u8> = (76..gm.height())
        .flat_map(|y| (0..gm.width()).map(move |x| (x, y)))
        .map(|(x, y)| gm.get_pixel(x, y).0[0])
        .collect();
    let mean = band.iter().map(|&v| v as u64).sum::<u64>() / band.len() as u64;
    assert!((127..=129).contains(&mean), "neutral band mean was {}", mean);
}

#[tokio::test]
async fn motion_photo_degrades_to_plain_when_style_forbids_motion() {
    init_logging();
    let Some(fonts) = system_fonts() else {
        eprintln!("no system font found, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    write_logo(dir.path());
    let input = dir.path().join("moving.jpg");
    std::fs::write(&input, motion_file(40_000)).unwrap();

    let deps = deps(
        dir.path(),
        fonts,
        "[styles.1]\ndisplay_code = \"classic\"\nsupports_motion = false\n",
    );
    let output = process_photo(
        &ProcessRequest {
            input,
            style_id: 1,
            quality_tier: "medium".into(),
            logo_preference: None,
        },
        &deps,
        &no_progress(),
    )
    .await
    .unwrap();

    // The output is a plain still: decodable, no embedded video.
    assert!(image::open(&output).is_ok());
    assert!(MotionPhotoSession::prepare(&output).unwrap().is_none());
}

#[tokio::test]
async fn motion_photo_without_video_tool_fails_loudly() {
    init_logging();
    let Some(fonts) = system_fonts() else {
        eprintln!("no system font found, skipping");
        return;
    };
    let dir = tempfile::tempdir().unwrap();
    write_logo(dir.path());
    let input = dir.path().join("moving.jpg");
    std::fs::write(&input, motion_file(40_000)).unwrap();

    let deps = deps(dir.path(), fonts, "[styles.1]\ndisplay_code = \"classic\"\n");
    let err = process_photo(
        &ProcessRequest {
            input: input.clone(),
            style_id: 1,
            quality_tier: "high".into(),
            logo_preference: None,
        },
        &deps,
        &no_progress(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, WatermarkError::VideoToolUnavailable { .. }));
    assert!(!dir.path().join("moving_watermark.jpg").exists());
}
