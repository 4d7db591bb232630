//! EXIF reading and watermark text derivation.
//!
//! The watermark carries two text blocks: camera lines (lens, body) and
//! shooting lines (exposure triple, capture time). Optional fields degrade
//! to placeholder strings; only a wholly unreadable EXIF block is an error.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{Exif, In, Reader, Tag, Value};
use photomark_core::WatermarkError;

/// Text blocks rendered into the watermark footer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExifText {
    /// Lens model, then camera body.
    pub camera_lines: [String; 2],
    /// Exposure triple, then capture datetime.
    pub shooting_lines: [String; 2],
}

fn read_container(path: &Path) -> Result<Exif, exif::Error> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    Reader::new().read_from_container(&mut reader)
}

fn ascii_field(exif: &Exif, tag: Tag) -> Option<String> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Ascii(values) => values
            .first()
            .map(|v| String::from_utf8_lossy(v).trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

fn rational_field(exif: &Exif, tag: Tag) -> Option<f64> {
    let field = exif.get_field(tag, In::PRIMARY)?;
    match &field.value {
        Value::Rational(values) => values
            .first()
            .filter(|r| r.denom != 0)
            .map(|r| r.to_f64()),
        _ => None,
    }
}

fn uint_field(exif: &Exif, tag: Tag) -> Option<u32> {
    exif.get_field(tag, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
}

/// Manufacturer from the `Make` tag, letters only.
///
/// An unreadable file or a `Make` tag with no alphabetic content is
/// `MissingExifData`; normalization against brand aliases happens in the
/// caller.
pub fn manufacturer(path: &Path) -> Result<String, WatermarkError> {
    let exif = read_container(path).map_err(|_| WatermarkError::MissingExifData)?;
    let make = ascii_field(&exif, Tag::Make).ok_or(WatermarkError::MissingExifData)?;
    let letters: String = make.chars().filter(|c| c.is_ascii_alphabetic()).collect();
    if letters.is_empty() {
        return Err(WatermarkError::MissingExifData);
    }
    Ok(letters)
}

/// EXIF `Orientation`, defaulting to upright when the tag or the whole
/// block is unreadable.
pub fn orientation(path: &Path) -> u32 {
    read_container(path)
        .ok()
        .and_then(|exif| uint_field(&exif, Tag::Orientation))
        .unwrap_or(1)
}

/// Patch the `Orientation` tag in a raw TIFF blob to upright, in place.
///
/// Runs after the rotation has been baked into the pixels, otherwise
/// viewers that honor the re-embedded tag rotate a second time. Only IFD0
/// is searched; a blob too short or not TIFF-shaped is left untouched.
/// Returns whether a tag was found.
pub fn reset_orientation_tag(tiff: &mut [u8]) -> bool {
    if tiff.len() < 8 {
        return false;
    }
    let le = match &tiff[0..2] {
        b"II" => true,
        b"MM" => false,
        _ => return false,
    };
    let read_u16 = |b: &[u8]| {
        let pair = [b[0], b[1]];
        if le {
            u16::from_le_bytes(pair)
        } else {
            u16::from_be_bytes(pair)
        }
    };
    let ifd = {
        let quad = [tiff[4], tiff[5], tiff[6], tiff[7]];
        if le {
            u32::from_le_bytes(quad)
        } else {
            u32::from_be_bytes(quad)
        }
    } as usize;
    if ifd + 2 > tiff.len() {
        return false;
    }
    let count = read_u16(&tiff[ifd..ifd + 2]) as usize;
    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        if entry + 12 > tiff.len() {
            return false;
        }
        if read_u16(&tiff[entry..entry + 2]) == 0x0112 {
            let upright = if le { 1u16.to_le_bytes() } else { 1u16.to_be_bytes() };
            tiff[entry + 8..entry + 10].copy_from_slice(&upright);
            return true;
        }
    }
    false
}

/// Derive the two watermark text blocks from a photo's EXIF.
pub fn read_exif_text(path: &Path) -> Result<ExifText, WatermarkError> {
    let exif = read_container(path).map_err(|e| WatermarkError::ExifRead {
        detail: Some(e.to_string()),
    })?;

    let lens = ascii_field(&exif, Tag::LensModel)
        .unwrap_or_else(|| "Unknown Lens".to_string())
        // The hooked italic f is what aperture markings actually use.
        .replace('f', "\u{0192}");
    let model: String = ascii_field(&exif, Tag::Model)
        .unwrap_or_else(|| "Unknown Model".to_string())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == ' ')
        .collect();

    let focal = uint_field(&exif, Tag::FocalLengthIn35mmFilm)
        .filter(|v| *v > 0)
        .or_else(|| rational_field(&exif, Tag::FocalLength).map(|v| v.round() as u32))
        .unwrap_or(0);
    let f_number = rational_field(&exif, Tag::FNumber).unwrap_or(0.0);
    let exposure = rational_field(&exif, Tag::ExposureTime).unwrap_or(0.0);
    let iso = uint_field(&exif, Tag::PhotographicSensitivity).unwrap_or(0);

    let datetime = ascii_field(&exif, Tag::DateTimeOriginal)
        .map(|raw| reformat_datetime(&raw))
        .unwrap_or_else(|| "Unknown Date".to_string());

    let params = if focal > 0 && f_number > 0.0 && exposure > 0.0 {
        format!(
            "{}mm  \u{0192}/{}  {}  ISO{}",
            focal,
            format_aperture(f_number),
            format_exposure(exposure),
            iso
        )
    } else {
        "Invalid shooting info".to_string()
    };

    Ok(ExifText {
        camera_lines: [lens, model],
        shooting_lines: [params, datetime],
    })
}

/// Capture time with the date part switched from `:` to `.` separators
/// (`2023:05:01 10:00:00` reads as a date, not a ratio).
fn reformat_datetime(raw: &str) -> String {
    let raw = raw.replace('T', " ");
    match raw.split_once(' ') {
        Some((date, time)) if date.contains(':') => {
            format!("{} {}", date.replace(':', "."), time)
        }
        _ => raw,
    }
}

fn format_aperture(value: f64) -> String {
    if (value - value.round()).abs() < 1e-6 {
        format!("{:.1}", value)
    } else {
        format!("{}", (value * 10.0).round() / 10.0)
    }
}

/// Sub-second exposures render as `1/Ns`, longer ones as plain seconds.
fn format_exposure(value: f64) -> String {
    if value < 1.0 {
        format!("1/{}s", (1.0 / value) as u64)
    } else if (value - value.round()).abs() < 1e-6 {
        format!("{}s", value as u64)
    } else {
        format!("{}s", value)
    }
}
