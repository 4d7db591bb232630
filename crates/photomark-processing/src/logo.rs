//! Brand logo resolution.
//!
//! Logos live as loose image files named after the brand. Matching is a
//! prefix test in both directions so `nikoncorporation` finds `nikon.png`
//! and `sony` finds `sonyalpha.png`. A manufacturer with no logo is a hard
//! failure; silently shipping an unbranded watermark is worse than
//! rejecting the photo.

use std::path::{Path, PathBuf};

use photomark_core::WatermarkError;
use tracing::debug;

/// Find the logo asset for a normalized manufacturer name.
///
/// `preference` wins when a brand ships several logo variants (a file whose
/// stem equals the preference exactly).
pub fn find_logo(
    logos_dir: &Path,
    manufacturer: &str,
    preference: Option<&str>,
) -> Result<PathBuf, WatermarkError> {
    let needle = manufacturer
        .split_whitespace()
        .next()
        .unwrap_or(manufacturer)
        .to_lowercase();

    let mut fallback = None;
    for entry in walk(logos_dir)? {
        let stem = match entry.file_stem().and_then(|s| s.to_str()) {
            Some(stem) => stem.to_lowercase(),
            None => continue,
        };
        if let Some(pref) = preference {
            if stem == pref.to_lowercase() {
                debug!(logo = %entry.display(), "preferred logo selected");
                return Ok(entry);
            }
        }
        if (stem.starts_with(&needle) || needle.starts_with(&stem)) && fallback.is_none() {
            fallback = Some(entry);
        }
    }

    fallback.ok_or_else(|| WatermarkError::UnsupportedManufacturer {
        manufacturer: manufacturer.to_string(),
    })
}

fn walk(dir: &Path) -> Result<Vec<PathBuf>, WatermarkError> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                pending.push(path);
            } else {
                files.push(path);
            }
        }
    }
    files.sort();
    Ok(files)
}
