//! Configuration module
//!
//! Centralized application settings: paths, processing limits, retention
//! windows, worker sizing, and the compositor's geometry constants.
//! Values can be overridden via environment variables at startup.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;

const DEFAULT_MAX_IMAGE_PIXELS: u64 = 100_000_000;
const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_TASK_RETENTION_SECS: u64 = 3600;
const DEFAULT_ARCHIVE_RETENTION_SECS: u64 = 3600;
const DEFAULT_UPLOAD_RETENTION_SECS: u64 = 86_400;
const DEFAULT_BURN_TTL_SECS: u64 = 120;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 10;

/// Geometry constants for the frosted-glass background effect.
#[derive(Clone, Debug)]
pub struct GlassConstants {
    /// Canvas enlargement relative to the source photo.
    pub bg_scale: f32,
    /// Drop-shadow rectangle enlargement relative to the photo.
    pub shadow_scale: f32,
    /// Corner radius as a fraction of the shorter photo edge.
    pub corner_radius_factor: f32,
    /// Blur sigma as a fraction of the shorter photo edge.
    pub blur_radius_factor: f32,
    /// Darkening overlay gray level applied to the background.
    pub glass_color: u8,
    /// Upward photo offset as a fraction of canvas height.
    pub offset_factor: f32,
    /// Mean-luma threshold above which auto-contrast picks black text.
    pub brightness_threshold: u8,
}

impl Default for GlassConstants {
    fn default() -> Self {
        Self {
            bg_scale: 1.15,
            shadow_scale: 1.02,
            corner_radius_factor: 0.035,
            blur_radius_factor: 0.025,
            glass_color: 180,
            offset_factor: 0.025,
            brightness_threshold: 130,
        }
    }
}

/// Compositor sizing ratios shared by every style.
#[derive(Clone, Debug)]
pub struct CompositorGlobals {
    pub footer_ratio_landscape: f32,
    pub footer_ratio_portrait: f32,
    pub font_size_ratio: f32,
    pub portrait_font_scale: f32,
    pub min_font_size: u32,
    pub logo_height_ratio: f32,
    pub glass: GlassConstants,
}

impl Default for CompositorGlobals {
    fn default() -> Self {
        Self {
            footer_ratio_landscape: 0.09,
            footer_ratio_portrait: 0.08,
            font_size_ratio: 0.22,
            portrait_font_scale: 0.75,
            min_font_size: 20,
            logo_height_ratio: 0.5,
            glass: GlassConstants::default(),
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub upload_dir: PathBuf,
    pub logos_dir: PathBuf,
    pub font_path_bold: PathBuf,
    pub font_path_light: PathBuf,
    pub style_config_path: PathBuf,

    pub max_image_pixels: u64,
    pub allowed_extensions: Vec<String>,

    pub worker_count: usize,
    pub task_retention_secs: u64,
    pub archive_retention_secs: u64,
    pub upload_retention_secs: u64,
    pub burn_ttl_secs: u64,
    pub sweep_interval_secs: u64,

    pub ffmpeg_path: String,
    pub ffprobe_path: String,

    pub compositor: CompositorGlobals,
    brand_aliases: HashMap<&'static str, &'static str>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("upload"),
            logos_dir: PathBuf::from("logos"),
            font_path_bold: PathBuf::from("fonts/AlibabaPuHuiTi-2-85-Bold.otf"),
            font_path_light: PathBuf::from("fonts/AlibabaPuHuiTi-2-45-Light.otf"),
            style_config_path: PathBuf::from("config/watermark_styles.toml"),
            max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            allowed_extensions: vec!["png".into(), "jpg".into(), "jpeg".into()],
            worker_count: DEFAULT_WORKER_COUNT,
            task_retention_secs: DEFAULT_TASK_RETENTION_SECS,
            archive_retention_secs: DEFAULT_ARCHIVE_RETENTION_SECS,
            upload_retention_secs: DEFAULT_UPLOAD_RETENTION_SECS,
            burn_ttl_secs: DEFAULT_BURN_TTL_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
            ffmpeg_path: "ffmpeg".into(),
            ffprobe_path: "ffprobe".into(),
            compositor: CompositorGlobals::default(),
            brand_aliases: default_brand_aliases(),
        }
    }
}

fn default_brand_aliases() -> HashMap<&'static str, &'static str> {
    HashMap::from([
        ("sonycamera", "sony"),
        ("sonycorporation", "sony"),
        ("nikoncorporation", "nikon"),
        ("canoninc", "canon"),
        ("canoncamera", "canon"),
        ("fujifilmcorporation", "fujifilm"),
        ("fujifilmholdings", "fujifilm"),
        ("olympuscorporation", "olympus"),
        ("panasoniccorporation", "panasonic"),
        ("panasoniccorporationimaging", "panasonic"),
        ("leicacameraag", "leica"),
        ("pentaxricohimaging", "pentax"),
        ("xiaomi", "xiaomi"),
        ("apple", "apple"),
        ("oppo", "oppo"),
    ])
}

impl AppConfig {
    /// Load configuration from the environment, falling back to defaults.
    /// A `.env` file in the working directory is read first when present.
    pub fn from_env() -> Result<Self, anyhow::Error> {
        let _ = dotenvy::dotenv();
        let mut config = AppConfig::default();

        if let Ok(dir) = env::var("UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("LOGOS_DIR") {
            config.logos_dir = PathBuf::from(dir);
        }
        if let Ok(path) = env::var("STYLE_CONFIG_PATH") {
            config.style_config_path = PathBuf::from(path);
        }
        if let Ok(pixels) = env::var("MAX_IMAGE_PIXELS") {
            config.max_image_pixels = pixels.parse()?;
        }
        if let Ok(workers) = env::var("WORKER_COUNT") {
            config.worker_count = workers.parse()?;
        }
        if let Ok(secs) = env::var("TASK_RETENTION_SECS") {
            config.task_retention_secs = secs.parse()?;
        }
        if let Ok(secs) = env::var("BURN_TTL_SECS") {
            config.burn_ttl_secs = secs.parse()?;
        }
        if let Ok(secs) = env::var("SWEEP_INTERVAL_SECS") {
            config.sweep_interval_secs = secs.parse()?;
        }
        if let Ok(path) = env::var("FFMPEG_PATH") {
            config.ffmpeg_path = path;
        }
        if let Ok(path) = env::var("FFPROBE_PATH") {
            config.ffprobe_path = path;
        }

        config.validate()?;
        tracing::debug!(
            upload_dir = %config.upload_dir.display(),
            worker_count = config.worker_count,
            max_image_pixels = config.max_image_pixels,
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.max_image_pixels == 0 {
            anyhow::bail!("max_image_pixels must be positive");
        }
        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be positive");
        }
        if self.sweep_interval_secs == 0 {
            anyhow::bail!("sweep_interval_secs must be positive");
        }
        if self.task_retention_secs == 0 || self.burn_ttl_secs == 0 {
            anyhow::bail!("retention windows must be positive");
        }
        let c = &self.compositor;
        for (name, value) in [
            ("footer_ratio_landscape", c.footer_ratio_landscape),
            ("footer_ratio_portrait", c.footer_ratio_portrait),
            ("font_size_ratio", c.font_size_ratio),
            ("logo_height_ratio", c.logo_height_ratio),
        ] {
            if !(0.0..1.0).contains(&value) || value == 0.0 {
                anyhow::bail!("{} must be between 0 and 1", name);
            }
        }
        if c.min_font_size < 1 {
            anyhow::bail!("min_font_size must be >= 1");
        }
        Ok(())
    }

    /// Normalize a raw EXIF manufacturer string to a known brand name.
    pub fn normalize_brand(&self, manufacturer: &str) -> Option<&'static str> {
        let normalized: String = manufacturer
            .to_lowercase()
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-')
            .collect();
        self.brand_aliases.get(normalized.as_str()).copied()
    }

    /// JPEG quality for a named tier; unknown tiers get top quality.
    pub fn quality_for_tier(&self, tier: &str) -> u8 {
        match tier {
            "high" => 100,
            "medium" => 85,
            "low" => 75,
            _ => 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        AppConfig::default().validate().unwrap();
    }

    #[test]
    fn brand_aliases_normalize_spacing_and_case() {
        let config = AppConfig::default();
        assert_eq!(config.normalize_brand("SONY Corporation"), Some("sony"));
        assert_eq!(config.normalize_brand("NIKON CORPORATION"), Some("nikon"));
        assert_eq!(config.normalize_brand("Canon Inc"), Some("canon"));
        assert_eq!(config.normalize_brand("Unheard Of"), None);
    }

    #[test]
    fn quality_tiers() {
        let config = AppConfig::default();
        assert_eq!(config.quality_for_tier("high"), 100);
        assert_eq!(config.quality_for_tier("medium"), 85);
        assert_eq!(config.quality_for_tier("low"), 75);
        assert_eq!(config.quality_for_tier("ultra"), 100);
    }

    #[test]
    fn zero_workers_rejected() {
        let mut config = AppConfig::default();
        config.worker_count = 0;
        assert!(config.validate().is_err());
    }
}
