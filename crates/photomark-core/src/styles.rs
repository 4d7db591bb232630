//! Watermark style registry.
//!
//! Styles are declared in a TOML table (`[global]` plus `[styles.N]`). Every
//! enumerated field is validated against its closed set at load time so an
//! unhandled mode can never reach the compositor. Loaded configs are cached
//! by path.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use serde::Deserialize;

use crate::config::{CompositorGlobals, GlassConstants};
use crate::error::WatermarkError;

/// Footer layout family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    SplitLeftRight,
    CenterStack,
}

/// Background treatment behind the photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Background {
    White,
    Frosted,
}

/// How horizontal text padding is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingMode {
    BorderLeft,
    FooterRatio,
}

/// Text color selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextColorMode {
    Black,
    AutoContrast,
}

/// Vertical placement of the centered layout group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionMode {
    FooterCenter,
    BottomOffset,
}

/// A validated, named watermark layout.
#[derive(Debug, Clone)]
pub struct WatermarkStyle {
    pub style_id: u32,
    pub enabled: bool,
    pub display_code: String,
    pub label_zh: String,
    pub label_en: String,
    pub preview_image: String,
    pub layout: Layout,
    pub background: Background,
    pub border_top_ratio: f32,
    pub border_left_ratio: f32,
    pub padding_x_mode: PaddingMode,
    pub padding_x_ratio: f32,
    pub right_divider_line: bool,
    pub center_logo_ratio: f32,
    pub center_gap_ratio: f32,
    pub text_color_mode: TextColorMode,
    pub position_mode: PositionMode,
    pub bottom_offset_portrait_divisor: u32,
    pub bottom_offset_landscape_divisor: u32,
    pub supports_motion: bool,
    pub supports_ultrahdr: bool,
}

/// `[global]` section of the style table.
#[derive(Debug, Clone)]
pub struct StyleGlobals {
    pub default_style_id: u32,
    pub footer_ratio_landscape: f32,
    pub footer_ratio_portrait: f32,
    pub font_size_ratio: f32,
    pub portrait_font_scale: f32,
    pub min_font_size: u32,
}

impl StyleGlobals {
    /// Merge the style-table ratios with the app-level glass constants into
    /// the compositor's parameter block.
    pub fn to_compositor_globals(&self, glass: GlassConstants) -> CompositorGlobals {
        CompositorGlobals {
            footer_ratio_landscape: self.footer_ratio_landscape,
            footer_ratio_portrait: self.footer_ratio_portrait,
            font_size_ratio: self.font_size_ratio,
            portrait_font_scale: self.portrait_font_scale,
            min_font_size: self.min_font_size,
            logo_height_ratio: 0.5,
            glass,
        }
    }
}

/// The loaded and validated style table.
#[derive(Debug, Clone)]
pub struct StyleConfig {
    pub globals: StyleGlobals,
    styles: BTreeMap<u32, WatermarkStyle>,
    default_style_id: u32,
}

impl StyleConfig {
    pub fn get(&self, style_id: u32) -> Option<&WatermarkStyle> {
        self.styles.get(&style_id)
    }

    /// The configured default if present and enabled, else the lowest
    /// enabled id.
    pub fn default_style_id(&self) -> u32 {
        self.default_style_id
    }

    pub fn default_style(&self) -> &WatermarkStyle {
        &self.styles[&self.default_style_id]
    }

    /// Enabled styles in ascending id order.
    pub fn enabled(&self) -> impl Iterator<Item = &WatermarkStyle> {
        self.styles.values().filter(|s| s.enabled)
    }

    /// Resolve a requested style id, falling back to the default for unknown
    /// or disabled styles.
    pub fn resolve(&self, style_id: u32) -> &WatermarkStyle {
        match self.styles.get(&style_id) {
            Some(style) if style.enabled => style,
            _ => self.default_style(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    global: RawGlobals,
    #[serde(default)]
    styles: HashMap<String, RawStyle>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawGlobals {
    default_style_id: u32,
    footer_ratio_landscape: f32,
    footer_ratio_portrait: f32,
    font_size_ratio: f32,
    portrait_font_scale: f32,
    min_font_size: u32,
}

impl Default for RawGlobals {
    fn default() -> Self {
        Self {
            default_style_id: 1,
            footer_ratio_landscape: 0.09,
            footer_ratio_portrait: 0.08,
            font_size_ratio: 0.22,
            portrait_font_scale: 0.75,
            min_font_size: 20,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct RawStyle {
    enabled: bool,
    display_code: String,
    label_zh: String,
    label_en: String,
    preview_image: String,
    layout: String,
    background: String,
    border_top_ratio: f32,
    border_left_ratio: f32,
    padding_x_mode: String,
    padding_x_ratio: f32,
    right_divider_line: bool,
    center_logo_ratio: f32,
    center_gap_ratio: f32,
    text_color_mode: String,
    position_mode: String,
    bottom_offset_portrait_divisor: u32,
    bottom_offset_landscape_divisor: u32,
    supports_motion: bool,
    supports_ultrahdr: bool,
}

impl Default for RawStyle {
    fn default() -> Self {
        Self {
            enabled: true,
            display_code: String::new(),
            label_zh: String::new(),
            label_en: String::new(),
            preview_image: String::new(),
            layout: "split_lr".into(),
            background: "white".into(),
            border_top_ratio: 0.0,
            border_left_ratio: 0.0,
            padding_x_mode: "border_left".into(),
            padding_x_ratio: 0.0,
            right_divider_line: true,
            center_logo_ratio: 0.55,
            center_gap_ratio: 0.15,
            text_color_mode: "black".into(),
            position_mode: "footer_center".into(),
            bottom_offset_portrait_divisor: 4,
            bottom_offset_landscape_divisor: 6,
            supports_motion: true,
            supports_ultrahdr: true,
        }
    }
}

fn invalid(field: impl Into<String>) -> WatermarkError {
    WatermarkError::InvalidStyleConfig {
        field: field.into(),
    }
}

fn validate_style(style_id: u32, raw: RawStyle) -> Result<WatermarkStyle, WatermarkError> {
    let field = |name: &str| format!("styles.{}.{}", style_id, name);

    let layout = match raw.layout.as_str() {
        "split_lr" => Layout::SplitLeftRight,
        "center_stack" => Layout::CenterStack,
        _ => return Err(invalid(field("layout"))),
    };
    let background = match raw.background.as_str() {
        "white" => Background::White,
        "frosted" => Background::Frosted,
        _ => return Err(invalid(field("background"))),
    };
    let padding_x_mode = match raw.padding_x_mode.as_str() {
        "border_left" => PaddingMode::BorderLeft,
        "footer_ratio" => PaddingMode::FooterRatio,
        _ => return Err(invalid(field("padding_x_mode"))),
    };
    let text_color_mode = match raw.text_color_mode.as_str() {
        "black" => TextColorMode::Black,
        "auto_contrast" => TextColorMode::AutoContrast,
        _ => return Err(invalid(field("text_color_mode"))),
    };
    let position_mode = match raw.position_mode.as_str() {
        "footer_center" => PositionMode::FooterCenter,
        "bottom_offset" => PositionMode::BottomOffset,
        _ => return Err(invalid(field("position_mode"))),
    };

    if raw.bottom_offset_portrait_divisor == 0 {
        return Err(invalid(field("bottom_offset_portrait_divisor")));
    }
    if raw.bottom_offset_landscape_divisor == 0 {
        return Err(invalid(field("bottom_offset_landscape_divisor")));
    }

    Ok(WatermarkStyle {
        style_id,
        enabled: raw.enabled,
        display_code: raw.display_code,
        label_zh: raw.label_zh,
        label_en: raw.label_en,
        preview_image: raw.preview_image,
        layout,
        background,
        border_top_ratio: raw.border_top_ratio,
        border_left_ratio: raw.border_left_ratio,
        padding_x_mode,
        padding_x_ratio: raw.padding_x_ratio,
        right_divider_line: raw.right_divider_line,
        center_logo_ratio: raw.center_logo_ratio,
        center_gap_ratio: raw.center_gap_ratio,
        text_color_mode,
        position_mode,
        bottom_offset_portrait_divisor: raw.bottom_offset_portrait_divisor,
        bottom_offset_landscape_divisor: raw.bottom_offset_landscape_divisor,
        supports_motion: raw.supports_motion,
        supports_ultrahdr: raw.supports_ultrahdr,
    })
}

/// Parse and validate a style table from TOML text.
pub fn parse(text: &str) -> Result<StyleConfig, WatermarkError> {
    let raw: RawFile =
        toml::from_str(text).map_err(|e| invalid(format!("parse error: {}", e)))?;

    if raw.styles.is_empty() {
        return Err(invalid("[styles] section is required and cannot be empty"));
    }
    if raw.global.min_font_size < 1 {
        return Err(invalid("global.min_font_size"));
    }

    let mut styles = BTreeMap::new();
    for (key, raw_style) in raw.styles {
        let style_id: u32 = key
            .parse()
            .map_err(|_| invalid(format!("styles.{}: id must be numeric", key)))?;
        styles.insert(style_id, validate_style(style_id, raw_style)?);
    }

    let first_enabled = styles
        .values()
        .find(|s| s.enabled)
        .map(|s| s.style_id)
        .ok_or_else(|| invalid("at least one style must be enabled"))?;

    let configured = raw.global.default_style_id;
    let default_style_id = match styles.get(&configured) {
        Some(style) if style.enabled => configured,
        _ => first_enabled,
    };

    Ok(StyleConfig {
        globals: StyleGlobals {
            default_style_id: configured,
            footer_ratio_landscape: raw.global.footer_ratio_landscape,
            footer_ratio_portrait: raw.global.footer_ratio_portrait,
            font_size_ratio: raw.global.font_size_ratio,
            portrait_font_scale: raw.global.portrait_font_scale,
            min_font_size: raw.global.min_font_size,
        },
        styles,
        default_style_id,
    })
}

/// Load a style table from disk, caching parsed configs by path.
pub fn load(path: &Path) -> Result<Arc<StyleConfig>, WatermarkError> {
    static CACHE: OnceLock<Mutex<HashMap<PathBuf, Arc<StyleConfig>>>> = OnceLock::new();
    let cache = CACHE.get_or_init(|| Mutex::new(HashMap::new()));

    if let Some(config) = cache.lock().unwrap().get(path) {
        return Ok(config.clone());
    }

    let text = std::fs::read_to_string(path)
        .map_err(|e| invalid(format!("config not found: {}: {}", path.display(), e)))?;
    let config = Arc::new(parse(&text)?);
    cache
        .lock()
        .unwrap()
        .insert(path.to_path_buf(), config.clone());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[global]
default_style_id = 1

[styles.1]
display_code = "classic"

[styles.2]
display_code = "glass"
layout = "center_stack"
background = "frosted"
text_color_mode = "auto_contrast"
position_mode = "bottom_offset"
supports_motion = false
"#;

    #[test]
    fn parses_minimal_table() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.default_style_id(), 1);
        let s1 = config.get(1).unwrap();
        assert_eq!(s1.layout, Layout::SplitLeftRight);
        assert_eq!(s1.background, Background::White);
        let s2 = config.get(2).unwrap();
        assert_eq!(s2.layout, Layout::CenterStack);
        assert_eq!(s2.background, Background::Frosted);
        assert!(!s2.supports_motion);
        assert!(s2.supports_ultrahdr);
    }

    #[test]
    fn invalid_layout_names_field() {
        let text = r#"
[styles.3]
layout = "diagonal"
"#;
        let err = parse(text).unwrap_err();
        match err {
            WatermarkError::InvalidStyleConfig { field } => {
                assert_eq!(field, "styles.3.layout");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn missing_or_disabled_default_falls_back_to_lowest_enabled() {
        let text = r#"
[global]
default_style_id = 9

[styles.4]
enabled = false

[styles.5]
display_code = "only"

[styles.7]
display_code = "later"
"#;
        let config = parse(text).unwrap();
        assert_eq!(config.default_style_id(), 5);
    }

    #[test]
    fn single_enabled_style_wins_regardless_of_declared_default() {
        let text = r#"
[global]
default_style_id = 2

[styles.1]
enabled = false

[styles.3]
display_code = "solo"
"#;
        let config = parse(text).unwrap();
        assert_eq!(config.default_style_id(), 3);
    }

    #[test]
    fn all_disabled_is_an_error() {
        let text = r#"
[styles.1]
enabled = false
"#;
        assert!(parse(text).is_err());
    }

    #[test]
    fn zero_divisor_rejected() {
        let text = r#"
[styles.1]
bottom_offset_portrait_divisor = 0
"#;
        let err = parse(text).unwrap_err();
        assert!(matches!(err, WatermarkError::InvalidStyleConfig { ref field }
            if field == "styles.1.bottom_offset_portrait_divisor"));
    }

    #[test]
    fn resolve_falls_back_for_unknown_style() {
        let config = parse(MINIMAL).unwrap();
        assert_eq!(config.resolve(42).style_id, 1);
        assert_eq!(config.resolve(2).style_id, 2);
    }

    #[test]
    fn load_caches_by_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("styles.toml");
        std::fs::write(&path, MINIMAL).unwrap();

        let a = load(&path).unwrap();
        let b = load(&path).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
