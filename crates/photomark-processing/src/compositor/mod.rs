//! Watermark compositor.
//!
//! Lays out the footer text, logo and background frame around a decoded
//! photo per the selected style, and reports where the untouched pixels
//! ended up when a container rebuild needs to replay the overlay.
//!
//! Auto-contrast samples the source photo only, not the final frame; a
//! solid background can therefore still pick a low-contrast color. That
//! matches the shipped behavior and is left as is.

mod frame;

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::imageops::FilterType;
use image::{imageops, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use photomark_container::types::{ContentBox, WatermarkMetadata};
use photomark_core::config::CompositorGlobals;
use photomark_core::styles::{Layout, PositionMode, TextColorMode, WatermarkStyle};
use photomark_core::WatermarkError;
use tracing::debug;

use frame::Frame;

const DIVIDER_GRAY: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// Bold and light faces used by every layout.
pub struct Fonts {
    pub bold: FontVec,
    pub light: FontVec,
}

impl Fonts {
    pub fn load(bold: &Path, light: &Path) -> Result<Self, WatermarkError> {
        let load = |path: &Path| -> Result<FontVec, WatermarkError> {
            let bytes = std::fs::read(path)?;
            FontVec::try_from_vec(bytes)
                .map_err(|_| WatermarkError::unexpected(format!("bad font: {}", path.display())))
        };
        Ok(Fonts {
            bold: load(bold)?,
            light: load(light)?,
        })
    }
}

pub struct ComposeRequest<'a> {
    pub photo: &'a RgbaImage,
    pub logo: &'a RgbaImage,
    /// Lens model, then camera body.
    pub camera_lines: &'a [String; 2],
    /// Exposure triple, then capture time.
    pub shooting_lines: &'a [String; 2],
    pub style: &'a WatermarkStyle,
    pub globals: &'a CompositorGlobals,
    pub fonts: &'a Fonts,
    /// A motion or Ultra HDR rebuild downstream needs the overlay and
    /// content box.
    pub needs_metadata: bool,
}

/// Render the watermark frame.
///
/// The returned canvas always has even dimensions (1 px replicated on the
/// right/bottom when needed, video encoders reject odd sizes). Metadata,
/// when requested, satisfies: content box inside the canvas, box size equal
/// to the input photo size.
pub fn compose(
    req: &ComposeRequest,
) -> Result<(RgbaImage, Option<WatermarkMetadata>), WatermarkError> {
    let (w, h) = req.photo.dimensions();
    if w == 0 || h == 0 {
        return Err(WatermarkError::malformed("empty photo"));
    }
    let landscape = w >= h;
    let g = req.globals;

    let footer_ratio = if landscape {
        g.footer_ratio_landscape
    } else {
        g.footer_ratio_portrait
    };
    let footer_h = ((h as f32 * footer_ratio).round() as u32).max(1);

    let mut font_px = footer_h as f32 * g.font_size_ratio;
    if !landscape {
        font_px *= g.portrait_font_scale;
    }
    let font_px = font_px.max(g.min_font_size as f32);

    let Frame {
        mut canvas,
        content,
    } = frame::build(req.photo, req.style, footer_h, &g.glass);

    let text_color = match req.style.text_color_mode {
        TextColorMode::Black => Rgba([0, 0, 0, 255]),
        TextColorMode::AutoContrast => {
            auto_contrast_color(req.photo, g.glass.brightness_threshold)
        }
    };

    let footer_top = canvas.height() - footer_h;
    match req.style.layout {
        Layout::SplitLeftRight => draw_split_layout(
            &mut canvas, req, footer_top, footer_h, font_px, text_color, &content,
        ),
        Layout::CenterStack => draw_center_layout(
            &mut canvas, req, footer_top, footer_h, font_px, text_color, landscape,
        ),
    }

    let canvas = pad_to_even(canvas);
    debug!(
        canvas_w = canvas.width(),
        canvas_h = canvas.height(),
        content_x = content.x,
        content_y = content.y,
        "composited watermark frame"
    );

    let metadata = req.needs_metadata.then(|| {
        let mut overlay = canvas.clone();
        for y in content.y..content.y + content.height {
            for x in content.x..content.x + content.width {
                overlay.put_pixel(x, y, Rgba([0, 0, 0, 0]));
            }
        }
        WatermarkMetadata {
            overlay,
            content_box: content,
            final_size: (canvas.width(), canvas.height()),
        }
    });

    Ok((canvas, metadata))
}

/// Black text only when both the whole photo and its bottom half read
/// bright; dark scenes and dark ground both force white.
fn auto_contrast_color(photo: &RgbaImage, threshold: u8) -> Rgba<u8> {
    let gray = imageops::grayscale(photo);
    let (w, h) = gray.dimensions();
    let total: u64 = gray.pixels().map(|p| p.0[0] as u64).sum();
    let full_mean = total / (w as u64 * h as u64);

    let half_start = h / 2;
    let bottom: u64 = (half_start..h)
        .flat_map(|y| (0..w).map(move |x| (x, y)))
        .map(|(x, y)| gray.get_pixel(x, y).0[0] as u64)
        .sum();
    let bottom_rows = (h - half_start).max(1) as u64;
    let bottom_mean = bottom / (bottom_rows * w as u64);

    if full_mean > threshold as u64 && bottom_mean > threshold as u64 {
        Rgba([0, 0, 0, 255])
    } else {
        Rgba([255, 255, 255, 255])
    }
}

fn horizontal_padding(
    style: &WatermarkStyle,
    content: &ContentBox,
    footer_h: u32,
) -> u32 {
    match style.padding_x_mode {
        photomark_core::styles::PaddingMode::BorderLeft => content.x,
        photomark_core::styles::PaddingMode::FooterRatio => {
            (footer_h as f32 * style.padding_x_ratio).round() as u32
        }
    }
}

fn scaled_logo(logo: &RgbaImage, target_h: u32) -> RgbaImage {
    let target_h = target_h.max(1);
    let (lw, lh) = logo.dimensions();
    let target_w = ((lw as f32 * target_h as f32 / lh.max(1) as f32).round() as u32).max(1);
    imageops::resize(logo, target_w, target_h, FilterType::Lanczos3)
}

/// Camera block flush left, logo + divider + shooting block flush right,
/// all centered on the footer's horizontal midline.
#[allow(clippy::too_many_arguments)]
fn draw_split_layout(
    canvas: &mut RgbaImage,
    req: &ComposeRequest,
    footer_top: u32,
    footer_h: u32,
    font_px: f32,
    color: Rgba<u8>,
    content: &ContentBox,
) {
    let scale = PxScale::from(font_px);
    let pad_x = horizontal_padding(req.style, content, footer_h);
    let line_gap = (font_px * 0.35).round() as u32;
    let mid = footer_top + footer_h / 2;

    let (_, bold_h) = text_size(scale, &req.fonts.bold, "Ag");
    let (_, light_h) = text_size(scale, &req.fonts.light, "Ag");
    let block_h = bold_h + line_gap + light_h;
    let top_y = mid.saturating_sub(block_h / 2);

    // Left block: lens over body.
    draw_text_mut(
        canvas,
        color,
        pad_x as i32,
        top_y as i32,
        scale,
        &req.fonts.bold,
        &req.camera_lines[0],
    );
    draw_text_mut(
        canvas,
        color,
        pad_x as i32,
        (top_y + bold_h + line_gap) as i32,
        scale,
        &req.fonts.light,
        &req.camera_lines[1],
    );

    // Right block: exposure triple over datetime, right-aligned.
    let (w0, _) = text_size(scale, &req.fonts.bold, &req.shooting_lines[0]);
    let (w1, _) = text_size(scale, &req.fonts.light, &req.shooting_lines[1]);
    let block_w = w0.max(w1);
    let block_left = canvas.width().saturating_sub(pad_x + block_w);
    draw_text_mut(
        canvas,
        color,
        (block_left + block_w - w0) as i32,
        top_y as i32,
        scale,
        &req.fonts.bold,
        &req.shooting_lines[0],
    );
    draw_text_mut(
        canvas,
        color,
        (block_left + block_w - w1) as i32,
        (top_y + bold_h + line_gap) as i32,
        scale,
        &req.fonts.light,
        &req.shooting_lines[1],
    );

    let gap = font_px.round() as u32;
    let mut logo_right = block_left;
    if req.style.right_divider_line && block_left > gap + 2 {
        let divider_x = block_left - gap;
        draw_filled_rect_mut(
            canvas,
            Rect::at((divider_x - 1) as i32, top_y as i32).of_size(2, block_h),
            DIVIDER_GRAY,
        );
        logo_right = divider_x;
    }

    let logo = scaled_logo(
        req.logo,
        (footer_h as f32 * req.globals.logo_height_ratio).round() as u32,
    );
    let logo_x = logo_right.saturating_sub(gap + logo.width());
    let logo_y = mid.saturating_sub(logo.height() / 2);
    imageops::overlay(canvas, &logo, logo_x as i64, logo_y as i64);
}

/// Logo stacked over a single shooting line, group centered horizontally.
#[allow(clippy::too_many_arguments)]
fn draw_center_layout(
    canvas: &mut RgbaImage,
    req: &ComposeRequest,
    footer_top: u32,
    footer_h: u32,
    font_px: f32,
    color: Rgba<u8>,
    landscape: bool,
) {
    let scale = PxScale::from(font_px);
    let logo = scaled_logo(
        req.logo,
        (footer_h as f32 * req.style.center_logo_ratio).round() as u32,
    );
    let gap = (footer_h as f32 * req.style.center_gap_ratio).round() as u32;
    let text = &req.shooting_lines[0];
    let (text_w, text_h) = text_size(scale, &req.fonts.bold, text);
    let group_h = logo.height() + gap + text_h;

    let group_top = match req.style.position_mode {
        PositionMode::FooterCenter => footer_top + footer_h.saturating_sub(group_h) / 2,
        PositionMode::BottomOffset => {
            let divisor = if landscape {
                req.style.bottom_offset_landscape_divisor
            } else {
                req.style.bottom_offset_portrait_divisor
            };
            canvas
                .height()
                .saturating_sub(group_h + group_h / divisor.max(1))
        }
    };

    let logo_x = (canvas.width().saturating_sub(logo.width())) / 2;
    imageops::overlay(canvas, &logo, logo_x as i64, group_top as i64);
    let text_x = (canvas.width().saturating_sub(text_w)) / 2;
    draw_text_mut(
        canvas,
        color,
        text_x as i32,
        (group_top + logo.height() + gap) as i32,
        scale,
        &req.fonts.bold,
        text,
    );
}

/// Replicate the last row/column so both dimensions come out even.
fn pad_to_even(canvas: RgbaImage) -> RgbaImage {
    let (w, h) = canvas.dimensions();
    let (pw, ph) = (w + w % 2, h + h % 2);
    if (pw, ph) == (w, h) {
        return canvas;
    }
    RgbaImage::from_fn(pw, ph, |x, y| *canvas.get_pixel(x.min(w - 1), y.min(h - 1)))
}


#[cfg(test)]
mod tests {
    use super::*;
    use photomark_core::styles;

    const STYLES: &str = r#"
[styles.1]
display_code = "classic"

[styles.2]
display_code = "glass"
layout = "center_stack"
background = "frosted"
text_color_mode = "auto_contrast"
position_mode = "bottom_offset"
"#;

    fn request_fixtures() -> (RgbaImage, RgbaImage, [String; 2], [String; 2]) {
        let photo = RgbaImage::from_pixel(401, 300, Rgba([180, 40, 40, 255]));
        let logo = RgbaImage::from_pixel(64, 32, Rgba([0, 0, 0, 255]));
        let camera = ["RF24-70mm ƒ/2.8".to_string(), "EOS R5".to_string()];
        let shooting = [
            "50mm  ƒ/1.8  1/200s  ISO100".to_string(),
            "2023.05.01 10:00:00".to_string(),
        ];
        (photo, logo, camera, shooting)
    }

    #[test]
    fn auto_contrast_needs_both_halves_bright() {
        let bright = RgbaImage::from_pixel(10, 10, Rgba([200, 200, 200, 255]));
        assert_eq!(auto_contrast_color(&bright, 130), Rgba([0, 0, 0, 255]));

        let dark = RgbaImage::from_pixel(10, 10, Rgba([40, 40, 40, 255]));
        assert_eq!(auto_contrast_color(&dark, 130), Rgba([255, 255, 255, 255]));

        // Bright sky over dark ground: bottom half vetoes black text.
        let mut split = RgbaImage::from_pixel(10, 10, Rgba([250, 250, 250, 255]));
        for y in 5..10 {
            for x in 0..10 {
                split.put_pixel(x, y, Rgba([10, 10, 10, 255]));
            }
        }
        assert_eq!(auto_contrast_color(&split, 130), Rgba([255, 255, 255, 255]));
    }

    #[test]
    fn split_layout_produces_even_dims_and_footer() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping render test");
            return;
        };
        let (photo, logo, camera, shooting) = request_fixtures();
        let config = styles::parse(STYLES).unwrap();
        let globals = config
            .globals
            .to_compositor_globals(Default::default());

        let (canvas, metadata) = compose(&ComposeRequest {
            photo: &photo,
            logo: &logo,
            camera_lines: &camera,
            shooting_lines: &shooting,
            style: config.get(1).unwrap(),
            globals: &globals,
            fonts: &fonts,
            needs_metadata: true,
        })
        .unwrap();

        assert_eq!(canvas.width() % 2, 0);
        assert_eq!(canvas.height() % 2, 0);
        // Landscape footer ratio 0.09, borders default to zero; the odd
        // width picks up one replicated column.
        let footer_h = (300.0_f32 * 0.09).round() as u32;
        assert_eq!(canvas.height(), 300 + footer_h + 1);
        assert_eq!(canvas.width(), 402);

        let meta = metadata.unwrap();
        assert_eq!(meta.content_box.width, 401);
        assert_eq!(meta.content_box.height, 300);
        assert_eq!(meta.final_size, (canvas.width(), canvas.height()));
        assert!(meta.content_box.x + meta.content_box.width <= canvas.width());
        assert!(meta.content_box.y + meta.content_box.height <= canvas.height());
        // Overlay is transparent over the photo, opaque in the footer.
        assert_eq!(
            meta.overlay
                .get_pixel(meta.content_box.x + 5, meta.content_box.y + 5)
                .0[3],
            0
        );
        assert_eq!(meta.overlay.get_pixel(5, canvas.height() - 2).0[3], 255);
    }

    #[test]
    fn frosted_center_stack_centers_the_photo() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping render test");
            return;
        };
        let (photo, logo, camera, shooting) = request_fixtures();
        let config = styles::parse(STYLES).unwrap();
        let globals = config
            .globals
            .to_compositor_globals(Default::default());

        let (canvas, metadata) = compose(&ComposeRequest {
            photo: &photo,
            logo: &logo,
            camera_lines: &camera,
            shooting_lines: &shooting,
            style: config.get(2).unwrap(),
            globals: &globals,
            fonts: &fonts,
            needs_metadata: true,
        })
        .unwrap();

        let meta = metadata.unwrap();
        // Enlarged canvas leaves a border on every side.
        assert!(meta.content_box.x > 0);
        assert!(meta.content_box.y > 0);
        assert!(canvas.width() > 401);
        assert_eq!(meta.content_box.width, 401);
        assert_eq!(meta.content_box.height, 300);
        assert_eq!(canvas.width() % 2, 0);
        assert_eq!(canvas.height() % 2, 0);
    }

    #[test]
    fn plain_path_returns_no_metadata() {
        let Some(fonts) = test_support::system_fonts() else {
            eprintln!("no system font found, skipping render test");
            return;
        };
        let (photo, logo, camera, shooting) = request_fixtures();
        let config = styles::parse(STYLES).unwrap();
        let globals = config
            .globals
            .to_compositor_globals(Default::default());

        let (_, metadata) = compose(&ComposeRequest {
            photo: &photo,
            logo: &logo,
            camera_lines: &camera,
            shooting_lines: &shooting,
            style: config.get(1).unwrap(),
            globals: &globals,
            fonts: &fonts,
            needs_metadata: false,
        })
        .unwrap();
        assert!(metadata.is_none());
    }
}
