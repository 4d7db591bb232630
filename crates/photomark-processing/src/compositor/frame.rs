//! Background frames for the compositor.
//!
//! A frame is the canvas with the photo already pasted plus the content box
//! recording where the untouched pixels sit. The solid white frame is a
//! plain border expansion; the frosted frame blurs an enlarged copy of the
//! photo into a glass backdrop with a drop shadow and rounded corners.

use image::imageops::FilterType;
use image::{imageops, GrayImage, Luma, Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_filled_rect_mut};
use imageproc::rect::Rect;
use photomark_container::types::ContentBox;
use photomark_core::config::GlassConstants;
use photomark_core::styles::{Background, WatermarkStyle};

const SHADOW_ALPHA: f32 = 0.45;
/// Fraction blended toward the glass gray when tinting the backdrop.
const TINT_STRENGTH: f32 = 0.3;

pub(super) struct Frame {
    pub canvas: RgbaImage,
    pub content: ContentBox,
}

pub(super) fn build(
    photo: &RgbaImage,
    style: &WatermarkStyle,
    footer_h: u32,
    glass: &GlassConstants,
) -> Frame {
    match style.background {
        Background::White => white_frame(photo, style, footer_h),
        Background::Frosted => frosted_frame(photo, footer_h, glass),
    }
}

fn white_frame(photo: &RgbaImage, style: &WatermarkStyle, footer_h: u32) -> Frame {
    let (w, h) = photo.dimensions();
    let border_left = (w as f32 * style.border_left_ratio).round() as u32;
    let border_top = (h as f32 * style.border_top_ratio).round() as u32;

    let mut canvas = RgbaImage::from_pixel(
        w + 2 * border_left,
        border_top + h + footer_h,
        Rgba([255, 255, 255, 255]),
    );
    imageops::overlay(&mut canvas, photo, border_left as i64, border_top as i64);

    Frame {
        canvas,
        content: ContentBox {
            x: border_left,
            y: border_top,
            width: w,
            height: h,
        },
    }
}

fn frosted_frame(photo: &RgbaImage, footer_h: u32, glass: &GlassConstants) -> Frame {
    let (w, h) = photo.dimensions();
    let canvas_w = (w as f32 * glass.bg_scale).round() as u32;
    let body_h = (h as f32 * glass.bg_scale).round() as u32;
    let canvas_h = body_h + footer_h;

    let mut canvas = glass_backdrop(photo, canvas_w, canvas_h, glass);

    let content_x = (canvas_w - w) / 2;
    let lift = (canvas_h as f32 * glass.offset_factor).round() as u32;
    let content_y = ((body_h - h) / 2).saturating_sub(lift);
    let radius = (w.min(h) as f32 * glass.corner_radius_factor).round() as u32;

    draw_shadow(&mut canvas, content_x, content_y, w, h, radius, glass);
    paste_rounded(&mut canvas, photo, content_x, content_y, radius);

    Frame {
        canvas,
        content: ContentBox {
            x: content_x,
            y: content_y,
            width: w,
            height: h,
        },
    }
}

/// Blur a heavily downsampled copy of the photo across the whole canvas and
/// tint it toward the glass gray. Downsampling first keeps the blur cheap at
/// full-resolution canvas sizes.
fn glass_backdrop(
    photo: &RgbaImage,
    canvas_w: u32,
    canvas_h: u32,
    glass: &GlassConstants,
) -> RgbaImage {
    let small_w = (canvas_w / 8).max(1);
    let small_h = (canvas_h / 8).max(1);
    let small = imageops::resize(photo, small_w, small_h, FilterType::Triangle);
    let sigma = (canvas_w.min(canvas_h) as f32 * glass.blur_radius_factor / 8.0).max(1.0);
    let blurred = imageops::blur(&small, sigma);
    let mut backdrop = imageops::resize(&blurred, canvas_w, canvas_h, FilterType::Triangle);

    let gray = glass.glass_color as f32;
    for pixel in backdrop.pixels_mut() {
        for channel in &mut pixel.0[..3] {
            let value = *channel as f32;
            *channel = (value + (gray - value) * TINT_STRENGTH).round() as u8;
        }
        pixel.0[3] = 255;
    }
    backdrop
}

/// Rounded-rectangle coverage mask, 255 inside and 0 outside.
fn rounded_mask(w: u32, h: u32, radius: u32) -> GrayImage {
    let mut mask = GrayImage::new(w, h);
    let r = radius.min(w / 2).min(h / 2);
    if r == 0 {
        draw_filled_rect_mut(&mut mask, Rect::at(0, 0).of_size(w, h), Luma([255]));
        return mask;
    }
    if w > 2 * r {
        draw_filled_rect_mut(&mut mask, Rect::at(r as i32, 0).of_size(w - 2 * r, h), Luma([255]));
    }
    if h > 2 * r {
        draw_filled_rect_mut(&mut mask, Rect::at(0, r as i32).of_size(w, h - 2 * r), Luma([255]));
    }
    let r_i = r as i32;
    for (cx, cy) in [
        (r_i, r_i),
        (w as i32 - 1 - r_i, r_i),
        (r_i, h as i32 - 1 - r_i),
        (w as i32 - 1 - r_i, h as i32 - 1 - r_i),
    ] {
        draw_filled_circle_mut(&mut mask, (cx, cy), r_i, Luma([255]));
    }
    mask
}

/// Soft drop shadow: a slightly enlarged rounded rectangle, blurred, then
/// multiplied into the backdrop behind the photo.
fn draw_shadow(
    canvas: &mut RgbaImage,
    content_x: u32,
    content_y: u32,
    w: u32,
    h: u32,
    radius: u32,
    glass: &GlassConstants,
) {
    let shadow_w = (w as f32 * glass.shadow_scale).round() as u32;
    let shadow_h = (h as f32 * glass.shadow_scale).round() as u32;
    let shadow_x = content_x.saturating_sub((shadow_w - w) / 2) as i64;
    let shadow_y = content_y.saturating_sub((shadow_h - h) / 2) as i64;

    let mask = rounded_mask(shadow_w, shadow_h, radius);
    let sigma = (w.min(h) as f32 * 0.01).max(2.0);
    let soft = imageops::blur(&mask, sigma);

    for (dx, dy, coverage) in soft.enumerate_pixels() {
        let x = shadow_x + dx as i64;
        let y = shadow_y + dy as i64;
        if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
            continue;
        }
        let alpha = coverage.0[0] as f32 / 255.0 * SHADOW_ALPHA;
        if alpha == 0.0 {
            continue;
        }
        let pixel = canvas.get_pixel_mut(x as u32, y as u32);
        for channel in &mut pixel.0[..3] {
            *channel = (*channel as f32 * (1.0 - alpha)).round() as u8;
        }
    }
}

/// Paste the photo with rounded corners, letting the backdrop show through
/// outside the corner radius. Interior pixels are copied untouched so the
/// content box stays bit-exact.
fn paste_rounded(canvas: &mut RgbaImage, photo: &RgbaImage, x0: u32, y0: u32, radius: u32) {
    let (w, h) = photo.dimensions();
    let mask = rounded_mask(w, h, radius);
    for (dx, dy, coverage) in mask.enumerate_pixels() {
        let a = coverage.0[0] as f32 / 255.0;
        if a == 0.0 {
            continue;
        }
        let src = photo.get_pixel(dx, dy);
        let dst = canvas.get_pixel_mut(x0 + dx, y0 + dy);
        if a >= 1.0 {
            *dst = *src;
        } else {
            for i in 0..3 {
                dst.0[i] =
                    (dst.0[i] as f32 * (1.0 - a) + src.0[i] as f32 * a).round() as u8;
            }
            dst.0[3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use photomark_core::styles;

    fn style(toml_body: &str) -> WatermarkStyle {
        let text = format!("[styles.1]\n{}", toml_body);
        styles::parse(&text).unwrap().get(1).unwrap().clone()
    }

    #[test]
    fn white_frame_keeps_photo_untouched() {
        let photo = RgbaImage::from_pixel(40, 30, Rgba([10, 200, 30, 255]));
        let style = style("border_left_ratio = 0.1\nborder_top_ratio = 0.1");
        let frame = build(&photo, &style, 5, &GlassConstants::default());

        assert_eq!(frame.content, ContentBox { x: 4, y: 3, width: 40, height: 30 });
        assert_eq!(frame.canvas.dimensions(), (48, 38));
        assert_eq!(*frame.canvas.get_pixel(0, 0), Rgba([255, 255, 255, 255]));
        for (dx, dy) in [(0, 0), (39, 29), (20, 15)] {
            assert_eq!(
                frame.canvas.get_pixel(4 + dx, 3 + dy),
                photo.get_pixel(dx, dy)
            );
        }
    }

    #[test]
    fn frosted_frame_centers_and_preserves_interior() {
        let photo = RgbaImage::from_pixel(100, 80, Rgba([200, 40, 40, 255]));
        let style = style("background = \"frosted\"");
        let glass = GlassConstants::default();
        let frame = build(&photo, &style, 8, &glass);

        assert_eq!(frame.canvas.width(), 115);
        assert_eq!(frame.canvas.height(), 92 + 8);
        assert_eq!(frame.content.width, 100);
        assert_eq!(frame.content.height, 80);
        assert!(frame.content.x > 0);

        // Corners are rounded so sample well inside the photo.
        let (cx, cy) = (frame.content.x + 50, frame.content.y + 40);
        assert_eq!(frame.canvas.get_pixel(cx, cy), photo.get_pixel(50, 40));
        // The backdrop outside the photo is not pure photo red; the glass
        // tint pulls it toward gray.
        let corner = frame.canvas.get_pixel(1, 1);
        assert!(corner.0[1] > 40 || corner.0[2] > 40);
    }

    #[test]
    fn mask_covers_center_and_clips_corners() {
        let mask = rounded_mask(50, 50, 10);
        assert_eq!(mask.get_pixel(25, 25).0[0], 255);
        assert_eq!(mask.get_pixel(0, 0).0[0], 0);
        assert_eq!(mask.get_pixel(49, 49).0[0], 0);
        assert_eq!(mask.get_pixel(25, 0).0[0], 255);
    }
}
