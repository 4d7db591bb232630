//! Shared geometry passed between the compositor and the container layer.

use image::RgbaImage;

/// Placement of the original photo content inside the final framed canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Everything the container layer needs to replay a watermark onto a
/// secondary stream (video frames, gain map) after the primary image has
/// been composited.
pub struct WatermarkMetadata {
    /// Full-canvas RGBA overlay, transparent where the content shows through.
    pub overlay: RgbaImage,
    /// Where the untouched source pixels ended up on the canvas.
    pub content_box: ContentBox,
    /// Final canvas dimensions after borders and even-dimension padding.
    pub final_size: (u32, u32),
}

impl std::fmt::Debug for WatermarkMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatermarkMetadata")
            .field("overlay_size", &(self.overlay.width(), self.overlay.height()))
            .field("content_box", &self.content_box)
            .field("final_size", &self.final_size)
            .finish()
    }
}
