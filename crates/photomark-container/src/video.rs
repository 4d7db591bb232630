//! Seam between the container layer and the external video tool.
//!
//! The motion-photo finalizer needs frames re-rendered with the watermark
//! overlay but must not care which binary does it, so the tool sits behind
//! a trait. "Tool missing" and "tool ran and failed" are distinct errors;
//! callers report the former as an environment problem.

use std::path::Path;

use async_trait::async_trait;
use photomark_core::WatermarkError;

use crate::types::ContentBox;

#[derive(Debug, thiserror::Error)]
pub enum VideoToolError {
    #[error("video tool not found in PATH: {tool}")]
    Unavailable { tool: String },

    #[error("video tool failed: {detail}")]
    Failed { detail: String },
}

impl From<VideoToolError> for WatermarkError {
    fn from(err: VideoToolError) -> Self {
        match err {
            VideoToolError::Unavailable { tool } => {
                WatermarkError::VideoToolUnavailable { tool }
            }
            VideoToolError::Failed { detail } => WatermarkError::Unexpected { detail },
        }
    }
}

/// Re-renders a video with an RGBA overlay burned into every frame.
///
/// The video is scaled (aspect preserved, padded) to the content box size
/// and composited under the overlay at the box origin, so the result lines
/// up with the watermarked still frame by frame. Stream rotation must be
/// baked into pixels or re-attached; the caller does not post-process.
#[async_trait]
pub trait VideoCompositor: Send + Sync {
    async fn overlay(
        &self,
        video: &Path,
        overlay_png: &Path,
        output: &Path,
        content_box: ContentBox,
    ) -> Result<(), VideoToolError>;
}
