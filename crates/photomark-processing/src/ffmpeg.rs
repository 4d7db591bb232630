//! Motion photo video re-encoding through ffmpeg.
//!
//! The watermark overlay is burned into the embedded video by scaling the
//! clip into the content box of the final frame, padding it to the full
//! canvas, then compositing the transparent overlay on top. Rotation
//! metadata is probed with ffprobe and re-attached so players keep the
//! original orientation.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use photomark_container::types::ContentBox;
use photomark_container::video::{VideoCompositor, VideoToolError};
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct FfmpegCompositor {
    ffmpeg: String,
    ffprobe: String,
}

impl FfmpegCompositor {
    /// Probe for a working ffmpeg binary up front so a missing install
    /// fails the motion pipeline before any video work starts.
    pub async fn new(ffmpeg: &str, ffprobe: &str) -> Result<Self, VideoToolError> {
        let available = Command::new(ffmpeg)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|status| status.success())
            .unwrap_or(false);
        if !available {
            return Err(VideoToolError::Unavailable {
                tool: ffmpeg.to_string(),
            });
        }
        Ok(Self {
            ffmpeg: ffmpeg.to_string(),
            ffprobe: ffprobe.to_string(),
        })
    }

    /// Read the rotation tag of the first video stream. Probing failures
    /// degrade to "no rotation" rather than failing the pipeline.
    async fn probe_rotation(&self, video: &Path) -> Option<String> {
        let output = Command::new(&self.ffprobe)
            .args([
                "-v",
                "error",
                "-select_streams",
                "v:0",
                "-show_entries",
                "stream_tags=rotate",
                "-of",
                "default=noprint_wrappers=1:nokey=1",
            ])
            .arg(video)
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let rotation = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!rotation.is_empty() && rotation != "0").then_some(rotation)
    }
}

#[async_trait]
impl VideoCompositor for FfmpegCompositor {
    async fn overlay(
        &self,
        video: &Path,
        overlay_png: &Path,
        output: &Path,
        content_box: ContentBox,
    ) -> Result<(), VideoToolError> {
        // The looped frame PNG is the base; the clip is scaled into the
        // content box and pasted over it. shortest=1 cuts the infinite
        // image loop at the clip's duration.
        let filter = format!(
            "[0:v]scale={cw}:{ch}:force_original_aspect_ratio=decrease,\
             pad={cw}:{ch}:(ow-iw)/2:(oh-ih)/2,setsar=1[vscaled];\
             [1:v]format=rgba[frame];\
             [frame][vscaled]overlay={cx}:{cy}:shortest=1[out]",
            cw = content_box.width,
            ch = content_box.height,
            cx = content_box.x,
            cy = content_box.y,
        );

        let rotation = self.probe_rotation(video).await;

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-i")
            .arg(video)
            .args(["-loop", "1"])
            .arg("-i")
            .arg(overlay_png)
            .args(["-filter_complex", &filter])
            .args(["-map", "[out]", "-map", "0:a?"])
            .args(["-c:v", "libx264", "-preset", "veryfast", "-crf", "18"])
            .args(["-pix_fmt", "yuv420p"])
            .args(["-c:a", "copy"]);
        if let Some(ref rotation) = rotation {
            command.args(["-metadata:s:v:0", &format!("rotate={}", rotation)]);
        }
        command.arg(output);

        debug!(
            video = %video.display(),
            rotation = rotation.as_deref().unwrap_or("none"),
            "re-encoding motion video with overlay"
        );

        let result = command
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| VideoToolError::Failed {
                detail: format!("failed to spawn {}: {}", self.ffmpeg, e),
            })?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: String = stderr
                .lines()
                .rev()
                .take(5)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect::<Vec<_>>()
                .join("\n");
            warn!(status = %result.status, "ffmpeg exited with an error");
            return Err(VideoToolError::Failed {
                detail: format!("ffmpeg exited with {}: {}", result.status, tail),
            });
        }
        Ok(())
    }
}
