//! Watermark rendering and the per-photo processing pipeline.
//!
//! EXIF-derived text plus a brand logo are composited into a styled frame
//! around the photo; the orchestrator in [`process`] decides whether the
//! result is a plain still, a reassembled motion photo, or a rebuilt
//! Ultra HDR container.

pub mod compositor;
pub mod exif;
pub mod ffmpeg;
pub mod logo;
pub mod process;

pub use compositor::{compose, ComposeRequest, Fonts};
pub use ffmpeg::FfmpegCompositor;
pub use process::{process_photo, ProcessDeps, ProcessRequest, Progress};
