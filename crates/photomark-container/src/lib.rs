//! Container reconstruction for watermarked photos.
//!
//! A marker-level binary layer that can locate, split, and rebuild the
//! JPEG / XMP / video sub-streams of motion photos and Ultra HDR files
//! without a full codec, so downstream gallery software still recognizes
//! the container after the watermark is burned in.

pub mod jpeg;
pub mod motion;
pub mod types;
pub mod ultrahdr;
pub mod video;
pub mod xmp;

pub use motion::MotionPhotoSession;
pub use types::{ContentBox, WatermarkMetadata};
pub use ultrahdr::ContainerParts;
pub use video::{VideoCompositor, VideoToolError};
