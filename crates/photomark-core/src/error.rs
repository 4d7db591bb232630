//! Error types module
//!
//! All predictable processing failures are unified under [`WatermarkError`].
//! Each variant carries a machine-readable message key used to resolve a
//! localized user-facing string at the scheduler boundary, plus optional
//! free-text detail that is only ever logged, never shown to the caller.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum WatermarkError {
    #[error("no EXIF data or no decodable manufacturer tag")]
    MissingExifData,

    #[error("unsupported manufacturer: {manufacturer}")]
    UnsupportedManufacturer { manufacturer: String },

    #[error("failed to read EXIF shooting parameters")]
    ExifRead { detail: Option<String> },

    #[error("image too large: {width}x{height}")]
    ImageTooLarge { width: u32, height: u32 },

    #[error("malformed container: {detail}")]
    MalformedContainer { detail: String },

    #[error("could not locate gain map JPEG in container")]
    GainMapNotFound,

    #[error("motion photo has no video data to finalize")]
    MissingVideoData,

    #[error("watermark metadata required for container reassembly is missing")]
    MissingMetadata,

    #[error("XMP payload too large for a single APP1 segment: {size} bytes")]
    SegmentTooLarge { size: usize },

    #[error("invalid watermark style config: {field}")]
    InvalidStyleConfig { field: String },

    #[error("external tool not available: {tool}")]
    VideoToolUnavailable { tool: String },

    #[error("unexpected processing error: {detail}")]
    Unexpected { detail: String },
}

impl WatermarkError {
    pub fn unexpected(detail: impl Into<String>) -> Self {
        WatermarkError::Unexpected {
            detail: detail.into(),
        }
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        WatermarkError::MalformedContainer {
            detail: detail.into(),
        }
    }

    /// Message key resolved against the localized message table when the
    /// error is surfaced to a caller. Structural container errors share the
    /// generic key; their detail stays in the logs.
    pub fn message_key(&self) -> &'static str {
        match self {
            WatermarkError::MissingExifData => "no_exif_data",
            WatermarkError::UnsupportedManufacturer { .. } => "unsupported_manufacturer",
            WatermarkError::ExifRead { .. } => "exif_read_error",
            WatermarkError::ImageTooLarge { .. } => "image_too_large",
            WatermarkError::MalformedContainer { .. }
            | WatermarkError::GainMapNotFound
            | WatermarkError::MissingVideoData
            | WatermarkError::MissingMetadata
            | WatermarkError::SegmentTooLarge { .. }
            | WatermarkError::InvalidStyleConfig { .. }
            | WatermarkError::VideoToolUnavailable { .. }
            | WatermarkError::Unexpected { .. } => "unexpected_error",
        }
    }

    /// Free-text detail for logging. Only the unsupported-manufacturer detail
    /// is ever appended to the user-facing message.
    pub fn detail(&self) -> Option<String> {
        match self {
            WatermarkError::UnsupportedManufacturer { manufacturer } => {
                Some(manufacturer.clone())
            }
            WatermarkError::ExifRead { detail } => detail.clone(),
            WatermarkError::ImageTooLarge { width, height } => {
                Some(format!("{}x{}", width, height))
            }
            WatermarkError::MalformedContainer { detail } => Some(detail.clone()),
            WatermarkError::SegmentTooLarge { size } => Some(format!("{} bytes", size)),
            WatermarkError::InvalidStyleConfig { field } => Some(field.clone()),
            WatermarkError::VideoToolUnavailable { tool } => Some(tool.clone()),
            WatermarkError::Unexpected { detail } => Some(detail.clone()),
            _ => None,
        }
    }
}

impl From<io::Error> for WatermarkError {
    fn from(err: io::Error) -> Self {
        WatermarkError::Unexpected {
            detail: format!("IO error: {}", err),
        }
    }
}

impl From<image::ImageError> for WatermarkError {
    fn from(err: image::ImageError) -> Self {
        WatermarkError::Unexpected {
            detail: format!("image codec error: {}", err),
        }
    }
}
