//! Core types for the photomark watermark service: configuration, error
//! taxonomy, localized messages, watermark style registry, and the task model.

pub mod config;
pub mod error;
pub mod i18n;
pub mod models;
pub mod styles;

pub use config::AppConfig;
pub use error::WatermarkError;
