//! Task execution and lifecycle management.
//!
//! A bounded scheduler runs watermark jobs on a fixed-size pool and keeps
//! per-task records for status polling; a background janitor retires task
//! records, burn-after-read files, packaged archives and stale uploads.

pub mod janitor;
pub mod scheduler;

pub use janitor::{BurnRegistry, Janitor, JanitorConfig};
pub use scheduler::{JobOutcome, Metrics, ProgressHandle, Scheduler};
