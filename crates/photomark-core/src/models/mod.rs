pub mod task;

pub use task::{TaskRecord, TaskResult, TaskStatus};
