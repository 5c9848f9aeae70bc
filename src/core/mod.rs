/*!
 * Core Module
 * Fundamental engine types, limits, and error handling
 */

pub mod errors;
pub mod limits;
pub mod types;

pub use errors::*;
pub use types::{error_string, task_error, TaskState, TimeoutMs, TimeoutReason};
