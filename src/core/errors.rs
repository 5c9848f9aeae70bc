/*!
 * Error Types
 * Centralized error handling with thiserror and miette diagnostics
 */

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Work queue errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum QueueError {
    #[error("Queue is empty")]
    #[diagnostic(
        code(queue::empty),
        help("No message was available without waiting.")
    )]
    Empty,
}

/// Thread pool errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PoolError {
    #[error("Failed to spawn pool thread: {0}")]
    #[diagnostic(
        code(pool::spawn_failed),
        help("The OS refused to create a thread. Check ulimit -u and available memory.")
    )]
    SpawnFailed(String),

    #[error("Thread pool is terminating")]
    #[diagnostic(
        code(pool::terminating),
        help("Tasks cannot be scheduled after the pool started shutting down.")
    )]
    Terminating,

    #[error("Invalid thread count: {0}")]
    #[diagnostic(code(pool::invalid_threads), help("A pool needs at least one thread."))]
    InvalidThreadCount(usize),
}

/// Multiplexer errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum PollerError {
    #[error("Poller system call failed: {0}")]
    #[diagnostic(
        code(poller::syscall_failed),
        help("epoll or eventfd returned an error. Check open file limits.")
    )]
    Syscall(String),

    #[error("File descriptor {0} out of range")]
    #[diagnostic(
        code(poller::fd_out_of_range),
        help("Raise max_open_files in the global settings.")
    )]
    FdOutOfRange(i32),

    #[error("File descriptor {0} already registered")]
    #[diagnostic(code(poller::already_registered))]
    AlreadyRegistered(i32),

    #[error("File descriptor {0} not registered")]
    #[diagnostic(code(poller::not_registered))]
    NotRegistered(i32),

    #[error("Poller is not running")]
    #[diagnostic(code(poller::stopped), help("Call start() before registering descriptors."))]
    Stopped,
}

impl PollerError {
    /// errno reported to sessions whose registration failed
    pub fn errno(&self) -> i32 {
        match self {
            PollerError::Syscall(_) => libc::EIO,
            PollerError::FdOutOfRange(_) => libc::EMFILE,
            PollerError::AlreadyRegistered(_) => libc::EEXIST,
            PollerError::NotRegistered(_) => libc::ENOENT,
            PollerError::Stopped => libc::ESHUTDOWN,
        }
    }
}

/// Communicator errors, each carrying the errno reported to sessions
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum CommError {
    #[error("Operation failed with errno {0}")]
    #[diagnostic(code(comm::os_error))]
    Os(i32),

    #[error("Session is not replying (state does not allow push)")]
    #[diagnostic(
        code(comm::not_replying),
        help("push() is only legal while a server task is in ToReply or NoReply state.")
    )]
    NotReplying,

    #[error("Target acquisition timed out")]
    #[diagnostic(
        code(comm::wait_timeout),
        help("All targets are at their connection limit. Raise max_connections or wait_timeout.")
    )]
    WaitTimeout,

    #[error("Communicator is stopped")]
    #[diagnostic(code(comm::stopped))]
    Stopped,
}

impl CommError {
    /// errno equivalent reported through task state
    pub fn errno(&self) -> i32 {
        match self {
            CommError::Os(e) => *e,
            CommError::NotReplying => libc::ENOENT,
            CommError::WaitTimeout => libc::ETIMEDOUT,
            CommError::Stopped => libc::ESHUTDOWN,
        }
    }
}

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        CommError::Os(err.raw_os_error().unwrap_or(libc::EIO))
    }
}

/// Executor errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ExecError {
    #[error("Executor pool unavailable: {0}")]
    #[diagnostic(code(executor::pool_unavailable))]
    Pool(#[from] PoolError),
}

/// Configuration errors
#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Diagnostic)]
#[serde(tag = "error_type", content = "details", rename_all = "snake_case")]
pub enum ConfigError {
    #[error("Invalid setting '{field}': {reason}")]
    #[diagnostic(code(config::invalid), help("Review the global settings file or environment."))]
    Invalid { field: String, reason: String },

    #[error("Failed to read settings: {0}")]
    #[diagnostic(code(config::read_failed))]
    Read(String),

    #[error("Failed to parse settings: {0}")]
    #[diagnostic(code(config::parse_failed), help("The settings file must be valid JSON."))]
    Parse(String),
}

/// Unified kernel error type with miette diagnostics
#[derive(Error, Debug, Diagnostic)]
pub enum KernelError {
    #[error("Queue error: {0}")]
    #[diagnostic(transparent)]
    Queue(#[from] QueueError),

    #[error("Pool error: {0}")]
    #[diagnostic(transparent)]
    Pool(#[from] PoolError),

    #[error("Poller error: {0}")]
    #[diagnostic(transparent)]
    Poller(#[from] PollerError),

    #[error("Communicator error: {0}")]
    #[diagnostic(transparent)]
    Comm(#[from] CommError),

    #[error("Executor error: {0}")]
    #[diagnostic(transparent)]
    Exec(#[from] ExecError),

    #[error("Configuration error: {0}")]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    #[diagnostic(
        code(kernel::io_error),
        help("A socket or file operation failed. Check permissions and limits.")
    )]
    Io(#[from] std::io::Error),
}

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, KernelError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comm_error_errno() {
        assert_eq!(CommError::NotReplying.errno(), libc::ENOENT);
        assert_eq!(CommError::WaitTimeout.errno(), libc::ETIMEDOUT);
        assert_eq!(CommError::Os(libc::ECONNREFUSED).errno(), libc::ECONNREFUSED);
    }

    #[test]
    fn test_poller_error_serialization() {
        let error = PollerError::FdOutOfRange(70000);
        let json = serde_json::to_string(&error).unwrap();
        let deserialized: PollerError = serde_json::from_str(&json).unwrap();
        assert_eq!(error, deserialized);
    }

    #[test]
    fn test_kernel_error_display() {
        let error: KernelError = PoolError::Terminating.into();
        assert_eq!(error.to_string(), "Pool error: Thread pool is terminating");
    }

    #[test]
    fn test_comm_error_from_io() {
        let io = std::io::Error::from_raw_os_error(libc::ECONNRESET);
        assert_eq!(CommError::from(io), CommError::Os(libc::ECONNRESET));
    }
}
