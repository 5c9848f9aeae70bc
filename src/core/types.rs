/*!
 * Core Types
 * Task states, timeout classification, and error strings shared by every task kind
 */

use serde::{Deserialize, Serialize};

/// Timeout in milliseconds, negative means no limit
pub type TimeoutMs = i32;

/// Lifecycle state of any task
///
/// Timeouts are not a state of their own: they surface as `SysError`
/// with `ETIMEDOUT` and a [`TimeoutReason`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Undefined,
    Success,
    /// Server task received a request and owes a reply
    ToReply,
    /// Server task decided not to reply
    NoReply,
    SysError,
    TaskError,
    Aborted,
}

impl TaskState {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Undefined | Self::ToReply | Self::NoReply)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Success => "success",
            Self::ToReply => "to_reply",
            Self::NoReply => "no_reply",
            Self::SysError => "sys_error",
            Self::TaskError => "task_error",
            Self::Aborted => "aborted",
        }
    }
}

/// Which phase of a network exchange ran out of time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutReason {
    #[default]
    NotTimeout,
    /// No target could be acquired in time
    Wait,
    /// Target acquired but the connection never got established
    Connect,
    /// Sending or receiving the message took too long
    Transmit,
}

impl TimeoutReason {
    /// Classify a finished network exchange
    pub fn classify(error: i32, target_acquired: bool, connected: bool) -> Self {
        if error != libc::ETIMEDOUT {
            Self::NotTimeout
        } else if !target_acquired {
            Self::Wait
        } else if !connected {
            Self::Connect
        } else {
            Self::Transmit
        }
    }
}

/// Application-defined task error codes
pub mod task_error {
    pub const UNKNOWN: i32 = 1000;
    pub const MESSAGE_TOO_LARGE: i32 = 1001;
    pub const BAD_MESSAGE: i32 = 1002;
}

fn task_error_string(error: i32) -> &'static str {
    match error {
        task_error::MESSAGE_TOO_LARGE => "Message too large",
        task_error::BAD_MESSAGE => "Malformed message",
        _ => "Unknown task error",
    }
}

/// Human readable description of a (state, error) pair
pub fn error_string(state: TaskState, error: i32) -> String {
    match state {
        TaskState::Success => "Success".into(),
        TaskState::ToReply => "To Reply".into(),
        TaskState::NoReply => "No Reply".into(),
        TaskState::SysError => std::io::Error::from_raw_os_error(error).to_string(),
        TaskState::TaskError => task_error_string(error).into(),
        TaskState::Aborted => "Aborted".into(),
        TaskState::Undefined => "Undefined".into(),
    }
}
