/*!
 * Tasks
 *
 * Concrete task kinds built on the workflow layer: generic no-ops, timers,
 * exec and file work, network clients and server replies, and the
 * signal-driven barriers (counter, mailbox, selector, conditional).
 *
 * Every task carries a [`TaskStatus`] and an optional callback that runs
 * once, in `done`, before the series moves on.
 */

mod exec;
mod file;
mod generic;
mod network;
mod repeater;
mod resource_pool;
mod server_task;
mod signal;
mod timer;

pub use exec::{GoRoutine, GoTask, ThreadRoutine, ThreadTask};
pub use file::{FileOp, FileTask};
pub use generic::GenericTask;
pub use network::ClientTask;
pub use repeater::{RepeaterFactory, RepeaterTask};
pub use resource_pool::ResourcePool;
pub use server_task::{Processor, ServerTask, SharedMessage};
pub use signal::{ConditionalHandle, CounterHandle, MailboxHandle, Message, SelectorHandle, SignalTask};
pub use timer::{TimerCanceler, TimerTask};

use crate::core::{error_string, TaskState};
use crate::workflow::{Series, SeriesWork, SubTask};
use serde::{Deserialize, Serialize};

/// Completion callback; runs once with the finished task and its series
pub type Callback<T> = Box<dyn FnOnce(&mut T, &Series) + Send>;

/// State and errno pair of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct TaskStatus {
    pub state: TaskState,
    pub error: i32,
}

impl TaskStatus {
    pub const fn new(state: TaskState, error: i32) -> Self {
        Self { state, error }
    }

    pub const fn success() -> Self {
        Self::new(TaskState::Success, 0)
    }

    pub const fn sys_error(error: i32) -> Self {
        Self::new(TaskState::SysError, error)
    }

    pub const fn aborted(error: i32) -> Self {
        Self::new(TaskState::Aborted, error)
    }
}

/// Status accessors shared by every task kind
pub trait Task {
    fn status(&self) -> TaskStatus;

    fn state(&self) -> TaskState {
        self.status().state
    }

    fn error(&self) -> i32 {
        self.status().error
    }

    fn error_string(&self) -> String {
        let status = self.status();
        error_string(status.state, status.error)
    }
}

/// Run a lone task without building a series by hand
pub trait TaskExt: SubTask + Sized + 'static {
    /// Start the task on a new series of its own
    fn start(self: Box<Self>) -> Series {
        SeriesWork::start_with(self, None)
    }

    /// Release a task that will never be started
    fn dismiss(self: Box<Self>) {
        drop(self);
    }
}

impl<T: SubTask + 'static> TaskExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct Fixed(TaskStatus);

    impl Task for Fixed {
        fn status(&self) -> TaskStatus {
            self.0
        }
    }

    #[test]
    fn test_status_accessors() {
        let task = Fixed(TaskStatus::sys_error(libc::ECONNREFUSED));
        assert_eq!(task.state(), TaskState::SysError);
        assert_eq!(task.error(), libc::ECONNREFUSED);
        assert!(!task.error_string().is_empty());
        assert_eq!(Fixed(TaskStatus::default()).state(), TaskState::Undefined);
    }

    #[test]
    fn test_start_and_dismiss() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let series = GenericTask::new(Some(Box::new(move |_: &mut GenericTask, _: &Series| {
            flag.store(true, Ordering::SeqCst);
        })))
        .start();
        assert!(series.is_finished());
        assert!(ran.load(Ordering::SeqCst));

        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        GenericTask::new(Some(Box::new(move |_: &mut GenericTask, _: &Series| {
            flag.store(true, Ordering::SeqCst);
        })))
        .dismiss();
        assert!(!ran.load(Ordering::SeqCst));
    }
}
