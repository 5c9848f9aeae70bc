/*!
 * Timer Task
 *
 * Suspends its series for a fixed duration on the communicator's timers.
 * A canceler obtained before dispatch can cut the wait short; the task
 * then finishes as `Aborted` with `ECANCELED`.
 */

use super::{Callback, Task, TaskStatus};
use crate::kernel::{Communicator, SleepSession, SleepState, TimerHandle};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

enum CancelSlot {
    Idle,
    Armed(TimerHandle),
    Canceled,
    Fired,
}

/// Cuts a pending timer short
#[derive(Clone)]
pub struct TimerCanceler {
    slot: Arc<Mutex<CancelSlot>>,
    comm: Arc<Communicator>,
}

impl TimerCanceler {
    /// Cancel the timer, now or as soon as it is dispatched. False once
    /// it already fired.
    pub fn cancel(&self) -> bool {
        let armed = {
            let mut slot = self.slot.lock();
            match std::mem::replace(&mut *slot, CancelSlot::Canceled) {
                CancelSlot::Armed(handle) => Some(handle),
                CancelSlot::Idle | CancelSlot::Canceled => None,
                CancelSlot::Fired => {
                    *slot = CancelSlot::Fired;
                    return false;
                }
            }
        };
        if let Some(handle) = armed {
            return self.comm.unsleep(&handle);
        }
        true
    }

    /// Record the pending timer; a cancel that came first unsleeps it now
    fn arm(&self, handle: TimerHandle) {
        let canceled = {
            let mut slot = self.slot.lock();
            match *slot {
                CancelSlot::Idle => {
                    *slot = CancelSlot::Armed(handle);
                    false
                }
                CancelSlot::Canceled => true,
                CancelSlot::Armed(_) | CancelSlot::Fired => false,
            }
        };
        if canceled {
            self.comm.unsleep(&handle);
        }
    }

    fn fire(&self) {
        *self.slot.lock() = CancelSlot::Fired;
    }

    fn is_canceled(&self) -> bool {
        matches!(*self.slot.lock(), CancelSlot::Canceled)
    }
}

pub struct TimerTask {
    duration: Duration,
    comm: Arc<Communicator>,
    canceler: Option<TimerCanceler>,
    status: TaskStatus,
    callback: Option<Callback<TimerTask>>,
}

impl TimerTask {
    pub fn new(comm: Arc<Communicator>, duration: Duration, callback: Option<Callback<TimerTask>>) -> Box<Self> {
        Box::new(Self {
            duration,
            comm,
            canceler: None,
            status: TaskStatus::default(),
            callback,
        })
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Handle able to cancel this timer
    pub fn canceler(&mut self) -> TimerCanceler {
        self.canceler
            .get_or_insert_with(|| TimerCanceler {
                slot: Arc::new(Mutex::new(CancelSlot::Idle)),
                comm: self.comm.clone(),
            })
            .clone()
    }

    pub fn set_callback(&mut self, callback: Callback<TimerTask>) {
        self.callback = Some(callback);
    }
}

impl Task for TimerTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

/// The task while its timer is pending
struct TimerSleep {
    task: Box<TimerTask>,
    series: Series,
}

impl SleepSession for TimerSleep {
    fn duration(&self) -> Duration {
        self.task.duration
    }

    fn handle(self: Box<Self>, state: SleepState, _error: i32) {
        let TimerSleep { mut task, series } = *self;
        if let Some(canceler) = &task.canceler {
            canceler.fire();
        }
        task.status = match state {
            SleepState::Complete => TaskStatus::success(),
            SleepState::Disrupted => TaskStatus::aborted(libc::ECANCELED),
            SleepState::Stopped => TaskStatus::aborted(libc::ESHUTDOWN),
        };
        subtask_done(task, series);
    }
}

impl SubTask for TimerTask {
    fn dispatch(mut self: Box<Self>, series: Series) {
        if self.canceler.as_ref().is_some_and(|c| c.is_canceled()) {
            self.status = TaskStatus::aborted(libc::ECANCELED);
            subtask_done(self, series);
            return;
        }

        let comm = self.comm.clone();
        let canceler = self.canceler.clone();
        if let Some(handle) = comm.sleep(Box::new(TimerSleep { task: self, series })) {
            if let Some(canceler) = canceler {
                canceler.arm(handle);
            }
        }
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for TimerTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerTask")
            .field("duration", &self.duration)
            .field("status", &self.status)
            .finish()
    }
}
