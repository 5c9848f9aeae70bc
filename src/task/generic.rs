/*!
 * Generic Task
 * Completes as soon as it is dispatched; useful as a placeholder or hook
 */

use super::{Callback, Task, TaskStatus};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};

pub struct GenericTask {
    status: TaskStatus,
    callback: Option<Callback<GenericTask>>,
}

impl GenericTask {
    pub fn new(callback: Option<Callback<GenericTask>>) -> Box<Self> {
        Box::new(Self {
            status: TaskStatus::default(),
            callback,
        })
    }

    pub fn set_callback(&mut self, callback: Callback<GenericTask>) {
        self.callback = Some(callback);
    }
}

impl Task for GenericTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl SubTask for GenericTask {
    fn dispatch(mut self: Box<Self>, series: Series) {
        self.status = TaskStatus::success();
        subtask_done(self, series);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for GenericTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenericTask").field("status", &self.status).finish()
    }
}
