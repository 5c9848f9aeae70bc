/*!
 * Exec Tasks
 *
 * CPU-bound work submitted to the executor. A go task runs one closure;
 * a thread task runs a shared routine over a typed input and output.
 * Tasks on the same named queue run one at a time in submission order.
 */

use super::{Callback, Task, TaskStatus};
use crate::kernel::{ExecQueue, ExecSession, ExecState, Executor};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};
use std::sync::Arc;

/// Work done on an executor thread
pub(crate) trait ExecWork: SubTask + Sized {
    fn execute(&mut self);

    fn set_status(&mut self, status: TaskStatus);
}

/// Carries an exec task and its series through the executor
pub(crate) struct ExecBridge<T: ExecWork> {
    task: Box<T>,
    series: Series,
}

impl<T: ExecWork> ExecBridge<T> {
    pub(crate) fn submit(task: Box<T>, series: Series, executor: &Executor, queue: &Arc<ExecQueue>) {
        executor.request(Box::new(Self { task, series }), queue);
    }
}

impl<T: ExecWork> ExecSession for ExecBridge<T> {
    fn execute(&mut self) {
        self.task.execute();
    }

    fn handle(self: Box<Self>, state: ExecState, error: i32) {
        let ExecBridge { mut task, series } = *self;
        task.set_status(match state {
            ExecState::Finished => TaskStatus::success(),
            ExecState::Canceled => TaskStatus::aborted(libc::ECANCELED),
            ExecState::Error => TaskStatus::sys_error(error),
        });
        subtask_done(task, series);
    }
}

// =============================================================================
// GO TASK
// =============================================================================

pub type GoRoutine = Box<dyn FnOnce() + Send>;

/// Runs one closure on an exec queue
pub struct GoTask {
    routine: Option<GoRoutine>,
    executor: Arc<Executor>,
    queue: Arc<ExecQueue>,
    status: TaskStatus,
    callback: Option<Callback<GoTask>>,
}

impl GoTask {
    pub fn new(executor: Arc<Executor>, queue: Arc<ExecQueue>, routine: GoRoutine) -> Box<Self> {
        Box::new(Self {
            routine: Some(routine),
            executor,
            queue,
            status: TaskStatus::default(),
            callback: None,
        })
    }

    pub fn queue(&self) -> &Arc<ExecQueue> {
        &self.queue
    }

    pub fn set_callback(&mut self, callback: Callback<GoTask>) {
        self.callback = Some(callback);
    }
}

impl Task for GoTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl ExecWork for GoTask {
    fn execute(&mut self) {
        if let Some(routine) = self.routine.take() {
            routine();
        }
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

impl SubTask for GoTask {
    fn dispatch(self: Box<Self>, series: Series) {
        let executor = self.executor.clone();
        let queue = self.queue.clone();
        ExecBridge::submit(self, series, &executor, &queue);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for GoTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoTask")
            .field("queue", &self.queue.name())
            .field("status", &self.status)
            .finish()
    }
}

// =============================================================================
// THREAD TASK
// =============================================================================

pub type ThreadRoutine<I, O> = Arc<dyn Fn(&I, &mut O) + Send + Sync>;

/// Runs `routine(&input, &mut output)` on an exec queue
pub struct ThreadTask<I, O> {
    input: I,
    output: O,
    routine: ThreadRoutine<I, O>,
    executor: Arc<Executor>,
    queue: Arc<ExecQueue>,
    status: TaskStatus,
    callback: Option<Callback<ThreadTask<I, O>>>,
}

impl<I, O> ThreadTask<I, O>
where
    I: Send + 'static,
    O: Default + Send + 'static,
{
    pub fn new(
        executor: Arc<Executor>,
        queue: Arc<ExecQueue>,
        routine: ThreadRoutine<I, O>,
        input: I,
        callback: Option<Callback<ThreadTask<I, O>>>,
    ) -> Box<Self> {
        Box::new(Self {
            input,
            output: O::default(),
            routine,
            executor,
            queue,
            status: TaskStatus::default(),
            callback,
        })
    }

    pub fn input(&self) -> &I {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut I {
        &mut self.input
    }

    pub fn output(&self) -> &O {
        &self.output
    }

    pub fn take_output(&mut self) -> O {
        std::mem::take(&mut self.output)
    }

    pub fn set_callback(&mut self, callback: Callback<ThreadTask<I, O>>) {
        self.callback = Some(callback);
    }
}

impl<I, O> Task for ThreadTask<I, O> {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl<I, O> ExecWork for ThreadTask<I, O>
where
    I: Send + 'static,
    O: Default + Send + 'static,
{
    fn execute(&mut self) {
        (self.routine)(&self.input, &mut self.output);
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = status;
    }
}

impl<I, O> SubTask for ThreadTask<I, O>
where
    I: Send + 'static,
    O: Default + Send + 'static,
{
    fn dispatch(self: Box<Self>, series: Series) {
        let executor = self.executor.clone();
        let queue = self.queue.clone();
        ExecBridge::submit(self, series, &executor, &queue);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}
