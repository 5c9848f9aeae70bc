/*!
 * SeriesWork
 *
 * An ordered, growable queue of tasks forming one sequential flow. The
 * running task pops its successor; external code may push at either end
 * at any time. A canceled series drops whatever is still queued on its
 * next pop instead of dispatching it.
 */

use super::parallel::ParallelJoin;
use super::subtask::{series_finished, subtask_done, BoxTask, SubTask};
use crate::core::limits::SERIES_INLINE_CAPACITY;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared handle to a series
pub type Series = Arc<SeriesWork>;

/// Runs once when the series pops its last task
pub type SeriesCallback = Box<dyn FnOnce(&SeriesWork) + Send>;

pub struct SeriesWork {
    first: Mutex<Option<BoxTask>>,
    queue: Mutex<VecDeque<BoxTask>>,
    last: Mutex<Option<BoxTask>>,
    canceled: AtomicBool,
    finished: AtomicBool,
    callback: Mutex<Option<SeriesCallback>>,
    context: Mutex<Option<Box<dyn Any + Send>>>,
    in_parallel: Mutex<Option<Arc<ParallelJoin>>>,
}

impl SeriesWork {
    pub fn new(first: BoxTask, callback: Option<SeriesCallback>) -> Series {
        Self::build(Some(first), callback)
    }

    /// A series whose tasks are all pushed later
    pub fn empty(callback: Option<SeriesCallback>) -> Series {
        Self::build(None, callback)
    }

    fn build(first: Option<BoxTask>, callback: Option<SeriesCallback>) -> Series {
        Arc::new(Self {
            first: Mutex::new(first),
            queue: Mutex::new(VecDeque::with_capacity(SERIES_INLINE_CAPACITY)),
            last: Mutex::new(None),
            canceled: AtomicBool::new(false),
            finished: AtomicBool::new(false),
            callback: Mutex::new(callback),
            context: Mutex::new(None),
            in_parallel: Mutex::new(None),
        })
    }

    pub fn start_with(first: BoxTask, callback: Option<SeriesCallback>) -> Series {
        let series = Self::new(first, callback);
        series.start();
        series
    }

    /// Dispatch the first task
    pub fn start(self: &Arc<Self>) {
        let first = self.first.lock().take();
        match first.or_else(|| self.pop()) {
            Some(task) => task.dispatch(self.clone()),
            None => {
                if let Some((parallel, outer)) = series_finished(self) {
                    subtask_done(parallel, outer);
                }
            }
        }
    }

    /// Drop every task of a series that will not be started
    pub fn dismiss(&self) {
        let first = self.first.lock().take();
        let queued: Vec<_> = self.queue.lock().drain(..).collect();
        let last = self.last.lock().take();
        drop((first, queued, last));
    }

    pub fn push_back(&self, task: BoxTask) {
        self.queue.lock().push_back(task);
    }

    /// Run `task` before everything already queued
    pub fn push_front(&self, task: BoxTask) {
        self.queue.lock().push_front(task);
    }

    /// Task popped once the queue is empty, before the series finishes
    pub fn set_last_task(&self, task: BoxTask) {
        *self.last.lock() = Some(task);
    }

    pub fn set_callback(&self, callback: SeriesCallback) {
        *self.callback.lock() = Some(callback);
    }

    pub(crate) fn take_callback(&self) -> Option<SeriesCallback> {
        self.callback.lock().take()
    }

    /// Remaining tasks are dropped at the next pop
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub fn is_in_parallel(&self) -> bool {
        self.in_parallel.lock().is_some()
    }

    /// Tasks queued, not counting the first or last task
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn set_context<T: Any + Send>(&self, value: T) {
        *self.context.lock() = Some(Box::new(value));
    }

    pub fn with_context<T: Any + Send, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.context.lock();
        f(guard.as_mut().and_then(|c| c.downcast_mut::<T>()))
    }

    pub fn take_context<T: Any + Send>(&self) -> Option<T> {
        let mut guard = self.context.lock();
        match guard.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *guard = Some(other);
                None
            }
        }
    }

    pub(crate) fn parallel_join(&self) -> Option<Arc<ParallelJoin>> {
        self.in_parallel.lock().clone()
    }

    pub(crate) fn set_parallel_join(&self, join: Arc<ParallelJoin>) {
        *self.in_parallel.lock() = Some(join);
    }

    /// Next task to dispatch; `None` finishes the series
    pub fn pop(&self) -> Option<BoxTask> {
        let canceled = self.is_canceled();
        let task = self.pop_task();
        if !canceled {
            return task;
        }

        let mut task = task;
        while let Some(dropped) = task {
            drop(dropped);
            task = self.pop_task();
        }
        None
    }

    fn pop_task(&self) -> Option<BoxTask> {
        let next = self.queue.lock().pop_front();
        let task = next.or_else(|| self.last.lock().take());
        if task.is_none() && !self.finished.swap(true, Ordering::AcqRel) {
            let callback = self.callback.lock().take();
            if let Some(callback) = callback {
                callback(self);
            }
        }
        task
    }
}

impl std::fmt::Debug for SeriesWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesWork")
            .field("queued", &self.len())
            .field("canceled", &self.is_canceled())
            .field("finished", &self.is_finished())
            .field("in_parallel", &self.is_in_parallel())
            .finish()
    }
}
