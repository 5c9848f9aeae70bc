/*!
 * ParallelWork
 *
 * A task that starts several series at once and finishes when the last
 * of them runs dry. While branches run, the parallel itself is parked in
 * a join record shared by every branch; the branch that brings the
 * remaining count to zero takes it back and continues the outer series.
 */

use super::series::Series;
use super::subtask::{subtask_done, BoxTask, SubTask};
use crate::core::limits::PARALLEL_INLINE_CAPACITY;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Runs once after every branch finished
pub type ParallelCallback = Box<dyn FnOnce(&mut ParallelWork, &Series) + Send>;

pub(crate) struct ParallelJoin {
    pub nleft: AtomicUsize,
    pub work: Mutex<Option<BoxTask>>,
    pub outer: Series,
}

pub struct ParallelWork {
    branches: Vec<Series>,
    callback: Option<ParallelCallback>,
    context: Option<Box<dyn Any + Send>>,
}

impl ParallelWork {
    pub fn new(callback: Option<ParallelCallback>) -> Box<Self> {
        Box::new(Self {
            branches: Vec::with_capacity(PARALLEL_INLINE_CAPACITY),
            callback,
            context: None,
        })
    }

    pub fn from_series(branches: Vec<Series>, callback: Option<ParallelCallback>) -> Box<Self> {
        Box::new(Self {
            branches,
            callback,
            context: None,
        })
    }

    /// Branches may only be added before the parallel starts
    pub fn add_series(&mut self, series: Series) {
        self.branches.push(series);
    }

    pub fn series_at(&self, index: usize) -> Option<&Series> {
        self.branches.get(index)
    }

    pub fn size(&self) -> usize {
        self.branches.len()
    }

    pub fn set_callback(&mut self, callback: ParallelCallback) {
        self.callback = Some(callback);
    }

    pub fn set_context<T: Any + Send>(&mut self, value: T) {
        self.context = Some(Box::new(value));
    }

    pub fn context<T: Any + Send>(&self) -> Option<&T> {
        self.context.as_ref().and_then(|c| c.downcast_ref::<T>())
    }
}

impl SubTask for ParallelWork {
    fn dispatch(self: Box<Self>, series: Series) {
        if self.branches.is_empty() {
            subtask_done(self, series);
            return;
        }

        let branches = self.branches.clone();
        let join = Arc::new(ParallelJoin {
            nleft: AtomicUsize::new(branches.len()),
            work: Mutex::new(None),
            outer: series,
        });
        for branch in &branches {
            branch.set_parallel_join(join.clone());
        }
        *join.work.lock() = Some(self);

        for branch in branches {
            branch.start();
        }
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for ParallelWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParallelWork")
            .field("branches", &self.branches.len())
            .finish()
    }
}
