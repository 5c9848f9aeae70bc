/*!
 * SubTask
 *
 * One schedulable unit of a task graph. A task is an owned box that moves
 * from its series into whatever operation it is waiting on, then back
 * through [`subtask_done`], which asks it for the next unit of work.
 *
 * Synchronous completions nest: a task finishing inside `dispatch` calls
 * `subtask_done`, which dispatches the next task, and so on. Past
 * `MAX_DISPATCH_DEPTH` nested frames the continuation is parked on a
 * thread-local queue and drained by the outermost frame.
 */

use super::series::Series;
use crate::core::limits::MAX_DISPATCH_DEPTH;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::sync::atomic::Ordering;

pub type BoxTask = Box<dyn SubTask>;

/// Unit of work in a series
pub trait SubTask: Send + 'static {
    /// Begin the work. Exactly one `subtask_done(self, series)` must follow,
    /// either before returning or later from whichever thread completes it.
    fn dispatch(self: Box<Self>, series: Series);

    /// The work finished; run callbacks and hand back the next task
    fn done(self: Box<Self>, series: &Series) -> Option<BoxTask> {
        series.pop()
    }
}

thread_local! {
    static DEPTH: Cell<usize> = const { Cell::new(0) };
    static DEFERRED: RefCell<VecDeque<(BoxTask, Series)>> = const { RefCell::new(VecDeque::new()) };
}

/// Resume the graph after `task` finished its work on `series`
pub fn subtask_done(task: BoxTask, series: Series) {
    let depth = DEPTH.with(|d| d.get());
    if depth >= MAX_DISPATCH_DEPTH {
        DEFERRED.with(|q| q.borrow_mut().push_back((task, series)));
        return;
    }

    DEPTH.with(|d| d.set(depth + 1));
    advance(task, series);
    if depth == 0 {
        while let Some((task, series)) = DEFERRED.with(|q| q.borrow_mut().pop_front()) {
            advance(task, series);
        }
    }
    DEPTH.with(|d| d.set(depth));
}

fn advance(mut task: BoxTask, mut series: Series) {
    loop {
        if let Some(next) = task.done(&series) {
            next.dispatch(series);
            return;
        }
        match series_finished(&series) {
            Some((parallel, outer)) => {
                task = parallel;
                series = outer;
            }
            None => return,
        }
    }
}

/// A series ran dry. If it was the last running branch of a parallel
/// work, return that parallel and the series it belongs to.
pub(crate) fn series_finished(series: &Series) -> Option<(BoxTask, Series)> {
    let join = series.parallel_join()?;
    if join.nleft.fetch_sub(1, Ordering::AcqRel) != 1 {
        return None;
    }
    let parallel = join.work.lock().take()?;
    Some((parallel, join.outer.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::SeriesWork;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Step {
        hits: Arc<AtomicUsize>,
    }

    impl SubTask for Step {
        fn dispatch(self: Box<Self>, series: Series) {
            self.hits.fetch_add(1, Ordering::SeqCst);
            subtask_done(self, series);
        }
    }

    #[test]
    fn test_deep_synchronous_chain() {
        let hits = Arc::new(AtomicUsize::new(0));
        let series = SeriesWork::new(Box::new(Step { hits: hits.clone() }), None);
        // Far deeper than the stack would allow without trampolining
        for _ in 0..100_000 {
            series.push_back(Box::new(Step { hits: hits.clone() }));
        }
        series.start();

        assert_eq!(hits.load(Ordering::SeqCst), 100_001);
        assert!(series.is_finished());
        assert_eq!(DEPTH.with(|d| d.get()), 0);
    }
}
