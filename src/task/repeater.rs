/*!
 * Repeater Task
 *
 * Runs tasks produced by a factory one after another until the factory
 * returns `None`. Each round the repeater queues itself in front of the
 * series and dispatches the new task, so the loop never grows the stack.
 */

use super::{Callback, Task, TaskStatus};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};

/// Produces the task for round `n`, or `None` to stop
pub type RepeaterFactory = Box<dyn FnMut(usize) -> Option<BoxTask> + Send>;

pub struct RepeaterTask {
    factory: RepeaterFactory,
    rounds: usize,
    status: TaskStatus,
    callback: Option<Callback<RepeaterTask>>,
}

impl RepeaterTask {
    pub fn new(factory: RepeaterFactory, callback: Option<Callback<RepeaterTask>>) -> Box<Self> {
        Box::new(Self {
            factory,
            rounds: 0,
            status: TaskStatus::default(),
            callback,
        })
    }

    /// Tasks created so far
    pub fn rounds(&self) -> usize {
        self.rounds
    }

    pub fn set_callback(&mut self, callback: Callback<RepeaterTask>) {
        self.callback = Some(callback);
    }
}

impl Task for RepeaterTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl SubTask for RepeaterTask {
    fn dispatch(mut self: Box<Self>, series: Series) {
        match (self.factory)(self.rounds) {
            Some(task) => {
                self.rounds += 1;
                series.push_front(self);
                task.dispatch(series);
            }
            None => {
                self.status = TaskStatus::success();
                subtask_done(self, series);
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

impl std::fmt::Debug for RepeaterTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RepeaterTask")
            .field("rounds", &self.rounds)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::GenericTask;
    use crate::workflow::SeriesWork;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_repeats_until_factory_stops() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let factory: RepeaterFactory = Box::new(move |round: usize| -> Option<BoxTask> {
            if round == 5000 {
                return None;
            }
            let sink = sink.clone();
            let task: BoxTask = GenericTask::new(Some(Box::new(move |_: &mut GenericTask, _: &Series| {
                sink.lock().push(round);
            })));
            Some(task)
        });
        let rounds = Arc::new(Mutex::new(0));
        let seen = rounds.clone();
        let repeater = RepeaterTask::new(
            factory,
            Some(Box::new(move |r: &mut RepeaterTask, _: &Series| {
                *seen.lock() = r.rounds();
            })),
        );
        let series = SeriesWork::start_with(repeater, None);

        assert!(series.is_finished());
        assert_eq!(*rounds.lock(), 5000);
        let log = log.lock();
        assert_eq!(log.len(), 5000);
        assert!(log.windows(2).all(|w| w[0] + 1 == w[1]));
    }
}
