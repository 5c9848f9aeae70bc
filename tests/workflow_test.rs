/*!
 * Workflow Tests
 * Series ordering and cancellation, parallel joins, and long chains
 */

use flowkernel::task::GenericTask;
use flowkernel::workflow::{subtask_done, BoxTask, ParallelWork, Series, SeriesWork, SubTask, Workflow};
use flowkernel::{GlobalSettings, Runtime, WaitGroup};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Records its id when dispatched, and its drop
struct Step {
    id: usize,
    log: Arc<Mutex<Vec<usize>>>,
    drops: Arc<AtomicUsize>,
    cancel: bool,
}

impl SubTask for Step {
    fn dispatch(self: Box<Self>, series: Series) {
        self.log.lock().push(self.id);
        if self.cancel {
            series.cancel();
        }
        subtask_done(self, series);
    }
}

impl Drop for Step {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Steps {
    log: Arc<Mutex<Vec<usize>>>,
    drops: Arc<AtomicUsize>,
}

impl Steps {
    fn new() -> Self {
        Self {
            log: Arc::default(),
            drops: Arc::default(),
        }
    }

    fn step(&self, id: usize) -> BoxTask {
        Box::new(Step {
            id,
            log: self.log.clone(),
            drops: self.drops.clone(),
            cancel: false,
        })
    }

    fn canceling(&self, id: usize) -> BoxTask {
        Box::new(Step {
            id,
            log: self.log.clone(),
            drops: self.drops.clone(),
            cancel: true,
        })
    }
}

fn runtime() -> Runtime {
    Runtime::new(GlobalSettings {
        compute_threads: 4,
        ..Default::default()
    })
    .unwrap()
}

#[test]
fn test_push_front_runs_next() {
    let steps = Steps::new();
    let series = SeriesWork::new(steps.step(0), None);
    series.push_back(steps.step(2));
    series.push_back(steps.step(3));
    series.push_front(steps.step(1));
    series.set_last_task(steps.step(4));
    series.start();

    assert_eq!(*steps.log.lock(), vec![0, 1, 2, 3, 4]);
    assert!(series.is_finished());
}

#[test]
fn test_cancel_drops_remaining_without_running() {
    let steps = Steps::new();
    let callback_ran = Arc::new(AtomicUsize::new(0));
    let hits = callback_ran.clone();

    let series = SeriesWork::new(
        steps.step(0),
        Some(Box::new(move |s: &SeriesWork| {
            assert!(s.is_canceled());
            hits.fetch_add(1, Ordering::SeqCst);
        })),
    );
    series.push_back(steps.canceling(1));
    for id in 2..10 {
        series.push_back(steps.step(id));
    }
    series.set_last_task(steps.step(99));
    series.start();

    assert_eq!(*steps.log.lock(), vec![0, 1]);
    // Every task was released exactly once, run or not
    assert_eq!(steps.drops.load(Ordering::SeqCst), 11);
    assert_eq!(callback_ran.load(Ordering::SeqCst), 1);
}

#[test]
fn test_long_synchronous_chain() {
    let done = Arc::new(AtomicUsize::new(0));
    let series = SeriesWork::empty(None);
    for _ in 0..100_000 {
        let done = done.clone();
        series.push_back(GenericTask::new(Some(Box::new(move |_: &mut GenericTask, _: &Series| {
            done.fetch_add(1, Ordering::Relaxed);
        }))));
    }
    series.start();
    assert_eq!(done.load(Ordering::Relaxed), 100_000);
    assert!(series.is_finished());
}

#[test]
fn test_parallel_with_skewed_branches() {
    let runtime = runtime();
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let finished = Arc::new(Mutex::new(Vec::new()));
    let group = Arc::new(WaitGroup::new(1));

    let mut parallel = ParallelWork::new(None);
    for branch in 0..8usize {
        let delay = Duration::from_millis(rng.gen_range(0..30));
        let finished = finished.clone();
        let go = runtime.create_go_task(&format!("branch-{}", branch), move || {
            std::thread::sleep(delay);
            finished.lock().push(branch);
        });
        parallel.add_series(SeriesWork::new(go, None));
    }

    let joined = finished.clone();
    parallel.set_callback(Box::new(move |p: &mut ParallelWork, _: &Series| {
        assert_eq!(joined.lock().len(), p.size());
        for i in 0..p.size() {
            assert!(p.series_at(i).unwrap().is_finished());
        }
    }));

    let wg = group.clone();
    Workflow::start_parallel_work(parallel, Some(Box::new(move |_: &SeriesWork| wg.done())));
    assert!(group.wait_timeout(Duration::from_secs(5)));

    let mut order = finished.lock().clone();
    order.sort();
    assert_eq!(order, (0..8).collect::<Vec<_>>());
    runtime.shutdown();
}

#[test]
fn test_nested_parallel_continues_outer_series() {
    let steps = Steps::new();
    let inner = Workflow::create_parallel_work_from(
        vec![SeriesWork::new(steps.step(10), None), SeriesWork::new(steps.step(11), None)],
        None,
    );
    let outer = Workflow::create_parallel_work_from(
        vec![SeriesWork::new(inner, None), SeriesWork::new(steps.step(20), None)],
        None,
    );

    let series = SeriesWork::new(steps.step(0), None);
    series.push_back(outer);
    series.push_back(steps.step(30));
    series.start();

    let log = steps.log.lock().clone();
    assert_eq!(log.first(), Some(&0));
    assert_eq!(log.last(), Some(&30));
    assert_eq!(log.len(), 5);
    assert!(series.is_finished());
}

#[test]
fn test_series_context_shared_by_tasks() {
    let series = SeriesWork::new(
        GenericTask::new(Some(Box::new(|_: &mut GenericTask, s: &Series| {
            s.set_context(41u32);
        }))),
        None,
    );
    series.push_back(GenericTask::new(Some(Box::new(|_: &mut GenericTask, s: &Series| {
        s.with_context(|v: Option<&mut u32>| *v.unwrap() += 1);
    }))));
    series.start();
    assert_eq!(series.take_context::<u32>(), Some(42));
}

#[derive(Debug, Clone, Copy)]
enum Push {
    Back,
    Front,
}

/// The k-th task to run pushes `script[k]` new tasks onto its series
struct Scripted {
    id: usize,
    script: Arc<Vec<Vec<Push>>>,
    log: Arc<Mutex<Vec<usize>>>,
    next: Arc<AtomicUsize>,
}

impl Scripted {
    fn spawn(&self) -> BoxTask {
        Box::new(Scripted {
            id: self.next.fetch_add(1, Ordering::SeqCst),
            script: self.script.clone(),
            log: self.log.clone(),
            next: self.next.clone(),
        })
    }
}

impl SubTask for Scripted {
    fn dispatch(self: Box<Self>, series: Series) {
        let turn = {
            let mut log = self.log.lock();
            log.push(self.id);
            log.len() - 1
        };
        for push in self.script.get(turn).into_iter().flatten() {
            let task = self.spawn();
            match push {
                Push::Back => series.push_back(task),
                Push::Front => series.push_front(task),
            }
        }
        subtask_done(self, series);
    }
}

/// Run order of a script against a plain deque
fn reference_order(script: &[Vec<Push>]) -> Vec<usize> {
    let mut pending = VecDeque::from([0]);
    let mut next = 1;
    let mut order = Vec::new();
    while let Some(id) = pending.pop_front() {
        let turn = order.len();
        order.push(id);
        for push in script.get(turn).into_iter().flatten() {
            match push {
                Push::Back => pending.push_back(next),
                Push::Front => pending.push_front(next),
            }
            next += 1;
        }
    }
    order
}

fn push_strategy() -> impl Strategy<Value = Push> {
    prop_oneof![Just(Push::Back), Just(Push::Front)]
}

proptest! {
    #[test]
    fn prop_series_runs_in_push_order(count in 1usize..64) {
        let steps = Steps::new();
        let series = SeriesWork::new(steps.step(0), None);
        for id in 1..count {
            series.push_back(steps.step(id));
        }
        series.start();
        prop_assert_eq!(steps.log.lock().clone(), (0..count).collect::<Vec<_>>());
        prop_assert_eq!(steps.drops.load(Ordering::SeqCst), count);
    }

    #[test]
    fn prop_interleaved_pushes_match_deque(
        script in proptest::collection::vec(proptest::collection::vec(push_strategy(), 0..4), 0..32)
    ) {
        let expected = reference_order(&script);
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Scripted {
            id: 0,
            script: Arc::new(script),
            log: log.clone(),
            next: Arc::new(AtomicUsize::new(1)),
        };
        let series = SeriesWork::start_with(Box::new(first), None);

        prop_assert!(series.is_finished());
        prop_assert!(!series.is_canceled());
        prop_assert_eq!(log.lock().clone(), expected);
    }
}
