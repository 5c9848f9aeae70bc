/*!
 * Task Tests
 * Timers, signal barriers, exec and file tasks, repeaters, and gating
 * through the runtime factory
 */

use flowkernel::task::{FileTask, GoTask, SignalTask, ThreadRoutine, ThreadTask, TimerTask};
use flowkernel::workflow::{BoxTask, Series, SeriesWork, Workflow};
use flowkernel::{GlobalSettings, Runtime, Task, TaskState, WaitGroup};
use pretty_assertions::assert_eq;
use serial_test::serial;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};

fn runtime() -> Runtime {
    Runtime::new(GlobalSettings {
        compute_threads: 4,
        ..Default::default()
    })
    .unwrap()
}

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_timer_waits_its_duration() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let started = Instant::now();
    let timer = runtime.create_timer_task(
        Duration::from_millis(50),
        Some(Box::new(move |t: &mut TimerTask, _: &Series| {
            tx.send((t.state(), started.elapsed())).unwrap();
        })),
    );
    Workflow::start_series_work(timer, None);

    let (state, elapsed) = rx.recv_timeout(WAIT).unwrap();
    assert_eq!(state, TaskState::Success);
    assert!(elapsed >= Duration::from_millis(50));
    runtime.shutdown();
}

#[test]
fn test_timer_canceled_while_pending() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let mut timer = runtime.create_timer_task(
        Duration::from_secs(30),
        Some(Box::new(move |t: &mut TimerTask, _: &Series| {
            tx.send((t.state(), t.error())).unwrap();
        })),
    );
    let canceler = timer.canceler();
    Workflow::start_series_work(timer, None);

    assert!(canceler.cancel());
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::Aborted, libc::ECANCELED));
    runtime.shutdown();
}

#[test]
fn test_timer_canceled_before_dispatch() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let mut timer = runtime.create_timer_task(
        Duration::from_secs(30),
        Some(Box::new(move |t: &mut TimerTask, _: &Series| {
            tx.send(t.error()).unwrap();
        })),
    );
    assert!(timer.canceler().cancel());
    Workflow::start_series_work(timer, None);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), libc::ECANCELED);
    runtime.shutdown();
}

#[test]
#[serial]
fn test_shutdown_aborts_pending_timer() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let timer = runtime.create_timer_task(
        Duration::from_secs(30),
        Some(Box::new(move |t: &mut TimerTask, _: &Series| {
            tx.send(t.state()).unwrap();
        })),
    );
    Workflow::start_series_work(timer, None);
    std::thread::sleep(Duration::from_millis(20));
    runtime.shutdown();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), TaskState::Aborted);
}

#[test]
fn test_counter_released_by_go_tasks() {
    let runtime = runtime();
    let group = Arc::new(WaitGroup::new(1));
    let (counter, handle) = runtime.create_counter_task(
        8,
        Some(Box::new(|t: &mut SignalTask, _: &Series| {
            assert_eq!(t.state(), TaskState::Success);
        })),
    );

    for i in 0..8 {
        let handle = handle.clone();
        let go = runtime.create_go_task(&format!("count-{}", i % 3), move || {
            handle.count();
        });
        Workflow::start_series_work(go, None);
    }

    let wg = group.clone();
    Workflow::start_series_work(counter, Some(Box::new(move |_: &SeriesWork| wg.done())));
    assert!(group.wait_timeout(WAIT));
    assert_eq!(handle.remaining(), 0);
    runtime.shutdown();
}

#[test]
fn test_mailbox_collects_messages() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let (mailbox, handle) = runtime.create_mailbox_task(
        3,
        Some(Box::new(move |t: &mut SignalTask, _: &Series| {
            let mut got: Vec<u32> = std::iter::from_fn(|| t.take_message::<u32>()).collect();
            got.sort();
            tx.send(got).unwrap();
        })),
    );
    Workflow::start_series_work(mailbox, None);
    for value in [3u32, 1, 2] {
        assert!(handle.send(value));
    }
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), vec![1, 2, 3]);
    runtime.shutdown();
}

#[test]
fn test_selector_takes_first_submission() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let (selector, handle) = runtime.create_selector_task(
        3,
        Some(Box::new(move |t: &mut SignalTask, _: &Series| {
            tx.send(t.take_message::<&'static str>()).unwrap();
        })),
    );
    Workflow::start_series_work(selector, None);
    assert!(!handle.submit::<&'static str>(None));
    assert!(handle.submit(Some("winner")));
    assert!(!handle.submit(Some("late")));
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), Some("winner"));
    runtime.shutdown();
}

#[test]
fn test_thread_task_on_named_queue() {
    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let routine: ThreadRoutine<Vec<u64>, u64> = Arc::new(|input: &Vec<u64>, output: &mut u64| {
        *output = input.iter().sum();
    });
    let task = runtime.create_thread_task(
        "sum",
        routine,
        (1..=100).collect(),
        Some(Box::new(move |t: &mut ThreadTask<Vec<u64>, u64>, _: &Series| {
            tx.send((t.state(), *t.output())).unwrap();
        })),
    );
    Workflow::start_series_work(task, None);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), (TaskState::Success, 5050));
    runtime.shutdown();
}

#[test]
fn test_file_tasks_in_series() -> anyhow::Result<()> {
    let runtime = Runtime::new(GlobalSettings::default())?;
    let file = Arc::new(tempfile::tempfile()?);
    let (tx, rx) = mpsc::channel();

    let write = runtime.create_pwrite_task(file.clone(), &b"flowkernel"[..], 0, None);
    let sync = runtime.create_fsync_task(file.clone(), None);
    let read = runtime.create_pread_task(
        file,
        4,
        4,
        Some(Box::new(move |t: &mut FileTask, _: &Series| {
            let _ = tx.send((t.state(), t.take_data()));
        })),
    );
    let series = Workflow::create_series_work(write, None);
    series.push_back(sync);
    series.push_back(read);
    series.start();

    assert_eq!(rx.recv_timeout(WAIT)?, (TaskState::Success, b"kern".to_vec()));
    runtime.shutdown();
    Ok(())
}

#[test]
fn test_repeater_of_timers() {
    let runtime = runtime();
    let factory_runtime = runtime.clone();
    let (tx, rx) = mpsc::channel();
    let repeater = runtime.create_repeater_task(
        Box::new(move |round| {
            (round < 5).then(|| -> BoxTask { factory_runtime.create_timer_task(Duration::from_millis(2), None) })
        }),
        Some(Box::new(move |t: &mut flowkernel::task::RepeaterTask, _: &Series| {
            tx.send(t.rounds()).unwrap();
        })),
    );
    Workflow::start_series_work(repeater, None);
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), 5);
    runtime.shutdown();
}

#[test]
fn test_resource_pool_limits_concurrency() {
    let runtime = runtime();
    let pool = flowkernel::task::ResourcePool::new(2);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let group = Arc::new(WaitGroup::new(6));

    for i in 0..6 {
        let (active, peak, pool_after) = (active.clone(), peak.clone(), pool.clone());
        let mut go = runtime.create_go_task(&format!("gated-{}", i), move || {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(10));
            active.fetch_sub(1, Ordering::SeqCst);
        });
        go.set_callback(Box::new(move |_: &mut GoTask, _: &Series| pool_after.post()));
        let wg = group.clone();
        Workflow::start_series_work(pool.get(go), Some(Box::new(move |_: &SeriesWork| wg.done())));
    }

    assert!(group.wait_timeout(WAIT));
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(pool.available(), 2);
    runtime.shutdown();
}

#[test]
fn test_start_and_dismiss_with_root_exports() {
    use flowkernel::*;

    let runtime = runtime();
    let (tx, rx) = mpsc::channel();
    let series = runtime
        .create_timer_task(
            Duration::from_millis(5),
            Some(Box::new(move |t: &mut TimerTask, _: &Series| tx.send(t.state()).unwrap())),
        )
        .start();
    assert_eq!(rx.recv_timeout(WAIT).unwrap(), TaskState::Success);
    assert!(!series.is_canceled());

    let dropped = runtime.create_timer_task(
        Duration::from_millis(5),
        Some(Box::new(|_: &mut TimerTask, _: &Series| panic!("dismissed task ran"))),
    );
    dropped.dismiss();
    runtime.shutdown();
}
