/*!
 * Thread Pool Tests
 * Scheduling, resizing, self-destroy, and cancellation of queued work
 */

use flowkernel::kernel::{PoolTask, ThreadPool};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

struct Counted {
    ran: Arc<AtomicUsize>,
    canceled: Arc<AtomicUsize>,
}

impl PoolTask for Counted {
    fn run(self: Box<Self>) {
        self.ran.fetch_add(1, Ordering::SeqCst);
    }

    fn cancel(self: Box<Self>) {
        self.canceled.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_all_tasks_run() {
    let pool = ThreadPool::new("test", 4, 0).unwrap();
    let (tx, rx) = mpsc::channel();
    for i in 0..64 {
        let tx = tx.clone();
        pool.schedule(move || tx.send(i).unwrap()).unwrap();
    }
    let mut got: Vec<i32> = (0..64).map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap()).collect();
    got.sort();
    assert_eq!(got, (0..64).collect::<Vec<_>>());
    pool.destroy();
}

#[test]
fn test_resize() {
    let pool = ThreadPool::new("resize", 2, 0).unwrap();
    pool.increase().unwrap();
    assert_eq!(pool.thread_count(), 3);
    pool.decrease().unwrap();
    pool.decrease().unwrap();
    // The last thread is never retired
    assert!(pool.decrease().is_err());
    pool.destroy();
}

#[test]
fn test_destroy_cancels_queued_tasks() {
    let pool = ThreadPool::new("cancel", 1, 0).unwrap();
    let (gate_tx, gate_rx) = mpsc::channel::<()>();
    let (started_tx, started_rx) = mpsc::channel::<()>();
    pool.schedule(move || {
        started_tx.send(()).unwrap();
        let _ = gate_rx.recv_timeout(Duration::from_millis(200));
    })
    .unwrap();
    started_rx.recv().unwrap();

    let ran = Arc::new(AtomicUsize::new(0));
    let canceled = Arc::new(AtomicUsize::new(0));
    for _ in 0..10 {
        pool.schedule(Counted {
            ran: ran.clone(),
            canceled: canceled.clone(),
        })
        .unwrap();
    }
    drop(gate_tx);
    pool.destroy();

    assert_eq!(ran.load(Ordering::SeqCst) + canceled.load(Ordering::SeqCst), 10);
    assert!(pool.schedule(|| {}).is_err());
}

#[test]
fn test_destroy_from_inside_pool() {
    let pool = Arc::new(ThreadPool::new("self", 2, 0).unwrap());
    let (tx, rx) = mpsc::channel();
    let inner = pool.clone();
    pool.schedule(move || {
        assert!(inner.in_pool());
        inner.destroy();
        tx.send(()).unwrap();
    })
    .unwrap();
    rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(!pool.in_pool());
}
