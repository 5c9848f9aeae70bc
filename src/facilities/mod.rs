/*!
 * Facilities
 *
 * Bridges from the callback world to blocking and async callers: a wait
 * group for threads that need to block until N events happened, and a
 * future that resolves when a series finishes.
 */

use crate::workflow::{Series, SeriesWork};
use parking_lot::{Condvar, Mutex};
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

/// Blocks waiters until `done` has been called `count` times
pub struct WaitGroup {
    remaining: Mutex<usize>,
    cond: Condvar,
}

impl WaitGroup {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    pub fn done(&self) {
        let mut remaining = self.remaining.lock();
        if *remaining == 0 {
            return;
        }
        *remaining -= 1;
        if *remaining == 0 {
            self.cond.notify_all();
        }
    }

    pub fn wait(&self) {
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            self.cond.wait(&mut remaining);
        }
    }

    /// False if `timeout` elapsed first
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut remaining = self.remaining.lock();
        while *remaining > 0 {
            if self.cond.wait_until(&mut remaining, deadline).timed_out() {
                return *remaining == 0;
            }
        }
        true
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.lock()
    }
}

impl std::fmt::Debug for WaitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WaitGroup").field("remaining", &self.remaining()).finish()
    }
}

/// Resolves when `series` finishes; yields whether it was canceled.
///
/// A callback already set on the series still runs first.
pub fn series_completion(series: &Series) -> impl Future<Output = bool> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    let previous = series.take_callback();
    series.set_callback(Box::new(move |series: &SeriesWork| {
        if let Some(previous) = previous {
            previous(series);
        }
        let _ = tx.send(series.is_canceled());
    }));

    // The series ran dry before the callback landed
    if series.is_finished() {
        if let Some(callback) = series.take_callback() {
            callback(series);
        }
    }

    let canceled = series.clone();
    async move {
        match rx.await {
            Ok(canceled) => canceled,
            Err(_) => canceled.is_canceled(),
        }
    }
}
