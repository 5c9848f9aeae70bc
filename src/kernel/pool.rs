/*!
 * Worker Pool
 *
 * Resizable set of OS threads pulling tasks from one work queue.
 *
 * Exiting threads join each other in relay fashion: each one joins the
 * thread that exited before it, and `destroy` joins only the last. That
 * keeps destruction legal from inside a pool thread.
 */

use super::queue::WorkQueue;
use crate::core::PoolError;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use tracing::{debug, info, warn};

/// Unit of work run by a pool thread
pub trait PoolTask: Send + 'static {
    fn run(self: Box<Self>);

    /// Called instead of `run` when the pool is destroyed first
    fn cancel(self: Box<Self>) {}
}

impl<F> PoolTask for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

pub type BoxPoolTask = Box<dyn PoolTask>;

enum Entry {
    Task(BoxPoolTask),
    Exit,
}

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    static CURRENT_POOL: Cell<usize> = const { Cell::new(0) };
}

struct PoolState {
    nthreads: usize,
    /// Exit requests queued but not yet consumed
    retiring: usize,
    handles: HashMap<ThreadId, JoinHandle<()>>,
    /// Most recently exited thread, joined by the next one out
    last: Option<JoinHandle<()>>,
    spawned: usize,
}

struct PoolInner {
    id: usize,
    name: String,
    stack_size: usize,
    queue: WorkQueue<Entry>,
    state: Mutex<PoolState>,
    terminate: Condvar,
    terminating: AtomicBool,
}

/// Shared handle to a thread pool
#[derive(Clone)]
pub struct ThreadPool {
    inner: Arc<PoolInner>,
}

impl ThreadPool {
    /// Spawn `nthreads` workers. `stack_size` 0 keeps the platform default.
    pub fn new(name: &str, nthreads: usize, stack_size: usize) -> Result<Self, PoolError> {
        if nthreads == 0 {
            return Err(PoolError::InvalidThreadCount(0));
        }

        let pool = Self {
            inner: Arc::new(PoolInner {
                id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
                name: name.to_string(),
                stack_size,
                queue: WorkQueue::unbounded(),
                state: Mutex::new(PoolState {
                    nthreads: 0,
                    retiring: 0,
                    handles: HashMap::new(),
                    last: None,
                    spawned: 0,
                }),
                terminate: Condvar::new(),
                terminating: AtomicBool::new(false),
            }),
        };

        {
            let mut state = pool.inner.state.lock();
            for _ in 0..nthreads {
                if let Err(e) = pool.inner.spawn(&mut state) {
                    drop(state);
                    warn!(pool = %name, error = %e, "Thread pool creation failed, rolling back");
                    pool.terminate();
                    return Err(e);
                }
            }
        }

        info!(pool = %name, threads = nthreads, "Thread pool created");
        Ok(pool)
    }

    /// Queue a task for execution
    pub fn schedule<T: PoolTask>(&self, task: T) -> Result<(), PoolError> {
        self.schedule_boxed(Box::new(task))
    }

    pub fn schedule_boxed(&self, task: BoxPoolTask) -> Result<(), PoolError> {
        if self.inner.terminating.load(Ordering::Acquire) {
            return Err(PoolError::Terminating);
        }
        self.inner.queue.put(Entry::Task(task));
        Ok(())
    }

    /// Whether the calling thread belongs to this pool
    pub fn in_pool(&self) -> bool {
        CURRENT_POOL.with(|c| c.get()) == self.inner.id
    }

    pub fn thread_count(&self) -> usize {
        self.inner.state.lock().nthreads
    }

    pub fn increase(&self) -> Result<(), PoolError> {
        if self.inner.terminating.load(Ordering::Acquire) {
            return Err(PoolError::Terminating);
        }
        let mut state = self.inner.state.lock();
        self.inner.spawn(&mut state)?;
        debug!(pool = %self.inner.name, threads = state.nthreads, "Pool thread added");
        Ok(())
    }

    /// Retire one thread as soon as a worker is free; at least one thread
    /// always remains
    pub fn decrease(&self) -> Result<(), PoolError> {
        {
            let mut state = self.inner.state.lock();
            let remaining = state.nthreads.saturating_sub(state.retiring);
            if remaining <= 1 {
                return Err(PoolError::InvalidThreadCount(remaining.saturating_sub(1)));
            }
            state.retiring += 1;
        }
        self.inner.queue.put_head(Entry::Exit);
        debug!(pool = %self.inner.name, "Pool thread retirement requested");
        Ok(())
    }

    /// Stop every thread and cancel queued tasks
    pub fn destroy(&self) {
        self.destroy_with(|task| task.cancel());
    }

    /// Stop every thread, then hand each unexecuted task to `pending`.
    /// A second call is a no-op.
    pub fn destroy_with<F>(&self, mut pending: F)
    where
        F: FnMut(BoxPoolTask),
    {
        if self.inner.terminating.load(Ordering::Acquire) {
            return;
        }
        self.terminate();

        let mut cancelled = 0usize;
        while let Some(entry) = self.inner.queue.get() {
            if let Entry::Task(task) = entry {
                cancelled += 1;
                pending(task);
            }
        }

        info!(pool = %self.inner.name, pending = cancelled, "Thread pool destroyed");
    }

    fn terminate(&self) {
        let last = {
            let mut state = self.inner.state.lock();
            self.inner.queue.set_nonblock();
            self.inner.terminating.store(true, Ordering::Release);

            if self.in_pool() {
                // Detach ourselves; the worker loop notices and returns
                // without entering the exit relay.
                let me = thread::current().id();
                state.handles.remove(&me);
                state.nthreads -= 1;
            }

            while state.nthreads > 0 {
                self.inner.terminate.wait(&mut state);
            }
            state.last.take()
        };

        if let Some(handle) = last {
            let _ = handle.join();
        }
    }
}

impl PoolInner {
    fn spawn(self: &Arc<Self>, state: &mut PoolState) -> Result<(), PoolError> {
        let inner = self.clone();
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.name, state.spawned));
        if self.stack_size != 0 {
            builder = builder.stack_size(self.stack_size);
        }

        // The state lock is held until the handle is recorded, so the new
        // thread cannot reach the exit relay before its handle exists.
        let handle = builder
            .spawn(move || inner.routine())
            .map_err(|e| PoolError::SpawnFailed(e.to_string()))?;

        state.handles.insert(handle.thread().id(), handle);
        state.nthreads += 1;
        state.spawned += 1;
        Ok(())
    }

    fn routine(self: Arc<Self>) {
        CURRENT_POOL.with(|c| c.set(self.id));

        while !self.terminating.load(Ordering::Acquire) {
            match self.queue.get() {
                Some(Entry::Task(task)) => task.run(),
                Some(Entry::Exit) => {
                    self.state.lock().retiring -= 1;
                    break;
                }
                None => break,
            }
        }

        self.exit_routine();
    }

    fn exit_routine(&self) {
        let me = thread::current().id();
        let previous = {
            let mut state = self.state.lock();
            let Some(own) = state.handles.remove(&me) else {
                // Detached by a destroy running on this thread
                return;
            };
            let previous = state.last.replace(own);
            state.nthreads -= 1;
            if state.nthreads == 0 && self.terminating.load(Ordering::Acquire) {
                self.terminate.notify_one();
            }
            previous
        };

        if let Some(handle) = previous {
            let _ = handle.join();
        }
    }
}
