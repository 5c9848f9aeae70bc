/*!
 * Executor
 *
 * Runs CPU-bound or blocking sessions on a dedicated thread pool. Sessions
 * submitted to the same `ExecQueue` execute strictly one at a time in
 * arrival order; different queues run concurrently.
 */

use super::pool::{PoolTask, ThreadPool};
use crate::core::limits::DEFAULT_POOL_STACK_SIZE;
use crate::core::ExecError;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

/// How an exec session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecState {
    Finished,
    /// Dropped from its queue during executor shutdown
    Canceled,
    /// Could not be scheduled; the error carries an errno
    Error,
}

/// Work item accepted by the executor
pub trait ExecSession: Send + 'static {
    fn execute(&mut self);

    /// Called exactly once, after `execute` or instead of it
    fn handle(self: Box<Self>, state: ExecState, error: i32);
}

pub type BoxExecSession = Box<dyn ExecSession>;

#[derive(Default)]
struct QueueState {
    sessions: VecDeque<BoxExecSession>,
    /// A routine for this queue is scheduled or running
    running: bool,
}

/// Serialization lane for exec sessions
#[derive(Default)]
pub struct ExecQueue {
    name: Option<String>,
    state: Mutex<QueueState>,
}

impl ExecQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn named(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            name: Some(name.into()),
            state: Mutex::default(),
        })
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Sessions waiting, not counting one currently executing
    pub fn pending(&self) -> usize {
        self.state.lock().sessions.len()
    }

    fn cancel_all(&self) {
        let drained: Vec<_> = {
            let mut state = self.state.lock();
            state.running = false;
            state.sessions.drain(..).collect()
        };
        for session in drained {
            session.handle(ExecState::Canceled, 0);
        }
    }
}

impl std::fmt::Debug for ExecQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecQueue")
            .field("name", &self.name)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Pool task draining one session from a queue
struct QueueRoutine {
    queue: Arc<ExecQueue>,
    pool: ThreadPool,
}

impl PoolTask for QueueRoutine {
    fn run(self: Box<Self>) {
        let Some(mut session) = self.queue.state.lock().sessions.pop_front() else {
            return;
        };

        session.execute();

        let more = {
            let mut state = self.queue.state.lock();
            state.running = !state.sessions.is_empty();
            state.running
        };

        if more {
            let queue = self.queue.clone();
            let pool = self.pool.clone();
            if pool.schedule(*self).is_err() {
                queue.cancel_all();
            }
        }

        session.handle(ExecState::Finished, 0);
    }

    fn cancel(self: Box<Self>) {
        self.queue.cancel_all();
    }
}

/// Thread pool front end for exec sessions
pub struct Executor {
    pool: ThreadPool,
}

impl Executor {
    pub fn new(nthreads: usize) -> Result<Self, ExecError> {
        let pool = ThreadPool::new("flowkernel-compute", nthreads, DEFAULT_POOL_STACK_SIZE)?;
        info!(threads = nthreads, "Executor started");
        Ok(Self { pool })
    }

    /// Submit a session to `queue`
    ///
    /// Never fails synchronously: when the pool is gone the session is
    /// handled with `ExecState::Error` and `ESHUTDOWN`.
    pub fn request(&self, session: BoxExecSession, queue: &Arc<ExecQueue>) {
        let mut state = queue.state.lock();
        state.sessions.push_back(session);
        if state.running {
            return;
        }

        let routine = QueueRoutine {
            queue: queue.clone(),
            pool: self.pool.clone(),
        };
        match self.pool.schedule(routine) {
            Ok(()) => state.running = true,
            Err(e) => {
                let rejected = state.sessions.pop_back();
                drop(state);
                debug!(error = %e, "Exec request rejected");
                if let Some(session) = rejected {
                    session.handle(ExecState::Error, libc::ESHUTDOWN);
                }
            }
        }
    }

    pub fn increase_thread(&self) -> Result<(), ExecError> {
        Ok(self.pool.increase()?)
    }

    pub fn decrease_thread(&self) -> Result<(), ExecError> {
        Ok(self.pool.decrease()?)
    }

    pub fn thread_count(&self) -> usize {
        self.pool.thread_count()
    }

    /// Stop the pool; queued sessions are handled as canceled
    pub fn shutdown(&self) {
        self.pool.destroy();
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
