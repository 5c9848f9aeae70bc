/*!
 * Resource Pool
 *
 * A counting gate for tasks. `get` wraps a task in a conditional that
 * releases it once one of the pool's tokens is free; `post` hands the
 * token back and releases the oldest waiter.
 */

use super::signal::{ConditionalHandle, SignalTask};
use crate::workflow::BoxTask;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

struct PoolState {
    tokens: usize,
    waiters: VecDeque<ConditionalHandle>,
}

#[derive(Clone)]
pub struct ResourcePool {
    state: Arc<Mutex<PoolState>>,
}

impl ResourcePool {
    pub fn new(tokens: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                tokens,
                waiters: VecDeque::new(),
            })),
        }
    }

    /// Gate `task` behind one token; run the returned task in its place
    pub fn get(&self, task: BoxTask) -> Box<SignalTask> {
        let (conditional, handle) = SignalTask::conditional(task, None);
        let granted = {
            let mut state = self.state.lock();
            if state.tokens > 0 {
                state.tokens -= 1;
                true
            } else {
                state.waiters.push_back(handle.clone());
                false
            }
        };
        if granted {
            handle.signal::<()>(None);
        }
        conditional
    }

    /// Return one token
    pub fn post(&self) {
        let waiter = {
            let mut state = self.state.lock();
            match state.waiters.pop_front() {
                Some(waiter) => Some(waiter),
                None => {
                    state.tokens += 1;
                    None
                }
            }
        };
        if let Some(waiter) = waiter {
            waiter.signal::<()>(None);
        }
    }

    pub fn available(&self) -> usize {
        self.state.lock().tokens
    }

    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }
}

impl std::fmt::Debug for ResourcePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourcePool")
            .field("available", &state.tokens)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}
