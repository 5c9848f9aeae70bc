/*!
 * Targets and Scheduling Objects
 *
 * A target is one remote endpoint with a load ceiling and a list of idle
 * connections. Scheduling objects hand out targets: a bare target admits
 * up to `max_load` concurrent sessions, a group picks the least loaded
 * member with free capacity. Both may wait up to a timeout.
 *
 * Lock order: group members, then target load, then target idle list.
 */

use super::conn::ConnEntry;
use crate::config::EndpointParams;
use crate::core::TimeoutMs;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::debug;

/// Source of targets for client sessions
pub trait SchedObject: Send + Sync {
    /// Reserve one unit of load, waiting up to `wait_timeout` ms (-1 forever)
    fn acquire(&self, wait_timeout: TimeoutMs) -> Option<Arc<CommTarget>>;
}

fn wait_deadline(wait_timeout: TimeoutMs) -> Option<Instant> {
    if wait_timeout < 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_millis(wait_timeout as u64))
    }
}

/// Wait on `cond`; false once the deadline passed
fn wait_until<T>(cond: &Condvar, guard: &mut MutexGuard<'_, T>, deadline: Option<Instant>) -> bool {
    match deadline {
        None => {
            cond.wait(guard);
            true
        }
        Some(deadline) => !cond.wait_until(guard, deadline).timed_out(),
    }
}

struct GroupInner {
    members: Mutex<Vec<Arc<CommTarget>>>,
    cond: Condvar,
}

/// Remote endpoint
pub struct CommTarget {
    addr: SocketAddr,
    connect_timeout: TimeoutMs,
    response_timeout: TimeoutMs,
    max_load: usize,
    load: Mutex<usize>,
    cond: Condvar,
    idle: Mutex<VecDeque<Arc<ConnEntry>>>,
    group: Mutex<Weak<GroupInner>>,
    this: Weak<CommTarget>,
}

impl CommTarget {
    pub fn new(addr: SocketAddr, params: &EndpointParams) -> Arc<Self> {
        Self::with_timeouts(
            addr,
            params.connect_timeout,
            params.response_timeout,
            params.max_connections,
        )
    }

    pub fn with_timeouts(
        addr: SocketAddr,
        connect_timeout: TimeoutMs,
        response_timeout: TimeoutMs,
        max_load: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            addr,
            connect_timeout,
            response_timeout,
            max_load: max_load.max(1),
            load: Mutex::new(0),
            cond: Condvar::new(),
            idle: Mutex::new(VecDeque::new()),
            group: Mutex::new(Weak::new()),
            this: this.clone(),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn connect_timeout(&self) -> TimeoutMs {
        self.connect_timeout
    }

    pub fn response_timeout(&self) -> TimeoutMs {
        self.response_timeout
    }

    pub fn max_load(&self) -> usize {
        self.max_load
    }

    pub fn current_load(&self) -> usize {
        *self.load.lock()
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// Take a load unit without waiting
    fn try_reserve(&self) -> bool {
        let mut load = self.load.lock();
        if *load < self.max_load {
            *load += 1;
            true
        } else {
            false
        }
    }

    /// Return a load unit and wake one waiter
    pub(crate) fn release(&self) {
        let group = self.group.lock().upgrade();
        match group {
            Some(group) => {
                let _members = group.members.lock();
                self.release_unit();
                group.cond.notify_one();
            }
            None => self.release_unit(),
        }
    }

    fn release_unit(&self) {
        let mut load = self.load.lock();
        *load = load.saturating_sub(1);
        self.cond.notify_one();
    }

    pub(crate) fn idle_list(&self) -> MutexGuard<'_, VecDeque<Arc<ConnEntry>>> {
        self.idle.lock()
    }

    pub(crate) fn remove_idle(&self, entry: &Arc<ConnEntry>) -> bool {
        let mut idle = self.idle.lock();
        match idle.iter().position(|e| Arc::ptr_eq(e, entry)) {
            Some(pos) => {
                idle.remove(pos);
                true
            }
            None => false,
        }
    }
}

impl SchedObject for CommTarget {
    fn acquire(&self, wait_timeout: TimeoutMs) -> Option<Arc<CommTarget>> {
        let deadline = wait_deadline(wait_timeout);
        let mut load = self.load.lock();
        while *load >= self.max_load {
            if !wait_until(&self.cond, &mut load, deadline) && *load >= self.max_load {
                debug!(addr = %self.addr, "Target acquire timed out");
                return None;
            }
        }
        *load += 1;
        drop(load);
        self.this.upgrade()
    }
}

impl std::fmt::Debug for CommTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommTarget")
            .field("addr", &self.addr)
            .field("load", &self.current_load())
            .field("max_load", &self.max_load)
            .finish()
    }
}

/// Equivalent targets scheduled together
#[derive(Clone)]
pub struct SchedGroup {
    inner: Arc<GroupInner>,
}

impl SchedGroup {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(GroupInner {
                members: Mutex::new(Vec::new()),
                cond: Condvar::new(),
            }),
        }
    }

    /// A target belongs to at most one group; later adds move it
    pub fn add(&self, target: Arc<CommTarget>) {
        *target.group.lock() = Arc::downgrade(&self.inner);
        self.inner.members.lock().push(target);
        self.inner.cond.notify_all();
    }

    pub fn remove(&self, target: &Arc<CommTarget>) -> bool {
        let mut members = self.inner.members.lock();
        match members.iter().position(|t| Arc::ptr_eq(t, target)) {
            Some(pos) => {
                members.remove(pos);
                *target.group.lock() = Weak::new();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.members.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SchedGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedObject for SchedGroup {
    fn acquire(&self, wait_timeout: TimeoutMs) -> Option<Arc<CommTarget>> {
        let deadline = wait_deadline(wait_timeout);
        let mut members = self.inner.members.lock();
        loop {
            let mut candidates: Vec<&Arc<CommTarget>> = members.iter().collect();
            candidates.sort_by_key(|t| t.current_load());
            if let Some(target) = candidates.into_iter().find(|t| t.try_reserve()) {
                return Some(target.clone());
            }

            if !wait_until(&self.inner.cond, &mut members, deadline) {
                return members.iter().find(|t| t.try_reserve()).cloned();
            }
        }
    }
}
