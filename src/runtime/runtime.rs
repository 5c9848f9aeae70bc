/*!
 * Runtime Context
 *
 * Owns the engine's shared machinery: the communicator (pollers plus
 * handler threads), the compute executor, named exec queues, and one
 * target per remote address. Cloning a runtime shares it; the machinery
 * stops on `shutdown` or when the last clone goes away.
 */

use crate::config::GlobalSettings;
use crate::core::{error_string, Result, TaskState};
use crate::kernel::{CommTarget, Communicator, ExecQueue, Executor};
use crate::monitoring::span_operation;
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct RuntimeInner {
    settings: GlobalSettings,
    comm: Arc<Communicator>,
    executor: Arc<Executor>,
    queues: DashMap<String, Arc<ExecQueue>>,
    targets: DashMap<SocketAddr, Arc<CommTarget>>,
    shut_down: AtomicBool,
}

impl RuntimeInner {
    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let span = span_operation("runtime_shutdown", Duration::from_secs(1));
        let _guard = span.enter();
        self.comm.stop();
        self.executor.shutdown();
        span.record_result(true);
        info!("Runtime shut down");
    }
}

impl Drop for RuntimeInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Explicit engine context passed to everything that schedules work
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    pub fn new(settings: GlobalSettings) -> Result<Self> {
        settings.validate()?;

        let comm = Communicator::new(
            settings.poller_threads,
            settings.handler_threads,
            settings.max_open_files,
        )?;
        let compute_threads = settings.resolved_compute_threads();
        let executor = match Executor::new(compute_threads) {
            Ok(executor) => executor,
            Err(e) => {
                comm.stop();
                return Err(e.into());
            }
        };

        info!(
            poller_threads = settings.poller_threads,
            handler_threads = settings.handler_threads,
            compute_threads,
            "Runtime created"
        );
        Ok(Self {
            inner: Arc::new(RuntimeInner {
                settings,
                comm: Arc::new(comm),
                executor: Arc::new(executor),
                queues: DashMap::new(),
                targets: DashMap::new(),
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Runtime built from defaults overlaid with the environment
    pub fn from_env() -> Result<Self> {
        Self::new(GlobalSettings::from_env()?)
    }

    pub fn settings(&self) -> &GlobalSettings {
        &self.inner.settings
    }

    pub fn communicator(&self) -> &Arc<Communicator> {
        &self.inner.comm
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.inner.executor
    }

    /// The queue registered under `name`, created on first use
    pub fn exec_queue(&self, name: &str) -> Arc<ExecQueue> {
        if let Some(queue) = self.inner.queues.get(name) {
            return queue.clone();
        }
        self.inner
            .queues
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(queue = name, "Exec queue created");
                ExecQueue::named(name)
            })
            .clone()
    }

    /// The target for `addr` with the global endpoint parameters
    pub fn target(&self, addr: SocketAddr) -> Arc<CommTarget> {
        if let Some(target) = self.inner.targets.get(&addr) {
            return target.clone();
        }
        self.inner
            .targets
            .entry(addr)
            .or_insert_with(|| CommTarget::new(addr, &self.inner.settings.endpoint_params))
            .clone()
    }

    /// Call before blocking inside a callback. On a handler thread this
    /// adds a handler thread so other sessions keep moving; pass the
    /// result to [`Runtime::sync_operation_end`].
    pub fn sync_operation_begin(&self) -> bool {
        if !self.inner.comm.is_handler_thread() {
            return false;
        }
        match self.inner.comm.increase_handler_thread() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Could not grow handler pool for sync operation");
                false
            }
        }
    }

    pub fn sync_operation_end(&self, grown: bool) {
        if grown {
            if let Err(e) = self.inner.comm.decrease_handler_thread() {
                debug!(error = %e, "Could not shrink handler pool after sync operation");
            }
        }
    }

    pub fn increase_handler_thread(&self) -> Result<()> {
        self.inner.comm.increase_handler_thread()
    }

    pub fn decrease_handler_thread(&self) -> Result<()> {
        self.inner.comm.decrease_handler_thread()
    }

    pub fn increase_compute_thread(&self) -> Result<()> {
        Ok(self.inner.executor.increase_thread()?)
    }

    pub fn decrease_compute_thread(&self) -> Result<()> {
        Ok(self.inner.executor.decrease_thread()?)
    }

    pub fn error_string(&self, state: TaskState, error: i32) -> String {
        error_string(state, error)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::Acquire)
    }

    /// Stop the communicator and the executor. In-flight network tasks
    /// end as `Aborted`; queued exec tasks end as canceled.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("comm", &self.inner.comm)
            .field("compute_threads", &self.inner.executor.thread_count())
            .field("queues", &self.inner.queues.len())
            .field("targets", &self.inner.targets.len())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::KernelError;

    fn small() -> GlobalSettings {
        GlobalSettings {
            compute_threads: 2,
            ..Default::default()
        }
    }

    #[test]
    fn test_exec_queue_registry() {
        let runtime = Runtime::new(small()).unwrap();
        let a = runtime.exec_queue("db");
        let b = runtime.exec_queue("db");
        let c = runtime.exec_queue("cache");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        runtime.shutdown();
    }

    #[test]
    fn test_target_registry() {
        let runtime = Runtime::new(small()).unwrap();
        let addr: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let target = runtime.target(addr);
        assert!(Arc::ptr_eq(&target, &runtime.target(addr)));
        assert_eq!(target.max_load(), runtime.settings().endpoint_params.max_connections);
        runtime.shutdown();
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = GlobalSettings {
            handler_threads: 0,
            ..Default::default()
        };
        assert!(matches!(Runtime::new(settings), Err(KernelError::Config(_))));
    }

    #[test]
    fn test_sync_operation_outside_handler() {
        let runtime = Runtime::new(small()).unwrap();
        assert!(!runtime.sync_operation_begin());
        runtime.sync_operation_end(false);
        runtime.shutdown();
        assert!(runtime.is_shut_down());
    }
}
