/*!
 * Services
 *
 * A service is a listening endpoint. It counts one reference for the
 * listener plus one per accepted connection; once unbound and the count
 * reaches zero, `handle_unbound` fires exactly once.
 */

use super::communicator::CommInner;
use super::conn::{ConnEntry, Connection, Phase};
use super::session::BoxCommSession;
use crate::config::ServerParams;
use crate::core::TimeoutMs;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::{Arc, Weak};
use tracing::{debug, info};

/// Behavior of a service
pub trait ServiceHandler: Send + Sync + 'static {
    /// Build the session for the next request on `conn`; `None` drops
    /// the connection
    fn new_session(&self, seq: u64, conn: &Arc<Connection>) -> Option<BoxCommSession>;

    /// An accepted socket is about to become a connection; false rejects it
    fn accept_connection(&self, _service: &CommService) -> bool {
        true
    }

    fn release_connection(&self, _conn: &Arc<Connection>) {}

    /// The listener failed or the communicator stopped
    fn handle_stop(&self, _error: i32) {}

    /// Last reference gone after unbind
    fn handle_unbound(&self);
}

struct ServiceState {
    refs: usize,
    unbinding: bool,
    alive: HashMap<u64, Arc<ConnEntry>>,
    listener: Option<TcpListener>,
}

/// Listening endpoint
pub struct CommService {
    params: ServerParams,
    handler: Arc<dyn ServiceHandler>,
    local_addr: SocketAddr,
    listen_fd: RawFd,
    state: Mutex<ServiceState>,
    comm: Mutex<Weak<CommInner>>,
}

impl CommService {
    /// Bind a listener on `addr`
    pub fn bind_addr(
        addr: SocketAddr,
        params: ServerParams,
        handler: Arc<dyn ServiceHandler>,
    ) -> std::io::Result<Arc<Self>> {
        Self::from_listener(TcpListener::bind(addr)?, params, handler)
    }

    /// Serve an already bound listener
    pub fn from_listener(
        listener: TcpListener,
        params: ServerParams,
        handler: Arc<dyn ServiceHandler>,
    ) -> std::io::Result<Arc<Self>> {
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        let listen_fd = listener.as_raw_fd();
        Ok(Arc::new(Self {
            params,
            handler,
            local_addr,
            listen_fd,
            state: Mutex::new(ServiceState {
                refs: 0,
                unbinding: false,
                alive: HashMap::new(),
                listener: Some(listener),
            }),
            comm: Mutex::new(Weak::new()),
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn params(&self) -> &ServerParams {
        &self.params
    }

    pub(crate) fn handler(&self) -> &Arc<dyn ServiceHandler> {
        &self.handler
    }

    pub(crate) fn listen_fd(&self) -> RawFd {
        self.listen_fd
    }

    /// Per-operation timeout on this service's connections
    pub(crate) fn response_timeout(&self) -> TimeoutMs {
        self.params.effective_response_timeout()
    }

    pub fn connection_count(&self) -> usize {
        self.state.lock().alive.len()
    }

    pub fn is_unbinding(&self) -> bool {
        self.state.lock().unbinding
    }

    pub(crate) fn attach(&self, comm: Weak<CommInner>) {
        *self.comm.lock() = comm;
        let mut state = self.state.lock();
        state.refs = 1;
        state.unbinding = false;
    }

    /// Start unbinding; returns the idle connections to close
    pub(crate) fn begin_unbind(&self) -> Vec<Arc<ConnEntry>> {
        let mut state = self.state.lock();
        state.unbinding = true;
        state
            .alive
            .values()
            .filter(|e| e.state().phase == Phase::Idle)
            .cloned()
            .collect()
    }

    /// Register an accepted connection; false when unbinding
    pub(crate) fn add_conn(&self, entry: &Arc<ConnEntry>) -> bool {
        let mut state = self.state.lock();
        if state.unbinding {
            return false;
        }
        state.refs += 1;
        state.alive.insert(entry.conn.id(), entry.clone());
        true
    }

    pub(crate) fn remove_conn(&self, entry: &Arc<ConnEntry>) {
        let removed = self.state.lock().alive.remove(&entry.conn.id()).is_some();
        if removed {
            self.handler.release_connection(&entry.conn);
            self.decref();
        }
    }

    pub(crate) fn decref(&self) {
        let unbound = {
            let mut state = self.state.lock();
            state.refs = state.refs.saturating_sub(1);
            if state.refs == 0 {
                state.listener.take()
            } else {
                None
            }
        };
        if let Some(listener) = unbound {
            drop(listener);
            info!(addr = %self.local_addr, "Service unbound");
            self.handler.handle_unbound();
        }
    }

    /// Close up to `n` idle keep-alive connections, returning how many
    pub fn drain(&self, n: usize) -> usize {
        let Some(comm) = self.comm.lock().upgrade() else {
            return 0;
        };
        let idle: Vec<_> = {
            let state = self.state.lock();
            let mut idle: Vec<_> = state
                .alive
                .values()
                .filter(|e| e.state().phase == Phase::Idle)
                .cloned()
                .collect();
            idle.sort_by_key(|e| e.conn.id());
            idle.truncate(n);
            idle
        };

        let drained = idle.iter().filter(|entry| comm.close_conn(entry)).count();
        if drained > 0 {
            debug!(addr = %self.local_addr, drained, "Drained idle connections");
        }
        drained
    }
}

impl std::fmt::Debug for CommService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommService")
            .field("local_addr", &self.local_addr)
            .field("connections", &self.connection_count())
            .finish()
    }
}
