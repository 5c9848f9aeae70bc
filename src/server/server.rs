/*!
 * Server
 *
 * Binds a listening service and turns every complete request into a
 * [`ServerTask`] run through the user's processor. `stop` unbinds and
 * blocks until every connection of the service has closed.
 */

use crate::config::ServerParams;
use crate::core::{CommError, KernelError, Result};
use crate::kernel::{CommService, CommSession, Communicator, Connection, ServiceHandler};
use crate::monitoring::span_operation;
use crate::protocol::{MessageIn, MessageOut};
use crate::runtime::Runtime;
use crate::task::{Processor, ServerTask};
use parking_lot::{Condvar, Mutex};
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tracks whether the bound service has fully unbound
#[derive(Default)]
struct UnboundSignal {
    unbound: Mutex<bool>,
    cond: Condvar,
}

impl UnboundSignal {
    fn reset(&self) {
        *self.unbound.lock() = false;
    }

    fn signal(&self) {
        *self.unbound.lock() = true;
        self.cond.notify_all();
    }

    /// Wait for the unbind. A stopped communicator never unbinds; its
    /// listener stop wakes this instead.
    fn wait(&self, comm: &Communicator) {
        let mut unbound = self.unbound.lock();
        while !*unbound && !comm.is_stopped() {
            self.cond.wait(&mut unbound);
        }
    }
}

struct Handler<Req, Resp> {
    comm: Arc<Communicator>,
    params: ServerParams,
    processor: Processor<Req, Resp>,
    unbound: Arc<UnboundSignal>,
    _marker: PhantomData<fn() -> (Req, Resp)>,
}

impl<Req, Resp> ServiceHandler for Handler<Req, Resp>
where
    Req: MessageIn + Default + 'static,
    Resp: MessageOut + Default + 'static,
{
    fn new_session(&self, _seq: u64, _conn: &Arc<Connection>) -> Option<Box<dyn CommSession>> {
        Some(ServerTask::new(
            self.comm.clone(),
            self.processor.clone(),
            self.params.keep_alive_timeout,
        ))
    }

    /// Over the limit, make room by closing the oldest idle connection
    fn accept_connection(&self, service: &CommService) -> bool {
        service.connection_count() < self.params.max_connections || service.drain(1) > 0
    }

    fn handle_stop(&self, error: i32) {
        warn!(error, "Service stopped");
        if self.comm.is_stopped() {
            self.unbound.signal();
        }
    }

    fn handle_unbound(&self) {
        self.unbound.signal();
    }
}

/// Request/reply server over one message type pair
pub struct Server<Req, Resp> {
    comm: Arc<Communicator>,
    params: ServerParams,
    processor: Processor<Req, Resp>,
    service: Mutex<Option<Arc<CommService>>>,
    unbound: Arc<UnboundSignal>,
}

impl<Req, Resp> Server<Req, Resp>
where
    Req: MessageIn + Default + 'static,
    Resp: MessageOut + Default + 'static,
{
    pub fn new(runtime: &Runtime, params: ServerParams, processor: Processor<Req, Resp>) -> Self {
        Self {
            comm: runtime.communicator().clone(),
            params,
            processor,
            service: Mutex::new(None),
            unbound: Arc::new(UnboundSignal::default()),
        }
    }

    fn handler(&self) -> Arc<dyn ServiceHandler> {
        Arc::new(Handler {
            comm: self.comm.clone(),
            params: self.params.clone(),
            processor: self.processor.clone(),
            unbound: self.unbound.clone(),
            _marker: PhantomData,
        })
    }

    /// Bind and listen on `addr`
    pub fn start(&self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).map_err(CommError::from)?;
        self.serve(listener)
    }

    /// Resolve `host` and listen on its first address
    pub fn start_host(&self, host: &str, port: u16) -> Result<()> {
        let addr = (host, port)
            .to_socket_addrs()
            .map_err(CommError::from)?
            .next()
            .ok_or(CommError::Os(libc::EADDRNOTAVAIL))?;
        self.start(addr)
    }

    /// Serve an already bound listener
    pub fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut slot = self.service.lock();
        if slot.is_some() {
            return Err(KernelError::Comm(CommError::Os(libc::EALREADY)));
        }

        let service =
            CommService::from_listener(listener, self.params.clone(), self.handler()).map_err(CommError::from)?;
        self.unbound.reset();
        self.comm.bind(&service)?;
        info!(addr = %service.local_addr(), "Server started");
        *slot = Some(service);
        Ok(())
    }

    /// Stop accepting; idle connections close now, busy ones after replying
    pub fn shutdown(&self) {
        let service = self.service.lock().clone();
        if let Some(service) = service {
            debug!(addr = %service.local_addr(), "Server shutting down");
            self.comm.unbind(&service);
        }
    }

    /// Block until the service has released every connection
    pub fn wait_finish(&self) {
        let service = self.service.lock().take();
        if let Some(service) = service {
            self.unbound.wait(&self.comm);
            info!(addr = %service.local_addr(), "Server stopped");
        }
    }

    pub fn stop(&self) {
        let span = span_operation("server_stop", Duration::from_secs(5));
        let _guard = span.enter();
        self.shutdown();
        self.wait_finish();
        span.record_result(true);
    }

    pub fn listen_addr(&self) -> Option<SocketAddr> {
        self.service.lock().as_ref().map(|s| s.local_addr())
    }

    pub fn conn_count(&self) -> usize {
        self.service.lock().as_ref().map_or(0, |s| s.connection_count())
    }
}

impl<Req, Resp> Drop for Server<Req, Resp> {
    fn drop(&mut self) {
        let service = self.service.get_mut().take();
        if let Some(service) = service {
            self.comm.unbind(&service);
            self.unbound.wait(&self.comm);
        }
    }
}

impl<Req, Resp> std::fmt::Debug for Server<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("params", &self.params)
            .field("service", &*self.service.lock())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GlobalSettings;
    use crate::protocol::RawMessage;
    use crate::workflow::Series;

    fn echo() -> Processor<RawMessage, RawMessage> {
        Arc::new(|task: &mut ServerTask<RawMessage, RawMessage>, _: &Series| {
            let body = task.req().body().to_vec();
            task.resp().set_body(body);
        })
    }

    #[test]
    fn test_start_twice_rejected() {
        let runtime = Runtime::new(GlobalSettings::default()).unwrap();
        let server = Server::new(&runtime, ServerParams::default(), echo());
        server.start("127.0.0.1:0".parse().unwrap()).unwrap();
        assert!(server.listen_addr().is_some());
        assert!(server.start("127.0.0.1:0".parse().unwrap()).is_err());
        server.stop();
        assert!(server.listen_addr().is_none());
        runtime.shutdown();
    }

    #[test]
    fn test_wait_finish_woken_by_runtime_shutdown() {
        let runtime = Runtime::new(GlobalSettings::default()).unwrap();
        let server = Arc::new(Server::new(&runtime, ServerParams::default(), echo()));
        server.start("127.0.0.1:0".parse().unwrap()).unwrap();

        let (tx, rx) = std::sync::mpsc::channel();
        let waiter = {
            let server = server.clone();
            std::thread::spawn(move || {
                server.wait_finish();
                tx.send(()).unwrap();
            })
        };
        std::thread::sleep(Duration::from_millis(50));
        assert!(rx.try_recv().is_err());

        runtime.shutdown();
        rx.recv_timeout(Duration::from_secs(2)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_stop_without_start() {
        let runtime = Runtime::new(GlobalSettings::default()).unwrap();
        let server = Server::new(&runtime, ServerParams::default(), echo());
        server.stop();
        assert_eq!(server.conn_count(), 0);
        runtime.shutdown();
    }
}
