/*!
 * Communicator
 *
 * Drives sessions through connect, send, receive and reply on top of the
 * multiplexer. Poller completions are queued to a pool of handler threads
 * so session callbacks never run on a poller thread.
 *
 * Every registration carries a ticket copied from its connection entry.
 * The entry bumps the ticket whenever it re-registers or closes, so a
 * completion that raced with either is recognized as stale and dropped.
 */

use super::conn::{ConnEntry, EntryState, Phase, Side};
use super::service::CommService;
use super::session::{BoxCommSession, BoxSleepSession, CommSession, SessionCore, SessionState, SleepState};
use super::socket::{self, Connecting};
use super::target::{CommTarget, SchedObject};
use crate::config::TransportType;
use crate::core::limits::{DEFAULT_POOL_STACK_SIZE, ENCODE_VECTORS_MAX, LISTEN_BACKLOG};
use crate::core::{CommError, KernelError, PoolError, TimeoutMs};
use crate::kernel::poller::{
    deadline_after, MPoller, Operation, PollerData, PollerHandler, PollerResult, PollerState, ReadProgress,
    TimerHandle,
};
use crate::kernel::pool::ThreadPool;
use crate::kernel::queue::WorkQueue;
use crate::protocol::Append;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub(crate) enum CommContext {
    Conn { entry: Arc<ConnEntry>, ticket: u64 },
    Listen(Arc<CommService>),
    Sleep(Arc<Mutex<Option<BoxSleepSession>>>),
}

pub(crate) enum HandlerMsg {
    Result(PollerResult<CommContext>),
    Exit,
}

/// Poller hooks; runs on poller threads
pub(crate) struct CommHandler {
    queue: Arc<WorkQueue<HandlerMsg>>,
}

fn os_error(errno: i32) -> io::Error {
    io::Error::from_raw_os_error(errno)
}

fn errno_of(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(libc::EIO)
}

/// Per-operation timeout capped by what is left of a message deadline
fn effective_timeout(op: TimeoutMs, deadline: Option<Instant>) -> TimeoutMs {
    match deadline {
        None => op,
        Some(deadline) => {
            let left = deadline
                .saturating_duration_since(Instant::now())
                .as_millis()
                .min(i32::MAX as u128) as TimeoutMs;
            if op < 0 || left < op {
                left
            } else {
                op
            }
        }
    }
}

fn encode(session: &mut dyn CommSession) -> Result<VecDeque<Bytes>, i32> {
    let mut out = Vec::new();
    session
        .message_out()
        .encode(&mut out, ENCODE_VECTORS_MAX)
        .map_err(|e| e.raw_os_error().unwrap_or(libc::EBADMSG))?;
    Ok(out.into())
}

/// Link a session to the connection carrying it
fn attach(entry: &Arc<ConnEntry>, session: &mut BoxCommSession, state: &mut EntryState) {
    let seq = state.seq;
    state.seq += 1;
    let core = session.core_mut();
    core.conn = Some(entry.conn.clone());
    core.entry = Some(entry.clone());
    core.seq = seq;
}

fn open_server_session(entry: &Arc<ConnEntry>, service: &CommService, state: &mut EntryState) -> io::Result<()> {
    let seq = state.seq;
    let mut session = service
        .handler()
        .new_session(seq, &entry.conn)
        .ok_or_else(|| os_error(libc::ECONNABORTED))?;
    session.message_in().set_size_limit(service.params().request_size_limit);
    session.core_mut().reset();
    attach(entry, &mut session, state);
    state.recv_deadline = deadline_after(service.params().receive_timeout);
    state.phase = Phase::Receiving;
    state.session = Some(session);
    Ok(())
}

/// Feed bytes to the session reading on `entry`
fn append_conn(entry: &Arc<ConnEntry>, ticket: u64, buf: &[u8]) -> io::Result<ReadProgress> {
    let mut guard = entry.state();
    let state = &mut *guard;
    if state.ticket != ticket {
        return Err(os_error(libc::ECANCELED));
    }

    match &entry.side {
        Side::Client(target) => {
            // Bytes on an idle client connection are a protocol violation
            let session = state.session.as_mut().ok_or_else(|| os_error(libc::ECONNRESET))?;
            match session.message_in().append(buf)? {
                Append::Complete { .. } => Ok(ReadProgress::Complete),
                Append::NeedMore => Ok(ReadProgress::Partial(Some(effective_timeout(
                    target.response_timeout(),
                    state.recv_deadline,
                )))),
            }
        }
        Side::Server(service) => {
            if state.session.is_none() {
                open_server_session(entry, service, state)?;
            }
            let Some(session) = state.session.as_mut() else {
                return Err(os_error(libc::ECONNABORTED));
            };
            match session.message_in().append(buf)? {
                Append::Complete { consumed } => {
                    if consumed < buf.len() {
                        state.leftover.extend_from_slice(&buf[consumed..]);
                    }
                    Ok(ReadProgress::Complete)
                }
                Append::NeedMore => Ok(ReadProgress::Partial(Some(effective_timeout(
                    service.response_timeout(),
                    state.recv_deadline,
                )))),
            }
        }
    }
}

impl PollerHandler for CommHandler {
    type Context = CommContext;

    fn append(&self, context: &CommContext, buf: &[u8]) -> io::Result<ReadProgress> {
        match context {
            CommContext::Conn { entry, ticket } => append_conn(entry, *ticket, buf),
            _ => Err(os_error(libc::EINVAL)),
        }
    }

    fn accept(&self, context: &CommContext, fd: OwnedFd, peer: SocketAddr) -> Option<CommContext> {
        let CommContext::Listen(service) = context else {
            return None;
        };
        if !service.handler().accept_connection(service) {
            debug!(peer = %peer, "Connection rejected by service");
            return None;
        }

        let entry = ConnEntry::new(fd, peer, Side::Server(service.clone()), Phase::Idle);
        if !service.add_conn(&entry) {
            service.handler().release_connection(&entry.conn);
            return None;
        }
        Some(CommContext::Conn { entry, ticket: 0 })
    }

    fn callback(&self, result: PollerResult<CommContext>) {
        self.queue.put(HandlerMsg::Result(result));
    }
}

pub(crate) struct CommInner {
    mpoller: MPoller<CommHandler>,
    queue: Arc<WorkQueue<HandlerMsg>>,
    pool: ThreadPool,
    stopped: AtomicBool,
}

fn handler_routine(inner: Arc<CommInner>) {
    while let Some(msg) = inner.queue.get() {
        match msg {
            HandlerMsg::Result(result) => inner.handle_result(result),
            HandlerMsg::Exit => break,
        }
    }
}

impl CommInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn register(&self, entry: &Arc<ConnEntry>, data: PollerData<CommContext>, timeout: TimeoutMs) -> Result<(), i32> {
        self.mpoller.add(data, timeout).map_err(|e| {
            debug!(fd = entry.fd(), error = %e, "Connection registration failed");
            e.errno()
        })
    }

    fn register_read(&self, entry: &Arc<ConnEntry>, ticket: u64, timeout: TimeoutMs) -> Result<(), i32> {
        let context = CommContext::Conn {
            entry: entry.clone(),
            ticket,
        };
        self.register(entry, PollerData::new(Operation::Read, entry.fd(), context), timeout)
    }

    /// Close the socket and drop it from its target or service
    pub(crate) fn close_conn(&self, entry: &Arc<ConnEntry>) -> bool {
        let Some(orphan) = entry.mark_closed() else {
            return false;
        };
        let _ = self.mpoller.del(entry.fd());
        match &entry.side {
            Side::Client(target) => {
                target.remove_idle(entry);
            }
            Side::Server(service) => service.remove_conn(entry),
        }
        // A request cut off mid-read never reaches its reply
        if let Some(mut session) = orphan {
            session.core_mut().entry = None;
            if let Some(target) = session.core().target.clone() {
                target.release();
            }
            session.handle(SessionState::Error, libc::ECONNABORTED);
        }
        true
    }

    fn handle_result(&self, result: PollerResult<CommContext>) {
        let PollerResult {
            state,
            error,
            operation,
            context,
            accepted,
            ..
        } = result;

        match context {
            CommContext::Conn { entry, ticket } => self.handle_conn(entry, ticket, operation, state, error),
            CommContext::Listen(service) => self.handle_listen(service, state, error, accepted),
            CommContext::Sleep(slot) => {
                let session = slot.lock().take();
                if let Some(session) = session {
                    let sleep_state = match state {
                        PollerState::Success => SleepState::Complete,
                        PollerState::Deleted => SleepState::Disrupted,
                        _ => SleepState::Stopped,
                    };
                    session.handle(sleep_state, error);
                }
            }
        }
    }

    fn handle_listen(
        &self,
        service: Arc<CommService>,
        state: PollerState,
        error: i32,
        accepted: Option<CommContext>,
    ) {
        match state {
            PollerState::Success => {
                if let Some(CommContext::Conn { entry, .. }) = accepted {
                    if service.is_unbinding() || self.is_stopped() {
                        self.close_conn(&entry);
                    } else {
                        self.wait_request(&entry, service.params().keep_alive_timeout);
                    }
                }
            }
            PollerState::Deleted => service.decref(),
            PollerState::Error | PollerState::Finished | PollerState::Stopped => {
                if state == PollerState::Error {
                    warn!(addr = %service.local_addr(), error, "Listener failed");
                }
                service.handler().handle_stop(error);
                service.decref();
            }
        }
    }

    fn handle_conn(
        &self,
        entry: Arc<ConnEntry>,
        ticket: u64,
        operation: Operation,
        state: PollerState,
        error: i32,
    ) {
        if state == PollerState::Deleted {
            return;
        }

        let session = {
            let mut guard = entry.state();
            if guard.ticket != ticket || guard.phase == Phase::Closed {
                return;
            }
            let session = guard.session.take();
            if session.is_some()
                && operation == Operation::Read
                && state == PollerState::Success
                && matches!(entry.side, Side::Server(_))
            {
                guard.phase = Phase::ToReply;
            }
            session
        };

        let Some(session) = session else {
            // Idle keep-alive connection timed out, was closed by the peer,
            // or received unexpected bytes
            self.close_conn(&entry);
            return;
        };

        match (&entry.side, operation, state) {
            (Side::Client(_), Operation::Connect, PollerState::Success) => self.send_request(&entry, session),
            (Side::Client(_), Operation::Write, PollerState::Success) => self.wait_response(&entry, session),
            (Side::Client(target), Operation::Read, PollerState::Success) => {
                self.finish_response(&entry, target, session)
            }
            (Side::Server(_), Operation::Read, PollerState::Success) => {
                session.handle(SessionState::ToReply, 0);
            }
            (Side::Server(service), Operation::Write, PollerState::Success) => {
                self.finish_reply(&entry, service, session)
            }
            (_, _, PollerState::Stopped) => self.fail_session(Some(&entry), session, SessionState::Stopped, 0),
            (_, _, PollerState::Finished) => {
                self.fail_session(Some(&entry), session, SessionState::Error, libc::ECONNRESET)
            }
            (_, _, _) => {
                let error = if error == 0 { libc::EIO } else { error };
                debug!(fd = entry.fd(), ?operation, error, "Connection failed");
                self.fail_session(Some(&entry), session, SessionState::Error, error)
            }
        }
    }

    /// End a session early, closing its connection and giving back its load
    fn fail_session(&self, entry: Option<&Arc<ConnEntry>>, mut session: BoxCommSession, state: SessionState, error: i32) {
        if let Some(entry) = entry {
            self.close_conn(entry);
        }
        let core = session.core_mut();
        core.entry = None;
        // Only client sessions hold a target
        if let Some(target) = core.target.clone() {
            target.release();
        }
        session.handle(state, error);
    }

    // =========================================================================
    // CLIENT
    // =========================================================================

    fn start_request(&self, target: Arc<CommTarget>, mut session: BoxCommSession) {
        if let Some(entry) = self.reuse_idle(&target) {
            self.send_request(&entry, session);
            return;
        }

        let addr = target.addr();
        match socket::connect_nonblocking(&addr) {
            Err(e) => {
                debug!(addr = %addr, error = %e, "Connect failed");
                self.fail_session(None, session, SessionState::Error, errno_of(&e));
            }
            Ok(Connecting::Connected(fd)) => {
                let entry = ConnEntry::new(fd, addr, Side::Client(target), Phase::Sending);
                self.send_request(&entry, session);
            }
            Ok(Connecting::InProgress(fd)) => {
                let entry = ConnEntry::new(fd, addr, Side::Client(target.clone()), Phase::Connecting);
                let ticket = {
                    let mut state = entry.state();
                    attach(&entry, &mut session, &mut state);
                    state.ticket += 1;
                    state.session = Some(session);
                    state.ticket
                };
                let context = CommContext::Conn {
                    entry: entry.clone(),
                    ticket,
                };
                let data = PollerData::new(Operation::Connect, entry.fd(), context);
                if let Err(errno) = self.register(&entry, data, target.connect_timeout()) {
                    let session = entry.state().session.take();
                    if let Some(session) = session {
                        self.fail_session(Some(&entry), session, SessionState::Error, errno);
                    }
                }
            }
        }
    }

    /// Pop an idle connection whose keep-alive read is still pending
    fn reuse_idle(&self, target: &Arc<CommTarget>) -> Option<Arc<ConnEntry>> {
        loop {
            let entry = {
                let mut idle = target.idle_list();
                let entry = idle.pop_back()?;
                let mut state = entry.state();
                state.ticket += 1;
                state.phase = Phase::Sending;
                drop(state);
                entry
            };

            if self.mpoller.del(entry.fd()).is_ok() {
                debug!(fd = entry.fd(), addr = %target.addr(), "Reusing idle connection");
                return Some(entry);
            }
            // Its keep-alive read already completed; the result is stale now
            self.close_conn(&entry);
        }
    }

    fn send_request(&self, entry: &Arc<ConnEntry>, mut session: BoxCommSession) {
        let attached = session
            .core()
            .entry
            .as_ref()
            .is_some_and(|e| Arc::ptr_eq(e, entry));
        if !attached {
            attach(entry, &mut session, &mut entry.state());
        }
        session.core_mut().connected = true;

        let mut iov = match encode(&mut *session) {
            Ok(iov) => iov,
            Err(errno) => return self.fail_session(Some(entry), session, SessionState::Error, errno),
        };

        match socket::send_vectors(entry.fd(), &mut iov) {
            Err(e) => self.fail_session(Some(entry), session, SessionState::Error, errno_of(&e)),
            Ok(_) if iov.is_empty() => self.wait_response(entry, session),
            Ok(_) => {
                let timeout = session.send_timeout();
                let ticket = {
                    let mut state = entry.state();
                    state.phase = Phase::Sending;
                    state.ticket += 1;
                    state.session = Some(session);
                    state.ticket
                };
                let context = CommContext::Conn {
                    entry: entry.clone(),
                    ticket,
                };
                if let Err(errno) = self.register(entry, PollerData::write(entry.fd(), context, iov), timeout) {
                    let session = entry.state().session.take();
                    if let Some(session) = session {
                        self.fail_session(Some(entry), session, SessionState::Error, errno);
                    }
                }
            }
        }
    }

    fn wait_response(&self, entry: &Arc<ConnEntry>, mut session: BoxCommSession) {
        session.core_mut().sent = true;
        let Side::Client(target) = &entry.side else {
            return;
        };

        let first = if session.first_timeout() > 0 {
            session.first_timeout()
        } else {
            target.response_timeout()
        };
        let deadline = deadline_after(session.receive_timeout());
        let timeout = effective_timeout(first, deadline);

        let ticket = {
            let mut state = entry.state();
            state.phase = Phase::Receiving;
            state.ticket += 1;
            state.recv_deadline = deadline;
            state.session = Some(session);
            state.ticket
        };
        if let Err(errno) = self.register_read(entry, ticket, timeout) {
            let session = entry.state().session.take();
            if let Some(session) = session {
                self.fail_session(Some(entry), session, SessionState::Error, errno);
            }
        }
    }

    fn finish_response(&self, entry: &Arc<ConnEntry>, target: &Arc<CommTarget>, mut session: BoxCommSession) {
        let keep_alive = session.keep_alive_timeout();
        if keep_alive <= 0 || self.is_stopped() || !self.park_idle(entry, target, keep_alive) {
            self.close_conn(entry);
        }
        session.core_mut().entry = None;
        target.release();
        session.handle(SessionState::Success, 0);
    }

    /// Keep a finished client connection for reuse
    fn park_idle(&self, entry: &Arc<ConnEntry>, target: &Arc<CommTarget>, keep_alive: TimeoutMs) -> bool {
        let mut idle = target.idle_list();
        let ticket = {
            let mut state = entry.state();
            state.phase = Phase::Idle;
            state.ticket += 1;
            state.recv_deadline = None;
            state.ticket
        };
        if self.register_read(entry, ticket, keep_alive).is_err() {
            return false;
        }
        idle.push_back(entry.clone());
        true
    }

    // =========================================================================
    // SERVER
    // =========================================================================

    /// Wait for the next request on a server connection
    fn wait_request(&self, entry: &Arc<ConnEntry>, timeout: TimeoutMs) {
        let ticket = {
            let mut state = entry.state();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Idle;
            state.ticket += 1;
            state.ticket
        };
        if self.register_read(entry, ticket, timeout).is_err() {
            self.close_conn(entry);
        }
    }

    fn finish_reply(&self, entry: &Arc<ConnEntry>, service: &Arc<CommService>, mut session: BoxCommSession) {
        let keep_alive = session.keep_alive_timeout();
        {
            let core = session.core_mut();
            core.sent = true;
            core.entry = None;
        }
        session.handle(SessionState::Success, 0);

        if keep_alive > 0 && !service.is_unbinding() && !self.is_stopped() {
            self.next_request(entry, service, keep_alive);
        } else {
            self.close_conn(entry);
        }
    }

    /// Serve bytes left over from the previous request, then keep reading
    fn next_request(&self, entry: &Arc<ConnEntry>, service: &Arc<CommService>, keep_alive: TimeoutMs) {
        let (leftover, ticket) = {
            let mut state = entry.state();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Idle;
            state.ticket += 1;
            (state.leftover.split().freeze(), state.ticket)
        };
        if leftover.is_empty() {
            if self.register_read(entry, ticket, keep_alive).is_err() {
                self.close_conn(entry);
            }
            return;
        }

        match append_conn(entry, ticket, &leftover) {
            Ok(ReadProgress::Complete) => {
                let context = CommContext::Conn {
                    entry: entry.clone(),
                    ticket,
                };
                self.queue.put(HandlerMsg::Result(PollerResult::new(
                    PollerState::Success,
                    0,
                    Operation::Read,
                    entry.fd(),
                    context,
                )));
            }
            Ok(ReadProgress::Partial(timeout)) => {
                let timeout = timeout.unwrap_or_else(|| service.response_timeout());
                if self.register_read(entry, ticket, timeout).is_err() {
                    self.close_conn(entry);
                }
            }
            Err(e) => {
                debug!(fd = entry.fd(), error = %e, "Pipelined request rejected");
                self.close_conn(entry);
            }
        }
    }
}

/// Session reactor over a multiplexer and a handler thread pool
pub struct Communicator {
    inner: Arc<CommInner>,
}

impl Communicator {
    pub fn new(poller_threads: usize, handler_threads: usize, max_open_files: usize) -> crate::core::Result<Self> {
        let queue = Arc::new(WorkQueue::unbounded());
        let handler = Arc::new(CommHandler { queue: queue.clone() });
        let mpoller = MPoller::new(poller_threads, max_open_files, handler)?;
        mpoller.start()?;

        let pool = match ThreadPool::new("flowkernel-handler", handler_threads, DEFAULT_POOL_STACK_SIZE) {
            Ok(pool) => pool,
            Err(e) => {
                mpoller.stop();
                return Err(e.into());
            }
        };

        let inner = Arc::new(CommInner {
            mpoller,
            queue,
            pool,
            stopped: AtomicBool::new(false),
        });
        for _ in 0..handler_threads {
            let routine = inner.clone();
            if let Err(e) = inner.pool.schedule(move || handler_routine(routine)) {
                let comm = Self { inner };
                comm.stop();
                return Err(e.into());
            }
        }

        info!(poller_threads, handler_threads, "Communicator started");
        Ok(Self { inner })
    }

    /// Start a client exchange
    ///
    /// Never fails synchronously: admission timeouts, connect errors, and
    /// transmission errors all arrive through `session.handle`.
    pub fn request(&self, mut session: BoxCommSession, sched: &dyn SchedObject, wait_timeout: TimeoutMs) {
        session.core_mut().reset();
        if self.inner.is_stopped() {
            session.handle(SessionState::Error, libc::ESHUTDOWN);
            return;
        }

        let target = match sched.acquire(0) {
            Some(target) => Some(target),
            None if wait_timeout == 0 => None,
            None => self.acquire_waiting(sched, wait_timeout),
        };
        let Some(target) = target else {
            session.handle(SessionState::Error, libc::ETIMEDOUT);
            return;
        };
        if self.inner.is_stopped() {
            target.release();
            session.handle(SessionState::Error, libc::ESHUTDOWN);
            return;
        }
        session.core_mut().target = Some(target.clone());
        self.inner.start_request(target, session);
    }

    /// Block for target capacity. Load comes back on handler threads, so a
    /// handler thread that blocks here first adds a stand-in to the pool.
    fn acquire_waiting(&self, sched: &dyn SchedObject, wait_timeout: TimeoutMs) -> Option<Arc<CommTarget>> {
        let grown = self.is_handler_thread()
            && match self.increase_handler_thread() {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "Could not add a handler thread for admission wait");
                    false
                }
            };
        let target = sched.acquire(wait_timeout);
        if grown {
            if let Err(e) = self.decrease_handler_thread() {
                debug!(error = %e, "Could not retire admission stand-in thread");
            }
        }
        target
    }

    /// Send the reply of a server session in `ToReply`
    pub fn reply(&self, mut session: BoxCommSession) {
        let entry = session.core().entry.clone();
        let Some(entry) = entry else {
            session.handle(SessionState::Error, libc::ENOENT);
            return;
        };
        let Side::Server(service) = &entry.side else {
            session.handle(SessionState::Error, libc::ENOENT);
            return;
        };
        if entry.state().phase != Phase::ToReply {
            session.handle(SessionState::Error, libc::ENOENT);
            return;
        }

        let inner = &self.inner;
        let mut iov = match encode(&mut *session) {
            Ok(iov) => iov,
            Err(errno) => return inner.fail_session(Some(&entry), session, SessionState::Error, errno),
        };

        match socket::send_vectors(entry.fd(), &mut iov) {
            Err(e) => inner.fail_session(Some(&entry), session, SessionState::Error, errno_of(&e)),
            Ok(_) if iov.is_empty() => inner.finish_reply(&entry, service, session),
            Ok(_) => {
                let timeout = match session.send_timeout() {
                    t if t >= 0 => t,
                    _ => service.response_timeout(),
                };
                let ticket = {
                    let mut state = entry.state();
                    state.phase = Phase::Replying;
                    state.ticket += 1;
                    state.session = Some(session);
                    state.ticket
                };
                let context = CommContext::Conn {
                    entry: entry.clone(),
                    ticket,
                };
                if let Err(errno) = inner.register(&entry, PollerData::write(entry.fd(), context, iov), timeout) {
                    let session = entry.state().session.take();
                    if let Some(session) = session {
                        inner.fail_session(Some(&entry), session, SessionState::Error, errno);
                    }
                }
            }
        }
    }

    /// Write raw bytes ahead of the reply; legal only while a reply is owed
    pub fn push(&self, core: &SessionCore, buf: &[u8]) -> Result<usize, CommError> {
        let entry = core.entry.as_ref().ok_or(CommError::NotReplying)?;
        let state = entry.state();
        if state.phase != Phase::ToReply {
            return Err(CommError::NotReplying);
        }
        let mut iov: VecDeque<Bytes> = VecDeque::from([Bytes::copy_from_slice(buf)]);
        let sent = socket::send_vectors(entry.fd(), &mut iov)?;
        Ok(sent)
    }

    /// Close a server connection without replying
    pub fn shutdown(&self, core: &mut SessionCore) {
        if let Some(entry) = core.entry.take() {
            self.inner.close_conn(&entry);
        }
    }

    pub fn bind(&self, service: &Arc<CommService>) -> Result<(), CommError> {
        if service.params().transport_type == TransportType::Udp {
            return Err(CommError::Os(libc::EPROTONOSUPPORT));
        }
        if self.inner.is_stopped() {
            return Err(CommError::Stopped);
        }

        service.attach(Arc::downgrade(&self.inner));
        socket::set_backlog(service.listen_fd(), LISTEN_BACKLOG);
        let data = PollerData::new(
            Operation::Listen,
            service.listen_fd(),
            CommContext::Listen(service.clone()),
        );
        self.inner
            .mpoller
            .add(data, -1)
            .map_err(|e| CommError::Os(e.errno()))?;

        info!(addr = %service.local_addr(), "Service bound");
        Ok(())
    }

    /// Stop accepting; `handle_unbound` follows once every connection closed
    pub fn unbind(&self, service: &Arc<CommService>) {
        let idle = service.begin_unbind();
        if self.inner.mpoller.del(service.listen_fd()).is_err() {
            debug!(addr = %service.local_addr(), "Listener already gone at unbind");
        }
        for entry in idle {
            self.inner.close_conn(&entry);
        }
    }

    /// Suspend a session for its duration; the handle cancels it
    pub fn sleep(&self, session: BoxSleepSession) -> Option<TimerHandle> {
        if self.inner.is_stopped() {
            session.handle(SleepState::Stopped, 0);
            return None;
        }
        let duration = session.duration();
        let slot = Arc::new(Mutex::new(Some(session)));
        Some(self.inner.mpoller.add_timer(duration, CommContext::Sleep(slot)))
    }

    /// Cancel a pending sleep; it completes as `Disrupted`
    pub fn unsleep(&self, handle: &TimerHandle) -> bool {
        self.inner.mpoller.del_timer(handle)
    }

    pub fn is_handler_thread(&self) -> bool {
        self.inner.pool.in_pool()
    }

    pub fn handler_threads(&self) -> usize {
        self.inner.pool.thread_count()
    }

    pub fn poller_threads(&self) -> usize {
        self.inner.mpoller.threads()
    }

    pub fn increase_handler_thread(&self) -> Result<(), KernelError> {
        self.inner.pool.increase()?;
        let routine = self.inner.clone();
        self.inner.pool.schedule(move || handler_routine(routine))?;
        Ok(())
    }

    pub fn decrease_handler_thread(&self) -> Result<(), KernelError> {
        let threads = self.inner.pool.thread_count();
        if threads <= 1 {
            return Err(PoolError::InvalidThreadCount(threads.saturating_sub(1)).into());
        }
        self.inner.queue.put_head(HandlerMsg::Exit);
        self.inner.pool.decrease()?;
        Ok(())
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.is_stopped()
    }

    /// Stop pollers and handler threads; sessions in flight end as `Stopped`
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.mpoller.stop();
        self.inner.queue.set_nonblock();
        self.inner.pool.destroy();
        info!("Communicator stopped");
    }
}

impl Drop for Communicator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Communicator")
            .field("poller_threads", &self.poller_threads())
            .field("handler_threads", &self.handler_threads())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout() {
        assert_eq!(effective_timeout(500, None), 500);
        assert_eq!(effective_timeout(-1, None), -1);

        let soon = Some(Instant::now() + std::time::Duration::from_millis(50));
        assert!(effective_timeout(500, soon) <= 50);
        assert!(effective_timeout(-1, soon) <= 50);

        let far = Some(Instant::now() + std::time::Duration::from_secs(60));
        assert_eq!(effective_timeout(500, far), 500);

        let past = Some(Instant::now() - std::time::Duration::from_millis(5));
        assert_eq!(effective_timeout(500, past), 0);
    }
}
