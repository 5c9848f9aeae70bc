/*!
 * Poller Shard
 *
 * One event-loop thread with its own epoll instance and wake eventfd.
 * Shards share a node table indexed by fd; a shard owns the nodes whose
 * fd maps to its index. Level-triggered.
 */

use super::types::*;
use crate::core::limits::{POLLER_BUFSIZE, POLLER_EVENTS_MAX, POLLER_IDLE_WAIT};
use crate::core::{PollerError, TimeoutMs};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::io;
use std::mem::ManuallyDrop;
use std::net::{TcpListener, UdpSocket};
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

struct Node<C> {
    /// Changes on every add or modify so stale handles can be detected
    id: u64,
    operation: Operation,
    context: C,
    write_iov: VecDeque<Bytes>,
    deadline: Option<Instant>,
}

/// Fd-indexed registrations shared by every shard
pub(crate) struct NodeTable<C> {
    slots: Box<[Mutex<Option<Box<Node<C>>>>]>,
    next_id: AtomicU64,
}

impl<C> NodeTable<C> {
    pub(crate) fn new(max_open_files: usize) -> Self {
        Self {
            slots: (0..max_open_files).map(|_| Mutex::new(None)).collect(),
            next_id: AtomicU64::new(1),
        }
    }

    fn slot(&self, fd: RawFd) -> Result<&Mutex<Option<Box<Node<C>>>>, PollerError> {
        if fd < 0 {
            return Err(PollerError::FdOutOfRange(fd));
        }
        self.slots
            .get(fd as usize)
            .ok_or(PollerError::FdOutOfRange(fd))
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

struct Timers<C> {
    /// Registration timeouts
    deadlines: BTreeSet<(Instant, RawFd)>,
    /// Standalone timers
    timers: BTreeMap<(Instant, u64), C>,
    next_timer: u64,
}

/// Single poller shard
pub struct Poller<H: PollerHandler> {
    index: usize,
    nshards: usize,
    epfd: OwnedFd,
    wakefd: OwnedFd,
    table: Arc<NodeTable<H::Context>>,
    timers: Mutex<Timers<H::Context>>,
    handler: Arc<H>,
    running: AtomicBool,
    stopped: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
}

fn last_errno() -> i32 {
    io::Error::last_os_error().raw_os_error().unwrap_or(libc::EIO)
}

fn syscall_error(what: &str) -> PollerError {
    PollerError::Syscall(format!("{}: {}", what, io::Error::last_os_error()))
}

impl<H: PollerHandler> Poller<H> {
    /// Standalone shard owning its node table
    pub fn new(max_open_files: usize, handler: Arc<H>) -> Result<Arc<Self>, PollerError> {
        Self::with_table(0, 1, Arc::new(NodeTable::new(max_open_files)), handler)
    }

    pub(crate) fn with_table(
        index: usize,
        nshards: usize,
        table: Arc<NodeTable<H::Context>>,
        handler: Arc<H>,
    ) -> Result<Arc<Self>, PollerError> {
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(syscall_error("epoll_create1"));
        }
        let epfd = unsafe { OwnedFd::from_raw_fd(epfd) };

        let wakefd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if wakefd < 0 {
            return Err(syscall_error("eventfd"));
        }
        let wakefd = unsafe { OwnedFd::from_raw_fd(wakefd) };

        let mut ev = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: wakefd.as_raw_fd() as u64,
        };
        let ret = unsafe {
            libc::epoll_ctl(epfd.as_raw_fd(), libc::EPOLL_CTL_ADD, wakefd.as_raw_fd(), &mut ev)
        };
        if ret < 0 {
            return Err(syscall_error("epoll_ctl"));
        }

        Ok(Arc::new(Self {
            index,
            nshards,
            epfd,
            wakefd,
            table,
            timers: Mutex::new(Timers {
                deadlines: BTreeSet::new(),
                timers: BTreeMap::new(),
                next_timer: 0,
            }),
            handler,
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            thread: Mutex::new(None),
        }))
    }

    pub fn start(self: &Arc<Self>) -> Result<(), PollerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PollerError::Stopped);
        }
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        self.running.store(true, Ordering::Release);
        let poller = self.clone();
        let handle = thread::Builder::new()
            .name(format!("flowkernel-poller-{}", self.index))
            .spawn(move || poller.run())
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                PollerError::Syscall(format!("spawn: {}", e))
            })?;

        *thread = Some(handle);
        info!(shard = self.index, "Poller shard started");
        Ok(())
    }

    /// Stop the loop; every remaining registration completes as `Stopped`
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.running.store(false, Ordering::Release);
        self.wake();

        let handle = self.thread.lock().take();
        match handle {
            Some(handle) => {
                if handle.thread().id() == thread::current().id() {
                    // Stopped from a hook; the loop exits and cleans up on its own
                    return;
                }
                let _ = handle.join();
            }
            None => self.cleanup(),
        }
        info!(shard = self.index, "Poller shard stopped");
    }

    fn wake(&self) {
        let one: u64 = 1;
        unsafe {
            libc::write(
                self.wakefd.as_raw_fd(),
                &one as *const u64 as *const libc::c_void,
                8,
            );
        }
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, events: u32) -> Result<(), PollerError> {
        let mut ev = libc::epoll_event {
            events,
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            return Err(syscall_error("epoll_ctl"));
        }
        Ok(())
    }

    fn unregister(&self, fd: RawFd) {
        unsafe {
            libc::epoll_ctl(self.epfd.as_raw_fd(), libc::EPOLL_CTL_DEL, fd, std::ptr::null_mut());
        }
    }

    fn set_deadline(&self, fd: RawFd, old: Option<Instant>, new: Option<Instant>) {
        if old.is_none() && new.is_none() {
            return;
        }
        let mut timers = self.timers.lock();
        if let Some(old) = old {
            timers.deadlines.remove(&(old, fd));
        }
        if let Some(new) = new {
            timers.deadlines.insert((new, fd));
        }
    }

    /// Register a descriptor; `timeout` in milliseconds, negative for none
    pub fn add(&self, data: PollerData<H::Context>, timeout: TimeoutMs) -> Result<(), PollerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PollerError::Stopped);
        }
        let fd = data.fd;
        let slot = self.table.slot(fd)?;
        let deadline = deadline_after(timeout);
        {
            let mut guard = slot.lock();
            if guard.is_some() {
                return Err(PollerError::AlreadyRegistered(fd));
            }
            self.ctl(libc::EPOLL_CTL_ADD, fd, data.operation.epoll_events())?;
            *guard = Some(Box::new(Node {
                id: self.table.next_id(),
                operation: data.operation,
                context: data.context,
                write_iov: data.write_iov,
                deadline,
            }));
            self.set_deadline(fd, None, deadline);
        }

        if deadline.is_some() {
            self.wake();
        }
        Ok(())
    }

    /// Replace the registration of `fd` in place without a completion
    pub fn modify(&self, data: PollerData<H::Context>, timeout: TimeoutMs) -> Result<(), PollerError> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(PollerError::Stopped);
        }
        let fd = data.fd;
        let slot = self.table.slot(fd)?;
        let deadline = deadline_after(timeout);
        let old = {
            let mut guard = slot.lock();
            let Some(node) = guard.as_mut() else {
                return Err(PollerError::NotRegistered(fd));
            };
            self.ctl(libc::EPOLL_CTL_MOD, fd, data.operation.epoll_events())?;
            let old_deadline = node.deadline;
            let old = std::mem::replace(
                node.as_mut(),
                Node {
                    id: self.table.next_id(),
                    operation: data.operation,
                    context: data.context,
                    write_iov: data.write_iov,
                    deadline,
                },
            );
            self.set_deadline(fd, old_deadline, deadline);
            old
        };
        drop(old);

        if deadline.is_some() {
            self.wake();
        }
        Ok(())
    }

    /// Remove `fd`; its registration completes as `Deleted`
    pub fn del(&self, fd: RawFd) -> Result<(), PollerError> {
        let slot = self.table.slot(fd)?;
        let node = {
            let mut guard = slot.lock();
            let node = guard.take().ok_or(PollerError::NotRegistered(fd))?;
            self.unregister(fd);
            self.set_deadline(fd, node.deadline, None);
            node
        };

        self.handler.callback(PollerResult::new(
            PollerState::Deleted,
            0,
            node.operation,
            fd,
            node.context,
        ));
        Ok(())
    }

    pub fn set_timeout(&self, fd: RawFd, timeout: TimeoutMs) -> Result<(), PollerError> {
        let slot = self.table.slot(fd)?;
        let deadline = deadline_after(timeout);
        {
            let mut guard = slot.lock();
            let node = guard.as_mut().ok_or(PollerError::NotRegistered(fd))?;
            self.set_deadline(fd, node.deadline, deadline);
            node.deadline = deadline;
        }
        if deadline.is_some() {
            self.wake();
        }
        Ok(())
    }

    /// Only if the registration is still the one identified by `id`
    fn set_timeout_if(&self, fd: RawFd, id: u64, timeout: TimeoutMs) {
        let Ok(slot) = self.table.slot(fd) else {
            return;
        };
        let deadline = deadline_after(timeout);
        let mut guard = slot.lock();
        if let Some(node) = guard.as_mut().filter(|n| n.id == id) {
            self.set_deadline(fd, node.deadline, deadline);
            node.deadline = deadline;
        }
    }

    pub fn add_timer(&self, after: Duration, context: H::Context) -> TimerHandle {
        let deadline = Instant::now() + after;
        let id = {
            let mut timers = self.timers.lock();
            let id = timers.next_timer;
            timers.next_timer += 1;
            timers.timers.insert((deadline, id), context);
            id
        };
        self.wake();
        TimerHandle {
            shard: self.index,
            deadline,
            id,
        }
    }

    /// Cancel a pending timer; it completes as `Deleted`. False if it
    /// already fired.
    pub fn del_timer(&self, handle: &TimerHandle) -> bool {
        let context = self.timers.lock().timers.remove(&(handle.deadline, handle.id));
        match context {
            Some(context) => {
                self.handler.callback(PollerResult::new(
                    PollerState::Deleted,
                    0,
                    Operation::Timer,
                    -1,
                    context,
                ));
                true
            }
            None => false,
        }
    }

    /// Take the node if it is still the registration `id`
    fn remove_if(&self, fd: RawFd, id: u64) -> Option<Box<Node<H::Context>>> {
        let slot = self.table.slot(fd).ok()?;
        let mut guard = slot.lock();
        if guard.as_ref().map(|n| n.id) != Some(id) {
            return None;
        }
        let node = guard.take()?;
        self.unregister(fd);
        self.set_deadline(fd, node.deadline, None);
        Some(node)
    }

    fn finish(&self, fd: RawFd, id: u64, state: PollerState, error: i32) {
        if let Some(node) = self.remove_if(fd, id) {
            self.handler
                .callback(PollerResult::new(state, error, node.operation, fd, node.context));
        }
    }

    fn emit(&self, operation: Operation, fd: RawFd, context: H::Context, accepted: Option<H::Context>, value: u64) {
        let mut result = PollerResult::new(PollerState::Success, 0, operation, fd, context);
        result.accepted = accepted;
        result.value = value;
        self.handler.callback(result);
    }

    fn next_wait(&self) -> i32 {
        let now = Instant::now();
        let timers = self.timers.lock();
        let nearest = [
            timers.deadlines.first().map(|(d, _)| *d),
            timers.timers.first_key_value().map(|((d, _), _)| *d),
        ]
        .into_iter()
        .flatten()
        .min();

        let wait = match nearest {
            Some(deadline) => deadline.saturating_duration_since(now).min(POLLER_IDLE_WAIT),
            None => POLLER_IDLE_WAIT,
        };
        // Round up so an expiring deadline is not polled with 0 repeatedly
        wait.as_micros().div_ceil(1000) as i32
    }

    fn run(self: Arc<Self>) {
        let mut events = vec![libc::epoll_event { events: 0, u64: 0 }; POLLER_EVENTS_MAX];
        let mut buf = vec![0u8; POLLER_BUFSIZE];
        let wakefd = self.wakefd.as_raw_fd();

        while self.running.load(Ordering::Acquire) {
            let wait = self.next_wait();
            let n = unsafe {
                libc::epoll_wait(
                    self.epfd.as_raw_fd(),
                    events.as_mut_ptr(),
                    events.len() as i32,
                    wait,
                )
            };

            if n < 0 {
                let errno = last_errno();
                if errno == libc::EINTR {
                    continue;
                }
                error!(shard = self.index, errno, "epoll_wait failed, poller exiting");
                break;
            }

            for ev in &events[..n as usize] {
                let fd = { ev.u64 } as RawFd;
                if fd == wakefd {
                    let mut counter = [0u8; 8];
                    unsafe {
                        libc::read(wakefd, counter.as_mut_ptr() as *mut libc::c_void, 8);
                    }
                    continue;
                }
                self.handle_event(fd, &mut buf);
            }

            self.handle_timeouts();
        }

        self.cleanup();
        debug!(shard = self.index, "Poller loop exited");
    }

    fn handle_event(&self, fd: RawFd, buf: &mut [u8]) {
        let Ok(slot) = self.table.slot(fd) else {
            return;
        };
        let (operation, context, id) = {
            let guard = slot.lock();
            match guard.as_ref() {
                Some(node) => (node.operation, node.context.clone(), node.id),
                None => return,
            }
        };

        match operation {
            Operation::Read => self.handle_read(fd, id, context, buf),
            Operation::Write => self.handle_write(fd, id, context),
            Operation::Connect => self.handle_connect(fd, id),
            Operation::Listen => self.handle_listen(fd, id, context),
            Operation::RecvFrom => self.handle_recvfrom(fd, id, context, buf),
            Operation::Event => self.handle_event_fd(fd, id, context),
            Operation::Notify => self.handle_notify(fd, id, context),
            Operation::Timer => {}
        }
    }

    fn handle_read(&self, fd: RawFd, id: u64, context: H::Context, buf: &mut [u8]) {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n > 0 {
            match self.handler.append(&context, &buf[..n as usize]) {
                Ok(ReadProgress::Complete) => self.finish(fd, id, PollerState::Success, 0),
                Ok(ReadProgress::Partial(Some(timeout))) => self.set_timeout_if(fd, id, timeout),
                Ok(ReadProgress::Partial(None)) => {}
                Err(e) => {
                    let errno = e.raw_os_error().unwrap_or(libc::EBADMSG);
                    self.finish(fd, id, PollerState::Error, errno);
                }
            }
        } else if n == 0 {
            self.finish(fd, id, PollerState::Finished, 0);
        } else {
            let errno = last_errno();
            if errno != libc::EAGAIN && errno != libc::EINTR {
                self.finish(fd, id, PollerState::Error, errno);
            }
        }
    }

    fn handle_write(&self, fd: RawFd, id: u64, context: H::Context) {
        enum Outcome<C> {
            Done(Box<Node<C>>),
            Failed(Box<Node<C>>, i32),
            Partial(usize),
        }

        let Ok(slot) = self.table.slot(fd) else {
            return;
        };
        let outcome = {
            let mut guard = slot.lock();
            let Some(node) = guard.as_mut().filter(|n| n.id == id) else {
                return;
            };

            let mut written = 0usize;
            let mut failed = 0;
            while let Some(front) = node.write_iov.front_mut() {
                if front.is_empty() {
                    node.write_iov.pop_front();
                    continue;
                }
                let n = unsafe { libc::write(fd, front.as_ptr() as *const libc::c_void, front.len()) };
                if n < 0 {
                    let errno = last_errno();
                    if errno == libc::EINTR {
                        continue;
                    }
                    if errno != libc::EAGAIN {
                        failed = errno;
                    }
                    break;
                }
                written += n as usize;
                front.advance(n as usize);
            }

            if failed != 0 || node.write_iov.is_empty() {
                let node = guard.take();
                self.unregister(fd);
                match node {
                    Some(node) => {
                        self.set_deadline(fd, node.deadline, None);
                        if failed != 0 {
                            Outcome::Failed(node, failed)
                        } else {
                            Outcome::Done(node)
                        }
                    }
                    None => return,
                }
            } else {
                Outcome::Partial(written)
            }
        };

        match outcome {
            Outcome::Done(node) => self.handler.callback(PollerResult::new(
                PollerState::Success,
                0,
                Operation::Write,
                fd,
                node.context,
            )),
            Outcome::Failed(node, errno) => self.handler.callback(PollerResult::new(
                PollerState::Error,
                errno,
                Operation::Write,
                fd,
                node.context,
            )),
            Outcome::Partial(0) => {}
            Outcome::Partial(written) => {
                if let Some(timeout) = self.handler.partial_written(&context, written) {
                    self.set_timeout_if(fd, id, timeout);
                }
            }
        }
    }

    fn handle_connect(&self, fd: RawFd, id: u64) {
        let mut error: libc::c_int = 0;
        let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
        let ret = unsafe {
            libc::getsockopt(
                fd,
                libc::SOL_SOCKET,
                libc::SO_ERROR,
                &mut error as *mut libc::c_int as *mut libc::c_void,
                &mut len,
            )
        };
        if ret < 0 {
            error = last_errno();
        }

        let state = if error == 0 {
            PollerState::Success
        } else {
            PollerState::Error
        };
        self.finish(fd, id, state, error);
    }

    fn handle_listen(&self, fd: RawFd, id: u64, context: H::Context) {
        let listener = ManuallyDrop::new(unsafe { TcpListener::from_raw_fd(fd) });
        loop {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        debug!(fd, error = %e, "Dropping accepted socket");
                        continue;
                    }
                    if let Some(accepted) = self.handler.accept(&context, OwnedFd::from(stream), peer) {
                        self.emit(Operation::Listen, fd, context.clone(), Some(accepted), 0);
                    }
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted => continue,
                    _ => {
                        warn!(fd, error = %e, "accept failed, closing listener");
                        let errno = e.raw_os_error().unwrap_or(libc::EIO);
                        self.finish(fd, id, PollerState::Error, errno);
                        break;
                    }
                },
            }
        }
    }

    fn handle_recvfrom(&self, fd: RawFd, id: u64, context: H::Context, buf: &mut [u8]) {
        let socket = ManuallyDrop::new(unsafe { UdpSocket::from_raw_fd(fd) });
        loop {
            match socket.recv_from(buf) {
                Ok((n, peer)) => {
                    if let Some(accepted) = self.handler.recvfrom(&context, &buf[..n], peer) {
                        self.emit(Operation::RecvFrom, fd, context.clone(), Some(accepted), 0);
                    }
                }
                Err(e) => match e.kind() {
                    io::ErrorKind::WouldBlock => break,
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        let errno = e.raw_os_error().unwrap_or(libc::EIO);
                        self.finish(fd, id, PollerState::Error, errno);
                        break;
                    }
                },
            }
        }
    }

    fn read_u64(fd: RawFd) -> Result<Option<u64>, i32> {
        let mut value = [0u8; 8];
        loop {
            let n = unsafe { libc::read(fd, value.as_mut_ptr() as *mut libc::c_void, 8) };
            if n == 8 {
                return Ok(Some(u64::from_ne_bytes(value)));
            }
            if n == 0 {
                return Err(0);
            }
            if n < 0 {
                match last_errno() {
                    libc::EINTR => continue,
                    libc::EAGAIN => return Ok(None),
                    errno => return Err(errno),
                }
            }
            // Short read of a token is a broken producer
            return Err(libc::EIO);
        }
    }

    fn handle_event_fd(&self, fd: RawFd, id: u64, context: H::Context) {
        match Self::read_u64(fd) {
            Ok(Some(value)) => self.emit(Operation::Event, fd, context, None, value),
            Ok(None) => {}
            Err(0) => self.finish(fd, id, PollerState::Finished, 0),
            Err(errno) => self.finish(fd, id, PollerState::Error, errno),
        }
    }

    fn handle_notify(&self, fd: RawFd, id: u64, context: H::Context) {
        loop {
            match Self::read_u64(fd) {
                Ok(Some(value)) => self.emit(Operation::Notify, fd, context.clone(), None, value),
                Ok(None) => break,
                Err(0) => {
                    self.finish(fd, id, PollerState::Finished, 0);
                    break;
                }
                Err(errno) => {
                    self.finish(fd, id, PollerState::Error, errno);
                    break;
                }
            }
        }
    }

    fn handle_timeouts(&self) {
        let now = Instant::now();
        let (expired_nodes, expired_timers) = {
            let mut timers = self.timers.lock();
            let mut nodes = Vec::new();
            while let Some(&(deadline, fd)) = timers.deadlines.first() {
                if deadline > now {
                    break;
                }
                timers.deadlines.pop_first();
                nodes.push((deadline, fd));
            }
            let mut fired = Vec::new();
            while let Some((&(deadline, _), _)) = timers.timers.first_key_value() {
                if deadline > now {
                    break;
                }
                if let Some((_, context)) = timers.timers.pop_first() {
                    fired.push(context);
                }
            }
            (nodes, fired)
        };

        for (deadline, fd) in expired_nodes {
            let Ok(slot) = self.table.slot(fd) else {
                continue;
            };
            let node = {
                let mut guard = slot.lock();
                if guard.as_ref().and_then(|n| n.deadline) != Some(deadline) {
                    continue;
                }
                self.unregister(fd);
                guard.take()
            };
            if let Some(node) = node {
                self.handler.callback(PollerResult::new(
                    PollerState::Error,
                    libc::ETIMEDOUT,
                    node.operation,
                    fd,
                    node.context,
                ));
            }
        }

        for context in expired_timers {
            self.handler.callback(PollerResult::new(
                PollerState::Success,
                0,
                Operation::Timer,
                -1,
                context,
            ));
        }
    }

    /// Complete everything this shard still holds as `Stopped`
    fn cleanup(&self) {
        let mut stopped = 0usize;
        for fd in (self.index..self.table.len()).step_by(self.nshards.max(1)) {
            let node = {
                let Ok(slot) = self.table.slot(fd as RawFd) else {
                    continue;
                };
                let mut guard = slot.lock();
                let Some(node) = guard.take() else {
                    continue;
                };
                self.unregister(fd as RawFd);
                node
            };
            stopped += 1;
            self.handler.callback(PollerResult::new(
                PollerState::Stopped,
                0,
                node.operation,
                fd as RawFd,
                node.context,
            ));
        }

        let timers = {
            let mut timers = self.timers.lock();
            timers.deadlines.clear();
            std::mem::take(&mut timers.timers)
        };
        for (_, context) in timers {
            stopped += 1;
            self.handler.callback(PollerResult::new(
                PollerState::Stopped,
                0,
                Operation::Timer,
                -1,
                context,
            ));
        }

        if stopped > 0 {
            debug!(shard = self.index, registrations = stopped, "Pending registrations stopped");
        }
    }
}
