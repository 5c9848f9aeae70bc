/*!
 * Poller Types
 * Registration records, completion records, and the handler contract
 */

use crate::core::TimeoutMs;
use bytes::Bytes;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::{OwnedFd, RawFd};
use std::time::Instant;

/// What a registered descriptor is waiting for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Timer,
    /// Read one message, then unregister
    Read,
    /// Flush the attached buffers, then unregister
    Write,
    /// Accept connections until removed
    Listen,
    /// Wait for a nonblocking connect, then unregister
    Connect,
    /// Receive datagrams until removed
    RecvFrom,
    /// Eventfd counter, delivered once per readiness
    Event,
    /// Pipe of 8-byte values, delivered one result per value
    Notify,
}

impl Operation {
    pub(crate) fn epoll_events(self) -> u32 {
        match self {
            Operation::Write | Operation::Connect => libc::EPOLLOUT as u32,
            _ => libc::EPOLLIN as u32,
        }
    }
}

/// How a registration ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollerState {
    Success,
    /// Peer closed the stream before a message completed
    Finished,
    Error,
    /// Removed by `del` or `del_timer`
    Deleted,
    /// Poller stopped with the registration still pending
    Stopped,
}

/// One registration
pub struct PollerData<C> {
    pub operation: Operation,
    pub fd: RawFd,
    pub context: C,
    /// Pending output of a `Write` registration
    pub write_iov: VecDeque<Bytes>,
}

impl<C> PollerData<C> {
    pub fn new(operation: Operation, fd: RawFd, context: C) -> Self {
        Self {
            operation,
            fd,
            context,
            write_iov: VecDeque::new(),
        }
    }

    pub fn write(fd: RawFd, context: C, iov: VecDeque<Bytes>) -> Self {
        Self {
            operation: Operation::Write,
            fd,
            context,
            write_iov: iov,
        }
    }
}

/// Completion record handed to [`PollerHandler::callback`]
pub struct PollerResult<C> {
    pub state: PollerState,
    pub error: i32,
    pub operation: Operation,
    /// -1 for timers
    pub fd: RawFd,
    pub context: C,
    /// Context produced by `accept` or `recvfrom`
    pub accepted: Option<C>,
    /// Counter or token of `Event`/`Notify` results
    pub value: u64,
}

impl<C> PollerResult<C> {
    pub(crate) fn new(state: PollerState, error: i32, operation: Operation, fd: RawFd, context: C) -> Self {
        Self {
            state,
            error,
            operation,
            fd,
            context,
            accepted: None,
            value: 0,
        }
    }
}

impl<C> std::fmt::Debug for PollerResult<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollerResult")
            .field("state", &self.state)
            .field("error", &self.error)
            .field("operation", &self.operation)
            .field("fd", &self.fd)
            .field("accepted", &self.accepted.is_some())
            .field("value", &self.value)
            .finish()
    }
}

/// Progress of a `Read` registration after feeding it bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadProgress {
    /// Keep reading; `Some` replaces the registration timeout
    Partial(Option<TimeoutMs>),
    Complete,
}

/// Behavior plugged into a poller
///
/// Hooks run on the poller thread without any poller lock held, so they
/// may call back into the poller.
pub trait PollerHandler: Send + Sync + 'static {
    type Context: Clone + Send + 'static;

    /// Bytes arrived on a `Read` registration
    fn append(&self, context: &Self::Context, buf: &[u8]) -> io::Result<ReadProgress>;

    /// A `Listen` registration accepted a connection; `None` closes it
    fn accept(&self, _context: &Self::Context, _fd: OwnedFd, _peer: SocketAddr) -> Option<Self::Context> {
        None
    }

    /// A `RecvFrom` registration received a datagram
    fn recvfrom(&self, _context: &Self::Context, _buf: &[u8], _peer: SocketAddr) -> Option<Self::Context> {
        None
    }

    /// A `Write` registration flushed some but not all of its buffers
    fn partial_written(&self, _context: &Self::Context, _written: usize) -> Option<TimeoutMs> {
        None
    }

    /// Every completion lands here
    fn callback(&self, result: PollerResult<Self::Context>);
}

/// Timeout in milliseconds to an absolute deadline, negative means none
pub(crate) fn deadline_after(timeout: TimeoutMs) -> Option<Instant> {
    if timeout < 0 {
        None
    } else {
        Some(Instant::now() + std::time::Duration::from_millis(timeout as u64))
    }
}

/// Handle to a pending timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle {
    pub(crate) shard: usize,
    pub(crate) deadline: Instant,
    pub(crate) id: u64,
}
