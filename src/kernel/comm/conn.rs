/*!
 * Connections
 *
 * `Connection` is the user-visible face of a socket: an id, the peer,
 * and an optional context value dropped with the connection.
 * `ConnEntry` is the communicator's record of the same socket: the
 * owned descriptor, which side opened it, and the in-flight session.
 */

use super::service::CommService;
use super::session::BoxCommSession;
use super::socket;
use super::target::CommTarget;
use bytes::BytesMut;
use parking_lot::{Mutex, MutexGuard};
use std::any::Any;
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Live connection as seen by sessions and server tasks
pub struct Connection {
    id: u64,
    peer: SocketAddr,
    context: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Connection {
    pub(crate) fn new(peer: SocketAddr) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed),
            peer,
            context: Mutex::new(None),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Attach a value; it is dropped when the connection goes away or
    /// when another value replaces it
    pub fn set_context<T: Any + Send>(&self, value: T) {
        *self.context.lock() = Some(Box::new(value));
    }

    pub fn with_context<T: Any + Send, R>(&self, f: impl FnOnce(Option<&mut T>) -> R) -> R {
        let mut guard = self.context.lock();
        f(guard.as_mut().and_then(|c| c.downcast_mut::<T>()))
    }

    pub fn take_context<T: Any + Send>(&self) -> Option<T> {
        let mut guard = self.context.lock();
        match guard.take()?.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                *guard = Some(other);
                None
            }
        }
    }

    pub fn has_context(&self) -> bool {
        self.context.lock().is_some()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish()
    }
}

/// Which side opened the socket
pub(crate) enum Side {
    Client(Arc<CommTarget>),
    Server(Arc<CommService>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    /// No exchange in flight; waiting for a keep-alive reuse or request
    Idle,
    Connecting,
    Sending,
    Receiving,
    /// Server request complete, the reply is owed
    ToReply,
    Replying,
    Closed,
}

pub(crate) struct EntryState {
    pub phase: Phase,
    pub session: Option<BoxCommSession>,
    /// Bumped on every registration and on close; poller results carrying
    /// an older ticket are ignored
    pub ticket: u64,
    /// Sequence number of the next exchange
    pub seq: u64,
    /// Deadline of the whole incoming message
    pub recv_deadline: Option<Instant>,
    /// Bytes past the end of the last request, served next
    pub leftover: BytesMut,
}

pub(crate) struct ConnEntry {
    socket: OwnedFd,
    pub conn: Arc<Connection>,
    pub side: Side,
    state: Mutex<EntryState>,
}

impl ConnEntry {
    pub(crate) fn new(socket: OwnedFd, peer: SocketAddr, side: Side, phase: Phase) -> Arc<Self> {
        Arc::new(Self {
            socket,
            conn: Connection::new(peer),
            side,
            state: Mutex::new(EntryState {
                phase,
                session: None,
                ticket: 0,
                seq: 0,
                recv_deadline: None,
                leftover: BytesMut::new(),
            }),
        })
    }

    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock()
    }

    /// Mark closed and wake the peer; the descriptor itself closes when the
    /// last reference drops. Returns `None` if it was already closed,
    /// otherwise whatever session was still parked on the entry.
    pub(crate) fn mark_closed(&self) -> Option<Option<BoxCommSession>> {
        let orphan = {
            let mut state = self.state.lock();
            if state.phase == Phase::Closed {
                return None;
            }
            state.phase = Phase::Closed;
            state.ticket += 1;
            state.leftover.clear();
            state.session.take()
        };
        socket::shutdown(self.fd());
        Some(orphan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_context_dropped_with_connection() {
        let drops = Arc::new(AtomicUsize::new(0));
        let conn = Connection::new(SocketAddr::from(([127, 0, 0, 1], 80)));
        conn.set_context(DropCounter(drops.clone()));
        assert!(conn.has_context());

        drop(conn);
        assert_eq!(drops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_context_typed_access() {
        let conn = Connection::new(SocketAddr::from(([127, 0, 0, 1], 80)));
        conn.set_context(41u32);
        conn.with_context::<u32, _>(|v| *v.unwrap() += 1);
        assert!(conn.take_context::<String>().is_none());
        assert_eq!(conn.take_context::<u32>(), Some(42));
        assert!(!conn.has_context());
    }

    #[test]
    fn test_connection_ids_unique() {
        let a = Connection::new(SocketAddr::from(([127, 0, 0, 1], 80)));
        let b = Connection::new(SocketAddr::from(([127, 0, 0, 1], 80)));
        assert_ne!(a.id(), b.id());
    }
}
