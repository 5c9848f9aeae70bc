/*!
 * Session Contracts
 *
 * A session is one exchange driven by the communicator: a client request
 * with its response, or a server request with its reply. Sessions are
 * owned boxes that move into the communicator while an operation is in
 * flight and come back through `handle`.
 */

use super::conn::{ConnEntry, Connection, Phase};
use super::target::CommTarget;
use crate::core::TimeoutMs;
use crate::protocol::{MessageIn, MessageOut};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Terminal or intermediate outcome delivered to [`CommSession::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Success,
    Error,
    /// The communicator stopped with the session in flight
    Stopped,
    /// Server side: a whole request arrived and a reply is owed
    ToReply,
}

/// Bookkeeping the communicator keeps on every session
#[derive(Default)]
pub struct SessionCore {
    pub(crate) target: Option<Arc<CommTarget>>,
    pub(crate) conn: Option<Arc<Connection>>,
    pub(crate) entry: Option<Arc<ConnEntry>>,
    pub(crate) seq: u64,
    pub(crate) connected: bool,
    pub(crate) sent: bool,
    pub(crate) begin: Option<Instant>,
}

impl SessionCore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Target acquired for this exchange, if admission succeeded
    pub fn target(&self) -> Option<&Arc<CommTarget>> {
        self.target.as_ref()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.conn.as_ref()
    }

    /// Position of this exchange on its connection, starting at 0
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Whether a connection was up and writing had begun
    pub fn connected(&self) -> bool {
        self.connected
    }

    /// Whether the whole outgoing message was written
    pub fn sent(&self) -> bool {
        self.sent
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.begin.map(|b| b.elapsed())
    }

    /// The connection carrying this exchange is gone or was never attached
    pub fn is_closed(&self) -> bool {
        self.entry
            .as_ref()
            .map_or(true, |entry| entry.state().phase == Phase::Closed)
    }

    pub(crate) fn reset(&mut self) {
        self.target = None;
        self.conn = None;
        self.entry = None;
        self.connected = false;
        self.sent = false;
        self.begin = Some(Instant::now());
    }
}

impl std::fmt::Debug for SessionCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCore")
            .field("target", &self.target.as_ref().map(|t| t.addr()))
            .field("conn", &self.conn.as_ref().map(|c| c.id()))
            .field("seq", &self.seq)
            .field("connected", &self.connected)
            .field("sent", &self.sent)
            .finish()
    }
}

/// One network exchange
pub trait CommSession: Send + 'static {
    fn core(&self) -> &SessionCore;
    fn core_mut(&mut self) -> &mut SessionCore;

    /// Client: the request. Server: the reply.
    fn message_out(&mut self) -> &mut dyn MessageOut;

    /// Client: the response. Server: the request.
    fn message_in(&mut self) -> &mut dyn MessageIn;

    /// Time allowed to flush the outgoing message, -1 unlimited
    fn send_timeout(&self) -> TimeoutMs {
        -1
    }

    /// Time allowed to receive the whole incoming message, -1 unlimited
    fn receive_timeout(&self) -> TimeoutMs {
        -1
    }

    /// Idle time a connection is kept after this exchange, 0 closes it
    fn keep_alive_timeout(&self) -> TimeoutMs {
        0
    }

    /// Client: wait for the first response byte instead of the target's
    /// response timeout when positive
    fn first_timeout(&self) -> TimeoutMs {
        0
    }

    fn handle(self: Box<Self>, state: SessionState, error: i32);
}

pub type BoxCommSession = Box<dyn CommSession>;

/// Outcome delivered to [`SleepSession::handle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SleepState {
    Complete,
    /// Canceled by `unsleep`
    Disrupted,
    Stopped,
}

/// Timer-backed suspension
pub trait SleepSession: Send + 'static {
    fn duration(&self) -> Duration;

    fn handle(self: Box<Self>, state: SleepState, error: i32);
}

pub type BoxSleepSession = Box<dyn SleepSession>;
