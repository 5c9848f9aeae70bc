/*!
 * Server Task
 *
 * One request received by a server and the reply owed for it. When the
 * request is complete the task hands itself to the user's processor
 * together with a fresh series; the processor may fill the reply right
 * away or queue more tasks on the series first. The server task runs as
 * the last task of that series, where it sends the reply (or closes the
 * connection after `noreply`).
 */

use super::{Callback, Task, TaskStatus};
use crate::core::{CommError, TaskState, TimeoutMs};
use crate::kernel::{CommSession, Communicator, Connection, SessionCore, SessionState};
use crate::protocol::{MessageIn, MessageOut};
use crate::workflow::{subtask_done, BoxTask, Series, SeriesWork, SubTask};
use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::sync::Arc;

/// User code run for every complete request
pub type Processor<Req, Resp> = Arc<dyn Fn(&mut ServerTask<Req, Resp>, &Series) + Send + Sync>;

/// A reply shared between the server task and tasks that fill it later
pub struct SharedMessage<M> {
    inner: Arc<Mutex<M>>,
}

impl<M> SharedMessage<M> {
    pub fn new(message: M) -> Self {
        Self {
            inner: Arc::new(Mutex::new(message)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, M> {
        self.inner.lock()
    }
}

impl<M> Clone for SharedMessage<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<M: MessageOut> MessageOut for SharedMessage<M> {
    fn encode(&mut self, out: &mut Vec<Bytes>, max: usize) -> io::Result<usize> {
        self.inner.lock().encode(out, max)
    }
}

pub struct ServerTask<Req, Resp> {
    core: SessionCore,
    req: Req,
    resp: SharedMessage<Resp>,
    comm: Arc<Communicator>,
    processor: Processor<Req, Resp>,
    send_timeout: TimeoutMs,
    keep_alive_timeout: TimeoutMs,
    status: TaskStatus,
    series: Option<Series>,
    callback: Option<Callback<ServerTask<Req, Resp>>>,
}

impl<Req, Resp> ServerTask<Req, Resp>
where
    Req: MessageIn + Default + 'static,
    Resp: MessageOut + Default + 'static,
{
    pub(crate) fn new(comm: Arc<Communicator>, processor: Processor<Req, Resp>, keep_alive_timeout: TimeoutMs) -> Box<Self> {
        Box::new(Self {
            core: SessionCore::new(),
            req: Req::default(),
            resp: SharedMessage::new(Resp::default()),
            comm,
            processor,
            send_timeout: -1,
            keep_alive_timeout,
            status: TaskStatus::default(),
            series: None,
            callback: None,
        })
    }

    pub fn req(&self) -> &Req {
        &self.req
    }

    pub fn req_mut(&mut self) -> &mut Req {
        &mut self.req
    }

    pub fn resp(&self) -> MutexGuard<'_, Resp> {
        self.resp.lock()
    }

    /// Handle to the reply for tasks that complete it later
    pub fn shared_resp(&self) -> SharedMessage<Resp> {
        self.resp.clone()
    }

    pub fn set_callback(&mut self, callback: Callback<ServerTask<Req, Resp>>) {
        self.callback = Some(callback);
    }

    pub fn set_send_timeout(&mut self, timeout: TimeoutMs) {
        self.send_timeout = timeout;
    }

    pub fn set_keep_alive(&mut self, timeout: TimeoutMs) {
        self.keep_alive_timeout = timeout;
    }

    /// Close the connection instead of replying
    pub fn noreply(&mut self) {
        if self.status.state == TaskState::ToReply {
            self.status.state = TaskState::NoReply;
        }
    }

    /// Write raw bytes to the peer ahead of the reply
    pub fn push(&self, buf: &[u8]) -> Result<usize, CommError> {
        self.comm.push(&self.core, buf)
    }

    /// The peer connection went away
    pub fn closed(&self) -> bool {
        self.core.is_closed()
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.core.connection()
    }

    pub fn task_seq(&self) -> u64 {
        self.core.seq()
    }

    fn process(mut self: Box<Self>) {
        self.status = TaskStatus::new(TaskState::ToReply, 0);
        let series = SeriesWork::empty(None);
        let processor = self.processor.clone();
        processor(&mut self, &series);
        series.set_last_task(self);
        series.start();
    }
}

impl<Req, Resp> Task for ServerTask<Req, Resp> {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl<Req, Resp> CommSession for ServerTask<Req, Resp>
where
    Req: MessageIn + Default + 'static,
    Resp: MessageOut + Default + 'static,
{
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    fn message_out(&mut self) -> &mut dyn MessageOut {
        &mut self.resp
    }

    fn message_in(&mut self) -> &mut dyn MessageIn {
        &mut self.req
    }

    fn send_timeout(&self) -> TimeoutMs {
        self.send_timeout
    }

    fn keep_alive_timeout(&self) -> TimeoutMs {
        self.keep_alive_timeout
    }

    fn handle(mut self: Box<Self>, state: SessionState, error: i32) {
        if state == SessionState::ToReply {
            self.process();
            return;
        }

        // A request cut off before it was complete has no series
        let Some(series) = self.series.take() else {
            return;
        };
        self.status = match state {
            SessionState::Success | SessionState::ToReply => TaskStatus::success(),
            SessionState::Error => TaskStatus::sys_error(error),
            SessionState::Stopped => TaskStatus::aborted(libc::ESHUTDOWN),
        };
        subtask_done(self, series);
    }
}

impl<Req, Resp> SubTask for ServerTask<Req, Resp>
where
    Req: MessageIn + Default + 'static,
    Resp: MessageOut + Default + 'static,
{
    fn dispatch(mut self: Box<Self>, series: Series) {
        if self.status.state == TaskState::ToReply && !series.is_canceled() {
            self.series = Some(series);
            let comm = self.comm.clone();
            comm.reply(self);
            return;
        }

        self.comm.shutdown(&mut self.core);
        if self.status.state == TaskState::ToReply {
            self.status = TaskStatus::aborted(libc::ECANCELED);
        }
        subtask_done(self, series);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl<Req, Resp> Drop for ServerTask<Req, Resp> {
    fn drop(&mut self) {
        // Dropped while still owing a reply, e.g. from a canceled series
        if !self.core.is_closed() {
            self.comm.shutdown(&mut self.core);
        }
    }
}

impl<Req, Resp> std::fmt::Debug for ServerTask<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerTask")
            .field("core", &self.core)
            .field("status", &self.status)
            .finish()
    }
}
