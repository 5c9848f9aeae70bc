/*!
 * Client Task
 *
 * One request/response exchange with a remote target. The task is its own
 * communicator session: it moves into the communicator at dispatch and
 * comes back through `handle`, which records the outcome, retries if
 * allowed, and resumes the series.
 */

use super::{Callback, Task, TaskStatus};
use crate::core::limits::DEFAULT_WAIT_TIMEOUT_MS;
use crate::core::{TimeoutMs, TimeoutReason};
use crate::kernel::{CommSession, Communicator, Connection, SchedObject, SessionCore, SessionState};
use crate::protocol::{MessageIn, MessageOut};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};
use std::sync::Arc;
use tracing::debug;

pub struct ClientTask<Req, Resp> {
    core: SessionCore,
    req: Req,
    resp: Resp,
    comm: Arc<Communicator>,
    sched: Arc<dyn SchedObject>,
    wait_timeout: TimeoutMs,
    send_timeout: TimeoutMs,
    receive_timeout: TimeoutMs,
    keep_alive_timeout: TimeoutMs,
    watch_timeout: TimeoutMs,
    retry_max: usize,
    retries: usize,
    timeout_reason: TimeoutReason,
    status: TaskStatus,
    series: Option<Series>,
    callback: Option<Callback<ClientTask<Req, Resp>>>,
}

impl<Req, Resp> ClientTask<Req, Resp>
where
    Req: MessageOut + 'static,
    Resp: MessageIn + Default + 'static,
{
    pub fn new(
        comm: Arc<Communicator>,
        sched: Arc<dyn SchedObject>,
        req: Req,
        retry_max: usize,
        callback: Option<Callback<ClientTask<Req, Resp>>>,
    ) -> Box<Self> {
        Box::new(Self {
            core: SessionCore::new(),
            req,
            resp: Resp::default(),
            comm,
            sched,
            wait_timeout: DEFAULT_WAIT_TIMEOUT_MS,
            send_timeout: -1,
            receive_timeout: -1,
            keep_alive_timeout: 0,
            watch_timeout: 0,
            retry_max,
            retries: 0,
            timeout_reason: TimeoutReason::NotTimeout,
            status: TaskStatus::default(),
            series: None,
            callback,
        })
    }

    pub fn req(&self) -> &Req {
        &self.req
    }

    pub fn req_mut(&mut self) -> &mut Req {
        &mut self.req
    }

    pub fn resp(&self) -> &Resp {
        &self.resp
    }

    pub fn resp_mut(&mut self) -> &mut Resp {
        &mut self.resp
    }

    pub fn take_resp(&mut self) -> Resp {
        std::mem::take(&mut self.resp)
    }

    pub fn set_callback(&mut self, callback: Callback<ClientTask<Req, Resp>>) {
        self.callback = Some(callback);
    }

    /// How long to wait for a target with free capacity, -1 forever
    pub fn set_wait_timeout(&mut self, timeout: TimeoutMs) {
        self.wait_timeout = timeout;
    }

    pub fn set_send_timeout(&mut self, timeout: TimeoutMs) {
        self.send_timeout = timeout;
    }

    pub fn set_receive_timeout(&mut self, timeout: TimeoutMs) {
        self.receive_timeout = timeout;
    }

    pub fn set_keep_alive(&mut self, timeout: TimeoutMs) {
        self.keep_alive_timeout = timeout;
    }

    /// Time allowed until the first response byte
    pub fn set_watch_timeout(&mut self, timeout: TimeoutMs) {
        self.watch_timeout = timeout;
    }

    pub fn timeout_reason(&self) -> TimeoutReason {
        self.timeout_reason
    }

    /// Position of the exchange on its connection
    pub fn task_seq(&self) -> u64 {
        self.core.seq()
    }

    pub fn retries(&self) -> usize {
        self.retries
    }

    pub fn connection(&self) -> Option<&Arc<Connection>> {
        self.core.connection()
    }

    fn request(self: Box<Self>) {
        let comm = self.comm.clone();
        let sched = self.sched.clone();
        let wait_timeout = self.wait_timeout;
        comm.request(self, &*sched, wait_timeout);
    }
}

impl<Req, Resp> Task for ClientTask<Req, Resp> {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl<Req, Resp> CommSession for ClientTask<Req, Resp>
where
    Req: MessageOut + 'static,
    Resp: MessageIn + Default + 'static,
{
    fn core(&self) -> &SessionCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut SessionCore {
        &mut self.core
    }

    fn message_out(&mut self) -> &mut dyn MessageOut {
        &mut self.req
    }

    fn message_in(&mut self) -> &mut dyn MessageIn {
        &mut self.resp
    }

    fn send_timeout(&self) -> TimeoutMs {
        self.send_timeout
    }

    fn receive_timeout(&self) -> TimeoutMs {
        self.receive_timeout
    }

    fn keep_alive_timeout(&self) -> TimeoutMs {
        self.keep_alive_timeout
    }

    fn first_timeout(&self) -> TimeoutMs {
        self.watch_timeout
    }

    fn handle(mut self: Box<Self>, state: SessionState, error: i32) {
        self.status = match state {
            SessionState::Success | SessionState::ToReply => TaskStatus::success(),
            SessionState::Error => TaskStatus::sys_error(error),
            SessionState::Stopped => TaskStatus::aborted(libc::ESHUTDOWN),
        };
        self.timeout_reason = if state == SessionState::Error {
            TimeoutReason::classify(error, self.core.target().is_some(), self.core.connected())
        } else {
            TimeoutReason::NotTimeout
        };

        if state == SessionState::Error && self.retries < self.retry_max && !self.comm.is_stopped() {
            self.retries += 1;
            debug!(error, retry = self.retries, "Retrying client request");
            self.resp = Resp::default();
            self.request();
            return;
        }

        if let Some(series) = self.series.take() {
            subtask_done(self, series);
        }
    }
}

impl<Req, Resp> SubTask for ClientTask<Req, Resp>
where
    Req: MessageOut + 'static,
    Resp: MessageIn + Default + 'static,
{
    fn dispatch(mut self: Box<Self>, series: Series) {
        self.series = Some(series);
        self.request();
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl<Req, Resp> std::fmt::Debug for ClientTask<Req, Resp> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTask")
            .field("core", &self.core)
            .field("retries", &self.retries)
            .field("timeout_reason", &self.timeout_reason)
            .field("status", &self.status)
            .finish()
    }
}
