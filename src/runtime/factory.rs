/*!
 * Task Factory
 *
 * Constructors for every task kind, wired to this runtime's communicator,
 * executor, queues, and targets. Construction never fails; a task that
 * cannot run reports the failure through its state when dispatched.
 */

use super::Runtime;
use crate::kernel::SchedObject;
use crate::protocol::{MessageIn, MessageOut};
use crate::task::{
    Callback, ClientTask, ConditionalHandle, CounterHandle, FileOp, FileTask, GenericTask, GoTask, MailboxHandle,
    RepeaterFactory, RepeaterTask, SelectorHandle, SignalTask, ThreadRoutine, ThreadTask, TimerTask,
};
use crate::workflow::BoxTask;
use std::fs::File;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

impl Runtime {
    pub fn create_generic_task(&self, callback: Option<Callback<GenericTask>>) -> Box<GenericTask> {
        GenericTask::new(callback)
    }

    pub fn create_timer_task(&self, duration: Duration, callback: Option<Callback<TimerTask>>) -> Box<TimerTask> {
        TimerTask::new(self.communicator().clone(), duration, callback)
    }

    /// Run `routine` on the exec queue named `queue`
    pub fn create_go_task<F>(&self, queue: &str, routine: F) -> Box<GoTask>
    where
        F: FnOnce() + Send + 'static,
    {
        GoTask::new(self.executor().clone(), self.exec_queue(queue), Box::new(routine))
    }

    pub fn create_thread_task<I, O>(
        &self,
        queue: &str,
        routine: ThreadRoutine<I, O>,
        input: I,
        callback: Option<Callback<ThreadTask<I, O>>>,
    ) -> Box<ThreadTask<I, O>>
    where
        I: Send + 'static,
        O: Default + Send + 'static,
    {
        ThreadTask::new(self.executor().clone(), self.exec_queue(queue), routine, input, callback)
    }

    /// File tasks on one file share a queue keyed by its descriptor
    fn file_task(&self, file: Arc<File>, op: FileOp, callback: Option<Callback<FileTask>>) -> Box<FileTask> {
        use std::os::fd::AsRawFd;
        let queue = self.exec_queue(&format!("fio:{}", file.as_raw_fd()));
        FileTask::new(self.executor().clone(), queue, file, op, callback)
    }

    pub fn create_pread_task(
        &self,
        file: Arc<File>,
        len: usize,
        offset: u64,
        callback: Option<Callback<FileTask>>,
    ) -> Box<FileTask> {
        self.file_task(file, FileOp::Read { len, offset }, callback)
    }

    pub fn create_pwrite_task(
        &self,
        file: Arc<File>,
        data: impl Into<bytes::Bytes>,
        offset: u64,
        callback: Option<Callback<FileTask>>,
    ) -> Box<FileTask> {
        self.file_task(
            file,
            FileOp::Write {
                data: data.into(),
                offset,
            },
            callback,
        )
    }

    pub fn create_fsync_task(&self, file: Arc<File>, callback: Option<Callback<FileTask>>) -> Box<FileTask> {
        self.file_task(file, FileOp::Sync, callback)
    }

    pub fn create_fdsync_task(&self, file: Arc<File>, callback: Option<Callback<FileTask>>) -> Box<FileTask> {
        self.file_task(file, FileOp::DataSync, callback)
    }

    /// Client exchange with the target registered for `addr`
    pub fn create_client_task<Req, Resp>(
        &self,
        addr: SocketAddr,
        req: Req,
        retry_max: usize,
        callback: Option<Callback<ClientTask<Req, Resp>>>,
    ) -> Box<ClientTask<Req, Resp>>
    where
        Req: MessageOut + 'static,
        Resp: MessageIn + Default + 'static,
    {
        let target: Arc<dyn SchedObject> = self.target(addr);
        self.create_client_task_with(target, req, retry_max, callback)
    }

    /// Client exchange with any target handed out by `sched`
    pub fn create_client_task_with<Req, Resp>(
        &self,
        sched: Arc<dyn SchedObject>,
        req: Req,
        retry_max: usize,
        callback: Option<Callback<ClientTask<Req, Resp>>>,
    ) -> Box<ClientTask<Req, Resp>>
    where
        Req: MessageOut + 'static,
        Resp: MessageIn + Default + 'static,
    {
        ClientTask::new(self.communicator().clone(), sched, req, retry_max, callback)
    }

    pub fn create_counter_task(
        &self,
        target: usize,
        callback: Option<Callback<SignalTask>>,
    ) -> (Box<SignalTask>, CounterHandle) {
        SignalTask::counter(target, callback)
    }

    pub fn create_mailbox_task(
        &self,
        size: usize,
        callback: Option<Callback<SignalTask>>,
    ) -> (Box<SignalTask>, MailboxHandle) {
        SignalTask::mailbox(size, callback)
    }

    pub fn create_selector_task(
        &self,
        candidates: usize,
        callback: Option<Callback<SignalTask>>,
    ) -> (Box<SignalTask>, SelectorHandle) {
        SignalTask::selector(candidates, callback)
    }

    pub fn create_conditional(
        &self,
        task: BoxTask,
        callback: Option<Callback<SignalTask>>,
    ) -> (Box<SignalTask>, ConditionalHandle) {
        SignalTask::conditional(task, callback)
    }

    pub fn create_repeater_task(
        &self,
        factory: RepeaterFactory,
        callback: Option<Callback<RepeaterTask>>,
    ) -> Box<RepeaterTask> {
        RepeaterTask::new(factory, callback)
    }
}
