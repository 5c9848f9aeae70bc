/*!
 * File Tasks
 * Positional reads and writes, and syncs, run on the compute executor
 */

use super::exec::{ExecBridge, ExecWork};
use super::{Callback, Task, TaskStatus};
use crate::kernel::{ExecQueue, Executor};
use crate::workflow::{BoxTask, Series, SubTask};
use bytes::Bytes;
use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// What a file task does
#[derive(Debug, Clone)]
pub enum FileOp {
    /// Read up to `len` bytes at `offset`
    Read { len: usize, offset: u64 },
    Write { data: Bytes, offset: u64 },
    Sync,
    DataSync,
}

pub struct FileTask {
    file: Arc<File>,
    op: FileOp,
    data: Vec<u8>,
    retval: usize,
    io_error: Option<i32>,
    executor: Arc<Executor>,
    queue: Arc<ExecQueue>,
    status: TaskStatus,
    callback: Option<Callback<FileTask>>,
}

impl FileTask {
    pub fn new(
        executor: Arc<Executor>,
        queue: Arc<ExecQueue>,
        file: Arc<File>,
        op: FileOp,
        callback: Option<Callback<FileTask>>,
    ) -> Box<Self> {
        Box::new(Self {
            file,
            op,
            data: Vec::new(),
            retval: 0,
            io_error: None,
            executor,
            queue,
            status: TaskStatus::default(),
            callback,
        })
    }

    pub fn op(&self) -> &FileOp {
        &self.op
    }

    /// Bytes transferred by a read or write
    pub fn retval(&self) -> usize {
        self.retval
    }

    /// Bytes read
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn take_data(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.data)
    }

    pub fn set_callback(&mut self, callback: Callback<FileTask>) {
        self.callback = Some(callback);
    }

    fn run(&mut self) -> io::Result<usize> {
        match &self.op {
            FileOp::Read { len, offset } => {
                let mut buf = vec![0u8; *len];
                let n = self.file.read_at(&mut buf, *offset)?;
                buf.truncate(n);
                self.data = buf;
                Ok(n)
            }
            FileOp::Write { data, offset } => self.file.write_at(data, *offset),
            FileOp::Sync => self.file.sync_all().map(|_| 0),
            FileOp::DataSync => self.file.sync_data().map(|_| 0),
        }
    }
}

impl Task for FileTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl ExecWork for FileTask {
    fn execute(&mut self) {
        match self.run() {
            Ok(n) => self.retval = n,
            Err(e) => self.io_error = Some(e.raw_os_error().unwrap_or(libc::EIO)),
        }
    }

    fn set_status(&mut self, status: TaskStatus) {
        self.status = match self.io_error {
            Some(error) if status == TaskStatus::success() => TaskStatus::sys_error(error),
            _ => status,
        };
    }
}

impl SubTask for FileTask {
    fn dispatch(self: Box<Self>, series: Series) {
        let executor = self.executor.clone();
        let queue = self.queue.clone();
        ExecBridge::submit(self, series, &executor, &queue);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for FileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTask")
            .field("op", &self.op)
            .field("retval", &self.retval)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskState;
    use crate::workflow::SeriesWork;
    use pretty_assertions::assert_eq;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_write_then_read() {
        let executor = Arc::new(Executor::new(1).unwrap());
        let queue = ExecQueue::named("file");
        let file = Arc::new(tempfile::tempfile().unwrap());
        let (tx, rx) = mpsc::channel();

        let write_tx = tx.clone();
        let write = FileTask::new(
            executor.clone(),
            queue.clone(),
            file.clone(),
            FileOp::Write {
                data: Bytes::from_static(b"hello file"),
                offset: 0,
            },
            Some(Box::new(move |t: &mut FileTask, _: &Series| {
                write_tx.send((t.state(), t.retval(), Vec::new())).unwrap();
            })),
        );
        let read = FileTask::new(
            executor.clone(),
            queue,
            file,
            FileOp::Read { len: 64, offset: 6 },
            Some(Box::new(move |t: &mut FileTask, _: &Series| {
                tx.send((t.state(), t.retval(), t.take_data())).unwrap();
            })),
        );
        let series = SeriesWork::new(write, None);
        series.push_back(read);
        series.start();

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout).unwrap(), (TaskState::Success, 10, Vec::new()));
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            (TaskState::Success, 4, b"file".to_vec())
        );
        executor.shutdown();
    }

    #[test]
    fn test_write_to_read_only_file_fails() {
        let executor = Arc::new(Executor::new(1).unwrap());
        let path = tempfile::NamedTempFile::new().unwrap();
        let file = Arc::new(File::open(path.path()).unwrap());
        let (tx, rx) = mpsc::channel();
        let task = FileTask::new(
            executor.clone(),
            ExecQueue::new(),
            file,
            FileOp::Write {
                data: Bytes::from_static(b"x"),
                offset: 0,
            },
            Some(Box::new(move |t: &mut FileTask, _: &Series| {
                tx.send(t.status()).unwrap();
            })),
        );
        SeriesWork::start_with(task, None);
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            TaskStatus::sys_error(libc::EBADF)
        );
        executor.shutdown();
    }
}
