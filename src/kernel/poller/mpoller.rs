/*!
 * Multi-Shard Poller
 *
 * Fans registrations out over several poller shards sharing one node
 * table. A descriptor always lands on shard `fd % n`; timers are spread
 * round robin. Creation and start are all-or-nothing.
 */

use super::shard::{NodeTable, Poller};
use super::types::*;
use crate::core::{PollerError, TimeoutMs};
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct MPoller<H: PollerHandler> {
    shards: Vec<Arc<Poller<H>>>,
    next_timer: AtomicUsize,
}

impl<H: PollerHandler> MPoller<H> {
    pub fn new(nthreads: usize, max_open_files: usize, handler: Arc<H>) -> Result<Self, PollerError> {
        let nthreads = nthreads.max(1);
        let table = Arc::new(NodeTable::new(max_open_files));

        // A failure drops the shards created so far, closing their fds
        let shards = (0..nthreads)
            .map(|index| Poller::with_table(index, nthreads, table.clone(), handler.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            shards,
            next_timer: AtomicUsize::new(0),
        })
    }

    /// Start every shard, or none of them
    pub fn start(&self) -> Result<(), PollerError> {
        for (started, shard) in self.shards.iter().enumerate() {
            if let Err(e) = shard.start() {
                warn!(shard = started, error = %e, "Poller shard failed to start, rolling back");
                for shard in &self.shards[..started] {
                    shard.stop();
                }
                return Err(e);
            }
        }
        info!(shards = self.shards.len(), "Multiplexer started");
        Ok(())
    }

    pub fn stop(&self) {
        for shard in &self.shards {
            shard.stop();
        }
    }

    pub fn threads(&self) -> usize {
        self.shards.len()
    }

    #[inline]
    fn shard(&self, fd: RawFd) -> &Arc<Poller<H>> {
        &self.shards[fd.rem_euclid(self.shards.len() as RawFd) as usize]
    }

    pub fn add(&self, data: PollerData<H::Context>, timeout: TimeoutMs) -> Result<(), PollerError> {
        self.shard(data.fd).add(data, timeout)
    }

    pub fn modify(&self, data: PollerData<H::Context>, timeout: TimeoutMs) -> Result<(), PollerError> {
        self.shard(data.fd).modify(data, timeout)
    }

    pub fn del(&self, fd: RawFd) -> Result<(), PollerError> {
        self.shard(fd).del(fd)
    }

    pub fn set_timeout(&self, fd: RawFd, timeout: TimeoutMs) -> Result<(), PollerError> {
        self.shard(fd).set_timeout(fd, timeout)
    }

    pub fn add_timer(&self, after: Duration, context: H::Context) -> TimerHandle {
        let index = self.next_timer.fetch_add(1, Ordering::Relaxed) % self.shards.len();
        self.shards[index].add_timer(after, context)
    }

    pub fn del_timer(&self, handle: &TimerHandle) -> bool {
        self.shards
            .get(handle.shard)
            .map(|shard| shard.del_timer(handle))
            .unwrap_or(false)
    }
}
