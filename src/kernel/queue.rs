/*!
 * Work Queue
 *
 * Thread-safe FIFO built from two alternating buffers. Producers append to
 * the put buffer under the put lock; consumers drain the get buffer under
 * the get lock and only touch the put lock to swap the buffers once the get
 * buffer runs dry. Lock hold time is O(1) regardless of queue depth.
 *
 * # Ordering
 *
 * `put` is FIFO. `put_head` is relaxed: when the get buffer is non-empty
 * and its lock is free the message is spliced in front of it, otherwise it
 * goes to the front of the put buffer, behind anything already swapped out
 * to a consumer.
 */

use crate::core::limits::UNBOUNDED_QUEUE;
use crate::core::QueueError;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Dual-buffer work queue
pub struct WorkQueue<T> {
    /// Advisory limit on the put buffer, 0 means unbounded
    msg_max: usize,
    nonblock: AtomicBool,
    get_list: Mutex<VecDeque<T>>,
    /// Length of the get buffer, only written under the get lock
    get_len: AtomicUsize,
    put_list: Mutex<VecDeque<T>>,
    get_cond: Condvar,
    put_cond: Condvar,
}

impl<T> WorkQueue<T> {
    pub fn new(msg_max: usize) -> Self {
        Self {
            msg_max,
            nonblock: AtomicBool::new(false),
            get_list: Mutex::new(VecDeque::new()),
            get_len: AtomicUsize::new(0),
            put_list: Mutex::new(VecDeque::new()),
            get_cond: Condvar::new(),
            put_cond: Condvar::new(),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(UNBOUNDED_QUEUE)
    }

    #[inline]
    fn is_full(&self, len: usize) -> bool {
        self.msg_max != UNBOUNDED_QUEUE && len >= self.msg_max
    }

    #[inline]
    pub fn is_nonblock(&self) -> bool {
        self.nonblock.load(Ordering::Acquire)
    }

    /// Wake every waiter; subsequent gets on an empty queue return `None`
    /// and puts no longer wait for space
    pub fn set_nonblock(&self) {
        self.nonblock.store(true, Ordering::Release);
        let _put = self.put_list.lock();
        self.get_cond.notify_one();
        self.put_cond.notify_all();
    }

    pub fn set_block(&self) {
        self.nonblock.store(false, Ordering::Release);
    }

    /// Append to the tail, waiting for space when bounded
    pub fn put(&self, msg: T) {
        let mut put = self.put_list.lock();
        while self.is_full(put.len()) && !self.is_nonblock() {
            self.put_cond.wait(&mut put);
        }

        put.push_back(msg);
        drop(put);
        self.get_cond.notify_one();
    }

    /// Insert ahead of queued messages
    pub fn put_head(&self, msg: T) {
        let mut put = self.put_list.lock();

        // Fast path: splice straight into the consumer side. The consumer
        // never waits on the put lock while its buffer is non-empty, so
        // spinning on try_lock here cannot deadlock.
        while self.get_len.load(Ordering::Acquire) > 0 {
            if let Some(mut get) = self.get_list.try_lock() {
                if get.is_empty() {
                    break;
                }
                drop(put);
                get.push_front(msg);
                self.get_len.store(get.len(), Ordering::Release);
                return;
            }
            std::hint::spin_loop();
        }

        while self.is_full(put.len()) && !self.is_nonblock() {
            self.put_cond.wait(&mut put);
        }

        put.push_front(msg);
        drop(put);
        self.get_cond.notify_one();
    }

    /// Swap buffers, waiting until a message exists unless non-blocking
    fn swap(&self, get: &mut VecDeque<T>) -> usize {
        let mut put = self.put_list.lock();
        while put.is_empty() && !self.is_nonblock() {
            self.get_cond.wait(&mut put);
        }

        let count = put.len();
        if self.is_full(count) {
            self.put_cond.notify_all();
        }

        std::mem::swap(get, &mut *put);
        count
    }

    /// Pop the next message, blocking while empty unless non-blocking
    pub fn get(&self) -> Option<T> {
        let mut get = self.get_list.lock();
        if get.is_empty() && self.swap(&mut get) == 0 {
            return None;
        }

        let msg = get.pop_front();
        self.get_len.store(get.len(), Ordering::Release);
        msg
    }

    /// Pop without waiting
    pub fn try_get(&self) -> Result<T, QueueError> {
        let mut get = self.get_list.lock();
        if get.is_empty() {
            let mut put = self.put_list.lock();
            if put.is_empty() {
                return Err(QueueError::Empty);
            }
            if self.is_full(put.len()) {
                self.put_cond.notify_all();
            }
            std::mem::swap(&mut *get, &mut *put);
        }

        let msg = get.pop_front().ok_or(QueueError::Empty)?;
        self.get_len.store(get.len(), Ordering::Release);
        Ok(msg)
    }

    /// Approximate number of queued messages
    pub fn len(&self) -> usize {
        self.get_len.load(Ordering::Acquire) + self.put_list.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
