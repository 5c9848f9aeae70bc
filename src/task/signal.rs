/*!
 * Signal Tasks
 *
 * Barrier tasks that complete when an outside party signals them rather
 * than when some I/O finishes:
 *
 * - counter: after a fixed number of `count` calls
 * - mailbox: after a fixed number of messages were posted
 * - selector: on the first non-empty submission among N candidates
 * - conditional: once armed, releasing a wrapped task into the series
 *
 * The task parks itself in a shared cell at dispatch. Dispatch and signal
 * each set one flag bit; whichever side finds the other bit already set
 * resumes the series, so the resumption happens exactly once no matter
 * which side comes first.
 */

use super::{Callback, Task, TaskStatus};
use crate::workflow::{subtask_done, BoxTask, Series, SubTask};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

const DISPATCHED: u8 = 1;
const SIGNALED: u8 = 2;

pub type Message = Box<dyn Any + Send>;

enum SignalKind {
    Counter { remaining: AtomicUsize },
    Mailbox { remaining: AtomicUsize },
    Selector { nleft: AtomicUsize, decided: AtomicBool },
    Conditional { armed: AtomicBool },
}

impl SignalKind {
    fn name(&self) -> &'static str {
        match self {
            Self::Counter { .. } => "counter",
            Self::Mailbox { .. } => "mailbox",
            Self::Selector { .. } => "selector",
            Self::Conditional { .. } => "conditional",
        }
    }
}

struct SignalCell {
    kind: SignalKind,
    flags: AtomicU8,
    messages: Mutex<Vec<Message>>,
    parked: Mutex<Option<(BoxTask, Series)>>,
}

impl SignalCell {
    fn new(kind: SignalKind, presignaled: bool) -> Arc<Self> {
        Arc::new(Self {
            kind,
            flags: AtomicU8::new(if presignaled { SIGNALED } else { 0 }),
            messages: Mutex::new(Vec::new()),
            parked: Mutex::new(None),
        })
    }

    fn park(&self, task: BoxTask, series: Series) {
        *self.parked.lock() = Some((task, series));
        if self.flags.fetch_or(DISPATCHED, Ordering::AcqRel) & SIGNALED != 0 {
            self.resume();
        }
    }

    fn signal(&self) {
        if self.flags.fetch_or(SIGNALED, Ordering::AcqRel) & DISPATCHED != 0 {
            self.resume();
        }
    }

    fn resume(&self) {
        let parked = self.parked.lock().take();
        if let Some((task, series)) = parked {
            subtask_done(task, series);
        }
    }

    fn is_signaled(&self) -> bool {
        self.flags.load(Ordering::Acquire) & SIGNALED != 0
    }

    /// Decrement a countdown; true for the call that reached zero
    fn countdown(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok_and(|prev| prev == 1)
    }
}

/// Task resumed by an outside signal
pub struct SignalTask {
    cell: Arc<SignalCell>,
    wrapped: Option<BoxTask>,
    status: TaskStatus,
    callback: Option<Callback<SignalTask>>,
}

impl SignalTask {
    fn build(cell: Arc<SignalCell>, wrapped: Option<BoxTask>, callback: Option<Callback<SignalTask>>) -> Box<Self> {
        Box::new(Self {
            cell,
            wrapped,
            status: TaskStatus::default(),
            callback,
        })
    }

    /// Completes after `target` calls to [`CounterHandle::count`]
    pub fn counter(target: usize, callback: Option<Callback<SignalTask>>) -> (Box<Self>, CounterHandle) {
        let cell = SignalCell::new(
            SignalKind::Counter {
                remaining: AtomicUsize::new(target),
            },
            target == 0,
        );
        (Self::build(cell.clone(), None, callback), CounterHandle { cell })
    }

    /// Completes once `size` messages were posted
    pub fn mailbox(size: usize, callback: Option<Callback<SignalTask>>) -> (Box<Self>, MailboxHandle) {
        let cell = SignalCell::new(
            SignalKind::Mailbox {
                remaining: AtomicUsize::new(size),
            },
            size == 0,
        );
        (Self::build(cell.clone(), None, callback), MailboxHandle { cell })
    }

    /// Completes on the first message among `candidates` submissions, or
    /// with `ENOMSG` once every candidate submitted nothing
    pub fn selector(candidates: usize, callback: Option<Callback<SignalTask>>) -> (Box<Self>, SelectorHandle) {
        let cell = SignalCell::new(
            SignalKind::Selector {
                nleft: AtomicUsize::new(candidates),
                decided: AtomicBool::new(candidates == 0),
            },
            candidates == 0,
        );
        (Self::build(cell.clone(), None, callback), SelectorHandle { cell })
    }

    /// Holds `task` back until signaled, then lets it run next in the series
    pub fn conditional(task: BoxTask, callback: Option<Callback<SignalTask>>) -> (Box<Self>, ConditionalHandle) {
        let cell = SignalCell::new(
            SignalKind::Conditional {
                armed: AtomicBool::new(false),
            },
            false,
        );
        (Self::build(cell.clone(), Some(task), callback), ConditionalHandle { cell })
    }

    pub fn kind(&self) -> &'static str {
        self.cell.kind.name()
    }

    pub fn set_callback(&mut self, callback: Callback<SignalTask>) {
        self.callback = Some(callback);
    }

    pub fn message_count(&self) -> usize {
        self.cell.messages.lock().len()
    }

    /// Remove the first message if it is a `T`
    pub fn take_message<T: Any + Send>(&mut self) -> Option<T> {
        let mut messages = self.cell.messages.lock();
        if !messages.first().is_some_and(|m| m.is::<T>()) {
            return None;
        }
        messages.remove(0).downcast::<T>().ok().map(|m| *m)
    }

    /// Every message in posting order
    pub fn take_messages(&mut self) -> Vec<Message> {
        std::mem::take(&mut *self.cell.messages.lock())
    }

    fn final_status(&self) -> TaskStatus {
        match &self.cell.kind {
            SignalKind::Selector { .. } if self.cell.messages.lock().is_empty() => TaskStatus::sys_error(libc::ENOMSG),
            _ => TaskStatus::success(),
        }
    }
}

impl Task for SignalTask {
    fn status(&self) -> TaskStatus {
        self.status
    }
}

impl SubTask for SignalTask {
    fn dispatch(mut self: Box<Self>, series: Series) {
        if let Some(task) = self.wrapped.take() {
            series.push_front(task);
        }
        let cell = self.cell.clone();
        cell.park(self, series);
    }

    fn done(mut self: Box<Self>, series: &Series) -> Option<BoxTask> {
        self.status = self.final_status();
        if let Some(callback) = self.callback.take() {
            callback(&mut self, series);
        }
        series.pop()
    }
}

impl std::fmt::Debug for SignalTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalTask")
            .field("kind", &self.kind())
            .field("signaled", &self.cell.is_signaled())
            .field("status", &self.status)
            .finish()
    }
}

// =============================================================================
// HANDLES
// =============================================================================

#[derive(Clone)]
pub struct CounterHandle {
    cell: Arc<SignalCell>,
}

impl CounterHandle {
    /// Returns true for the call that completed the counter
    pub fn count(&self) -> bool {
        let SignalKind::Counter { remaining } = &self.cell.kind else {
            return false;
        };
        if !SignalCell::countdown(remaining) {
            return false;
        }
        self.cell.signal();
        true
    }

    pub fn remaining(&self) -> usize {
        match &self.cell.kind {
            SignalKind::Counter { remaining } => remaining.load(Ordering::Acquire),
            _ => 0,
        }
    }
}

#[derive(Clone)]
pub struct MailboxHandle {
    cell: Arc<SignalCell>,
}

impl MailboxHandle {
    /// Post one message; false if the mailbox is already full
    pub fn send<T: Any + Send>(&self, message: T) -> bool {
        let SignalKind::Mailbox { remaining } = &self.cell.kind else {
            return false;
        };
        {
            let mut messages = self.cell.messages.lock();
            if remaining.load(Ordering::Acquire) == 0 {
                return false;
            }
            messages.push(Box::new(message));
            if !SignalCell::countdown(remaining) {
                return true;
            }
        }
        self.cell.signal();
        true
    }
}

#[derive(Clone)]
pub struct SelectorHandle {
    cell: Arc<SignalCell>,
}

impl SelectorHandle {
    /// Offer one candidate result; `None` means this candidate has nothing.
    /// Returns true if this submission won.
    pub fn submit<T: Any + Send>(&self, message: Option<T>) -> bool {
        let SignalKind::Selector { nleft, decided } = &self.cell.kind else {
            return false;
        };
        let mut won = false;
        if let Some(message) = message {
            if !decided.swap(true, Ordering::AcqRel) {
                self.cell.messages.lock().push(Box::new(message));
                won = true;
            }
        }

        let last = SignalCell::countdown(nleft);
        let empty_finish = last && !won && !decided.swap(true, Ordering::AcqRel);
        if won || empty_finish {
            self.cell.signal();
        }
        won
    }
}

#[derive(Clone)]
pub struct ConditionalHandle {
    cell: Arc<SignalCell>,
}

impl ConditionalHandle {
    /// Arm the conditional, optionally leaving a message; later calls are
    /// ignored and return false
    pub fn signal<T: Any + Send>(&self, message: Option<T>) -> bool {
        let SignalKind::Conditional { armed } = &self.cell.kind else {
            return false;
        };
        if armed.swap(true, Ordering::AcqRel) {
            return false;
        }
        if let Some(message) = message {
            self.cell.messages.lock().push(Box::new(message));
        }
        self.cell.signal();
        true
    }
}
