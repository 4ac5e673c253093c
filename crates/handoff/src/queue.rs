//! Thread-safe FIFO for passing owned handles between threads.
//!
//! The queue never bounds itself: `put` always succeeds while the queue is
//! open, and bounding is left to callers that check [`HandoffQueue::len`].
//! Closing wakes every blocked `get` with the shutdown sentinel (`None`) and
//! hands back whatever was still queued so the caller can release it.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Result of a non-blocking or deadline-bounded dequeue.
#[derive(Debug, PartialEq, Eq)]
pub enum Dequeue<T> {
    Item(T),
    /// Nothing arrived before the deadline (or immediately, for `try_get`).
    Empty,
    /// The queue was closed.
    Closed,
}

impl<T> Dequeue<T> {
    pub fn into_item(self) -> Option<T> {
        match self {
            Self::Item(item) => Some(item),
            Self::Empty | Self::Closed => None,
        }
    }
}

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
    waiters: usize,
}

pub struct HandoffQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Condvar,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    /// An empty, open queue.
    pub fn new() -> Self {
        Self::with_state(false)
    }

    /// A queue that rejects `put` until [`HandoffQueue::reopen`] is called.
    pub fn closed() -> Self {
        Self::with_state(true)
    }

    fn with_state(closed: bool) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed,
                waiters: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Appends `item`. Never blocks; hands the item back if the queue is closed.
    pub fn put(&self, item: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(item);
        }
        inner.items.push_back(item);
        let wake = inner.waiters > 0;
        drop(inner);
        if wake {
            self.available.notify_one();
        }
        Ok(())
    }

    /// Blocks until an item is available. `None` means the queue was closed.
    pub fn get(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return None;
            }
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            inner.waiters += 1;
            self.available.wait(&mut inner);
            inner.waiters -= 1;
        }
    }

    /// Like [`HandoffQueue::get`], but gives up after `timeout`.
    pub fn get_timeout(&self, timeout: Duration) -> Dequeue<T> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if inner.closed {
                return Dequeue::Closed;
            }
            if let Some(item) = inner.items.pop_front() {
                return Dequeue::Item(item);
            }
            inner.waiters += 1;
            let timed_out = self.available.wait_until(&mut inner, deadline).timed_out();
            inner.waiters -= 1;
            if timed_out {
                if inner.closed {
                    return Dequeue::Closed;
                }
                return match inner.items.pop_front() {
                    Some(item) => Dequeue::Item(item),
                    None => Dequeue::Empty,
                };
            }
        }
    }

    /// Pops the oldest item without waiting.
    pub fn try_get(&self) -> Dequeue<T> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Dequeue::Closed;
        }
        match inner.items.pop_front() {
            Some(item) => Dequeue::Item(item),
            None => Dequeue::Empty,
        }
    }

    /// Current depth. Advisory: may be stale as soon as it returns.
    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Threads currently blocked in `get`/`get_timeout`.
    pub fn waiters(&self) -> usize {
        self.inner.lock().waiters
    }

    /// True once closed, until [`HandoffQueue::reopen`].
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Closes the queue, wakes all waiters and returns the undelivered items
    /// in arrival order.
    pub fn close(&self) -> Vec<T> {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let drained: Vec<T> = inner.items.drain(..).collect();
        drop(inner);
        self.available.notify_all();
        drained
    }

    /// Accepts items again. The queue is empty: `close` drained it.
    pub fn reopen(&self) {
        self.inner.lock().closed = false;
    }
}
