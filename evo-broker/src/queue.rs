//! A fixed capacity, thread safe FIFO queue with blocking and timed operations.

#[cfg(test)]
#[path = "../tests/unit/queue_test.rs"]
mod queue_test;

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// A default queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// An error returned by push operations. Holds back the item which was not inserted.
#[derive(Debug, PartialEq, Eq)]
pub enum PushError<T> {
    /// Queue stayed full during the whole timeout.
    TimeOut(T),
    /// Queue has been closed.
    Closed(T),
}

impl<T> PushError<T> {
    /// Returns the item which was not inserted.
    pub fn into_inner(self) -> T {
        match self {
            PushError::TimeOut(item) | PushError::Closed(item) => item,
        }
    }
}

/// An error returned by pop operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PopError {
    /// Queue stayed empty during the whole timeout.
    TimeOut,
    /// Queue has been closed and drained.
    Closed,
}

struct QueueState<T> {
    items: VecDeque<T>,
    is_closed: bool,
}

/// A bounded multi producer, multi consumer queue.
///
/// Closing the queue wakes every blocked caller: pushers get their item back with
/// `PushError::Closed`, poppers get remaining items first and then `PopError::Closed`.
pub struct BoundedQueue<T> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
}

impl<T> BoundedQueue<T> {
    /// Creates a new instance of `BoundedQueue`. Zero capacity is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);

        Self {
            state: Mutex::new(QueueState { items: VecDeque::with_capacity(capacity.min(1024)), is_closed: false }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
        }
    }

    /// Inserts item at the tail, blocking while queue is full.
    pub fn push_back(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();

        while !state.is_closed && state.items.len() >= self.capacity {
            state = self.not_full.wait(state).unwrap_or_else(|err| err.into_inner());
        }

        self.insert(state, item)
    }

    /// Inserts item at the tail, waiting at most `timeout` for free space.
    pub fn push_back_timeout(&self, item: T, timeout: Duration) -> Result<(), PushError<T>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        while !state.is_closed && state.items.len() >= self.capacity {
            let now = Instant::now();
            if now >= deadline {
                return Err(PushError::TimeOut(item));
            }

            state = self.not_full.wait_timeout(state, deadline - now).unwrap_or_else(|err| err.into_inner()).0;
        }

        self.insert(state, item)
    }

    /// Inserts item at the tail if there is a free space.
    pub fn try_push_back(&self, item: T) -> Result<(), PushError<T>> {
        let state = self.lock();

        if !state.is_closed && state.items.len() >= self.capacity {
            return Err(PushError::TimeOut(item));
        }

        self.insert(state, item)
    }

    /// Removes item from the head, blocking while queue is empty.
    pub fn pop_front(&self) -> Result<T, PopError> {
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }

            if state.is_closed {
                return Err(PopError::Closed);
            }

            state = self.not_empty.wait(state).unwrap_or_else(|err| err.into_inner());
        }
    }

    /// Removes item from the head, waiting at most `timeout` for it.
    pub fn pop_front_timeout(&self, timeout: Duration) -> Result<T, PopError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();

        loop {
            if let Some(item) = state.items.pop_front() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }

            if state.is_closed {
                return Err(PopError::Closed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(PopError::TimeOut);
            }

            state = self.not_empty.wait_timeout(state, deadline - now).unwrap_or_else(|err| err.into_inner()).0;
        }
    }

    /// Removes item from the head if there is any.
    pub fn try_pop_front(&self) -> Result<T, PopError> {
        self.pop_front_timeout(Duration::ZERO)
    }

    /// Closes the queue and wakes all waiters. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        state.is_closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    /// Returns true if queue was closed.
    pub fn is_closed(&self) -> bool {
        self.lock().is_closed
    }

    /// Removes all remaining items.
    pub fn drain(&self) -> Vec<T> {
        let items = self.lock().items.drain(..).collect();
        self.not_full.notify_all();

        items
    }

    /// Returns queue capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns amount of items in the queue. Advisory under concurrency.
    pub fn size(&self) -> usize {
        self.lock().items.len()
    }

    /// Returns true if queue has no items. Advisory under concurrency.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Returns amount of free slots. Advisory under concurrency.
    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.size())
    }

    fn insert(&self, mut state: MutexGuard<'_, QueueState<T>>, item: T) -> Result<(), PushError<T>> {
        if state.is_closed {
            return Err(PushError::Closed(item));
        }

        state.items.push_back(item);
        drop(state);
        self.not_empty.notify_one();

        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        // NOTE queue state stays consistent even if a holder panicked: all mutations are single calls
        self.state.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl<T> Default for BoundedQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}
