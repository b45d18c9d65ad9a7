//! A buffer port couples "raw" and "processed" queues of one consumer registration.

#[cfg(test)]
#[path = "../tests/unit/port_test.rs"]
mod port_test;

use crate::item::WorkItem;
use crate::queue::{BoundedQueue, PopError, PushError};
use std::time::Duration;

/// An id of the buffer port.
pub type PortId = usize;

/// Decouples a consumer's pace from the broker: items to be processed are taken from the raw
/// queue, results are put into the processed one.
pub struct BufferPort<T> {
    id: PortId,
    raw: BoundedQueue<WorkItem<T>>,
    processed: BoundedQueue<WorkItem<T>>,
}

impl<T> BufferPort<T> {
    /// Creates a new instance of `BufferPort` with both queues of given capacity.
    pub fn new(id: PortId, capacity: usize) -> Self {
        Self { id, raw: BoundedQueue::new(capacity), processed: BoundedQueue::new(capacity) }
    }

    /// Returns port id.
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Puts an item to be processed, waiting at most `timeout`.
    pub fn push_raw_timeout(&self, item: WorkItem<T>, timeout: Duration) -> Result<(), PushError<WorkItem<T>>> {
        self.raw.push_back_timeout(item, timeout)
    }

    /// Takes the next item to be processed, waiting at most `timeout`.
    pub fn pop_raw_timeout(&self, timeout: Duration) -> Result<WorkItem<T>, PopError> {
        self.raw.pop_front_timeout(timeout)
    }

    /// Puts a processed item, waiting at most `timeout`.
    pub fn push_processed_timeout(
        &self,
        item: WorkItem<T>,
        timeout: Duration,
    ) -> Result<(), PushError<WorkItem<T>>> {
        self.processed.push_back_timeout(item, timeout)
    }

    /// Takes a processed item, waiting at most `timeout`.
    pub fn pop_processed_timeout(&self, timeout: Duration) -> Result<WorkItem<T>, PopError> {
        self.processed.pop_front_timeout(timeout)
    }

    /// Takes a processed item if there is any.
    pub fn try_pop_processed(&self) -> Result<WorkItem<T>, PopError> {
        self.processed.try_pop_front()
    }

    /// Returns amount of free slots in the raw queue.
    pub fn raw_free_capacity(&self) -> usize {
        self.raw.free_capacity()
    }

    /// Returns amount of items waiting for processing.
    pub fn raw_size(&self) -> usize {
        self.raw.size()
    }

    /// Returns amount of items waiting for retrieval.
    pub fn processed_size(&self) -> usize {
        self.processed.size()
    }

    /// Closes both queues waking every blocked caller.
    pub fn close(&self) {
        self.raw.close();
        self.processed.close();
    }

    /// Returns true if port is closed.
    pub fn is_closed(&self) -> bool {
        self.raw.is_closed()
    }

    /// Removes all items which are still waiting for processing.
    pub fn drain_raw(&self) -> Vec<WorkItem<T>> {
        self.raw.drain()
    }
}
