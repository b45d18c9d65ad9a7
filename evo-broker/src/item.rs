//! Contains a work item: a candidate solution with bookkeeping needed to route it through the broker.

#[cfg(test)]
#[path = "../tests/unit/item_test.rs"]
mod item_test;

use crate::utils::{GenericResult, Timer};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

/// A candidate solution which knows how to evaluate itself.
pub trait Payload: Send + 'static {
    /// Computes and stores a result (e.g. fitness) in place.
    fn process(&mut self) -> GenericResult<()>;
}

/// Identifies a work item within the broker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId {
    /// A broker wide unique id of the submission batch.
    pub submission_id: u64,
    /// A position of the item inside its submission batch.
    pub position_id: usize,
}

impl Display for ItemId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.submission_id, self.position_id)
    }
}

/// Specifies processing state of the work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ProcessingStatus {
    /// Item still needs to be processed.
    Pending,
    /// Item has been processed successfully.
    Processed,
    /// Processing has failed with given reason.
    Failed(String),
}

/// A unit of work submitted to the broker.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem<T> {
    id: Option<ItemId>,
    status: ProcessingStatus,
    processing_time: Option<Duration>,
    misses: usize,
    payload: T,
}

impl<T> WorkItem<T> {
    /// Creates a new unevaluated work item.
    pub fn new(payload: T) -> Self {
        Self { id: None, status: ProcessingStatus::Pending, processing_time: None, misses: 0, payload }
    }

    /// Returns an id assigned by the broker, if any.
    pub fn id(&self) -> Option<ItemId> {
        self.id
    }

    /// Assigns an id. Called by the broker at submission time.
    pub(crate) fn assign_id(&mut self, id: ItemId) {
        self.id = Some(id);
    }

    /// Returns processing status.
    pub fn status(&self) -> &ProcessingStatus {
        &self.status
    }

    /// Returns true if item is not processed yet.
    pub fn is_pending(&self) -> bool {
        self.status == ProcessingStatus::Pending
    }

    /// Returns true if item has been processed successfully.
    pub fn is_processed(&self) -> bool {
        self.status == ProcessingStatus::Processed
    }

    /// Returns true if processing has failed.
    pub fn has_errors(&self) -> bool {
        matches!(self.status, ProcessingStatus::Failed(_))
    }

    /// Marks item as failed.
    pub fn mark_failed(&mut self, reason: String) {
        self.status = ProcessingStatus::Failed(reason);
    }

    /// Resets item to pending state, so it can be evaluated again.
    pub fn reset(&mut self) {
        self.status = ProcessingStatus::Pending;
        self.processing_time = None;
        self.misses = 0;
    }

    /// Returns time spent inside `process` call.
    pub fn processing_time(&self) -> Option<Duration> {
        self.processing_time
    }

    /// Returns how many times the item was submitted without returning back.
    pub fn misses(&self) -> usize {
        self.misses
    }

    pub(crate) fn add_miss(&mut self) -> usize {
        self.misses += 1;
        self.misses
    }

    /// Returns payload.
    pub fn payload(&self) -> &T {
        &self.payload
    }

    /// Returns mutable payload.
    pub fn payload_mut(&mut self) -> &mut T {
        &mut self.payload
    }

    /// Unwraps payload.
    pub fn into_payload(self) -> T {
        self.payload
    }
}

impl<T: Payload> WorkItem<T> {
    /// Processes the payload unless it is already processed. A failure or a panic inside payload
    /// evaluation is converted to the `Failed` status, so caller never observes it directly.
    pub fn process(&mut self) -> &ProcessingStatus {
        if !self.is_pending() {
            return &self.status;
        }

        let payload = &mut self.payload;
        let (result, duration) = Timer::measure_duration(|| catch_unwind(AssertUnwindSafe(|| payload.process())));

        self.processing_time = Some(duration);
        self.status = match result {
            Ok(Ok(_)) => ProcessingStatus::Processed,
            Ok(Err(err)) => ProcessingStatus::Failed(err.to_string()),
            Err(panic) => ProcessingStatus::Failed(format!("panic during processing: {}", describe_panic(&*panic))),
        };

        &self.status
    }
}

pub(crate) fn describe_panic(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|msg| msg.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown".to_string())
}
