//! Consumers pull work items from their buffer port, get them processed and put results back.

use crate::item::{Payload, WorkItem};
use crate::port::BufferPort;
use crate::queue::PushError;
use crate::utils::{Environment, GenericResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

mod threaded;
pub use self::threaded::ThreadPoolConsumer;

/// A capability to process work items enrolled with the broker.
pub trait Consumer<T: Payload>: Send + Sync {
    /// Returns a human readable name used in logs.
    fn name(&self) -> String;

    /// Starts consumer's own processing resources. Must return without blocking on processing.
    fn run(&self, context: ConsumerContext<T>) -> GenericResult<()>;

    /// Requests consumer to stop and waits until its processing resources are released.
    /// Must be idempotent.
    fn stop(&self);

    /// Returns true if every item taken from the port is guaranteed to come back, so the
    /// caller can wait for a full return without a timeout.
    fn is_full_return_capable(&self) -> bool;
}

/// Keeps everything a consumer needs to exchange items with the broker.
pub struct ConsumerContext<T> {
    /// A buffer port created for this consumer.
    pub port: Arc<BufferPort<T>>,
    /// A cooperative stop flag raised by the broker on shutdown.
    pub is_stopped: Arc<AtomicBool>,
    /// An environment.
    pub environment: Arc<Environment>,
    /// A maximum time a blocking queue operation waits before stop flag is checked again.
    pub poll_interval: Duration,
    local_stop: Arc<AtomicBool>,
}

impl<T> Clone for ConsumerContext<T> {
    fn clone(&self) -> Self {
        Self {
            port: self.port.clone(),
            is_stopped: self.is_stopped.clone(),
            environment: self.environment.clone(),
            poll_interval: self.poll_interval,
            local_stop: self.local_stop.clone(),
        }
    }
}

impl<T> ConsumerContext<T> {
    /// Creates a new instance of `ConsumerContext`.
    pub fn new(
        port: Arc<BufferPort<T>>,
        is_stopped: Arc<AtomicBool>,
        environment: Arc<Environment>,
        poll_interval: Duration,
    ) -> Self {
        Self { port, is_stopped, environment, poll_interval, local_stop: Arc::new(AtomicBool::new(false)) }
    }

    /// Returns true if either the broker or the consumer itself has requested to stop.
    pub fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::Acquire) || self.local_stop.load(Ordering::Acquire)
    }

    /// Stops this consumer only. Its clones observe the request too.
    pub fn request_stop(&self) {
        self.local_stop.store(true, Ordering::Release)
    }

    /// Puts item into processed queue retrying timed pushes until it succeeds or consumer is stopped.
    /// Returns false if item could not be returned.
    pub fn return_item(&self, item: WorkItem<T>) -> bool {
        let mut item = item;

        loop {
            match self.port.push_processed_timeout(item, self.poll_interval) {
                Ok(_) => return true,
                Err(PushError::TimeOut(rejected)) if !self.is_stopped() => item = rejected,
                Err(PushError::TimeOut(rejected)) | Err(PushError::Closed(rejected)) => {
                    self.log(&format!("cannot return item {:?}: port {} is closed", rejected.id(), self.port.id()));
                    return false;
                }
            }
        }
    }

    /// Writes a message to the log.
    pub fn log(&self, message: &str) {
        (self.environment.logger)(message)
    }
}
