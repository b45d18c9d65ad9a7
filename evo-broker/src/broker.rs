//! The broker is a many-to-many rendezvous between producers of work items (executors) and
//! consumers which process them.
//!
//! Each enrolled consumer gets its own buffer port. Submitted items are spread over ports,
//! processed items are collected back from all of them and routed by submission id to the
//! collector which has submitted them.

#[cfg(test)]
#[path = "../tests/unit/broker_test.rs"]
mod broker_test;

use crate::consumer::{Consumer, ConsumerContext};
use crate::item::{ItemId, Payload, WorkItem};
use crate::port::{BufferPort, PortId};
use crate::queue::{BoundedQueue, DEFAULT_QUEUE_CAPACITY, PopError, PushError};
use crate::utils::{BrokerError, BrokerResult, Environment};
use rustc_hash::FxHashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

/// An id of the collector which receives processed items of its own submissions.
pub type CollectorId = usize;

/// Specifies broker settings.
#[derive(Clone, Debug)]
pub struct BrokerSettings {
    /// A capacity of every raw, processed and collector queue.
    pub queue_capacity: usize,
    /// A maximum time any blocking operation waits before the stop flag is checked again.
    pub poll_interval: Duration,
    /// A time given to put one item into a full port before it is rejected.
    pub submit_timeout: Duration,
    /// How many latest submissions of one collector keep their routes. Items of older
    /// submissions are discarded on return.
    pub route_history: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            poll_interval: Duration::from_millis(10),
            submit_timeout: Duration::from_millis(100),
            route_history: 64,
        }
    }
}

/// Specifies broker lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BrokerState {
    /// Broker is created, but does not accept consumers or items yet.
    Uninitialized,
    /// Broker accepts consumers and items.
    Open,
    /// Broker is stopping its consumers.
    ShuttingDown,
    /// Broker is stopped.
    Closed,
}

/// A result of one submission.
#[derive(Debug)]
pub struct Submission<T> {
    /// A submission id assigned to every accepted item.
    pub id: u64,
    /// Amount of items put into ports.
    pub submitted: usize,
    /// Items which could not be put into any port within submit timeout. They keep their ids.
    pub rejected: Vec<WorkItem<T>>,
}

struct Enrolment<T: Payload> {
    consumer: Arc<dyn Consumer<T>>,
    port: Arc<BufferPort<T>>,
}

struct Registry<T: Payload> {
    state: BrokerState,
    enrolments: Vec<Enrolment<T>>,
}

/// Keeps processed items of one collector. Items which do not fit into the bounded outbox wait
/// in the overflow, so routing never loses them.
struct Mailbox<T> {
    outbox: Arc<BoundedQueue<WorkItem<T>>>,
    overflow: VecDeque<WorkItem<T>>,
    submissions: VecDeque<u64>,
}

impl<T> Mailbox<T> {
    fn new(capacity: usize) -> Self {
        Self { outbox: Arc::new(BoundedQueue::new(capacity)), overflow: VecDeque::new(), submissions: VecDeque::new() }
    }

    fn deliver(&mut self, item: WorkItem<T>) {
        if !self.overflow.is_empty() {
            self.overflow.push_back(item);
            return;
        }

        if let Err(PushError::TimeOut(item)) = self.outbox.try_push_back(item) {
            self.overflow.push_back(item);
        }
    }

    /// Takes the oldest overflow item and moves the rest into the outbox while it has room.
    fn take_overflow(&mut self) -> Option<WorkItem<T>> {
        let item = self.overflow.pop_front()?;

        while let Some(next) = self.overflow.pop_front() {
            if let Err(PushError::TimeOut(next) | PushError::Closed(next)) = self.outbox.try_push_back(next) {
                self.overflow.push_front(next);
                break;
            }
        }

        Some(item)
    }
}

struct Routing<T> {
    mailboxes: FxHashMap<CollectorId, Mailbox<T>>,
    routes: FxHashMap<u64, CollectorId>,
}

/// Distributes work items over enrolled consumers and routes processed items back.
pub struct Broker<T: Payload> {
    settings: BrokerSettings,
    environment: Arc<Environment>,
    is_stopped: Arc<AtomicBool>,
    registry: RwLock<Registry<T>>,
    routing: Mutex<Routing<T>>,
    next_submission: AtomicU64,
    next_collector: AtomicUsize,
    next_port: AtomicUsize,
    cursor: AtomicUsize,
}

impl<T: Payload> Broker<T> {
    /// Creates a new instance of `Broker` in `Uninitialized` state.
    pub fn new(settings: BrokerSettings, environment: Arc<Environment>) -> Self {
        Self {
            settings,
            environment,
            is_stopped: Arc::new(AtomicBool::new(false)),
            registry: RwLock::new(Registry { state: BrokerState::Uninitialized, enrolments: vec![] }),
            routing: Mutex::new(Routing { mailboxes: FxHashMap::default(), routes: FxHashMap::default() }),
            next_submission: AtomicU64::new(0),
            next_collector: AtomicUsize::new(0),
            next_port: AtomicUsize::new(0),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Creates a new broker with default settings which is already open.
    pub fn new_open(environment: Arc<Environment>) -> Self {
        let broker = Self::new(BrokerSettings::default(), environment);
        broker.write_registry().state = BrokerState::Open;

        broker
    }

    /// Starts accepting consumers and items. Calling it on an open broker has no effect.
    pub fn open(&self) -> BrokerResult<()> {
        let mut registry = self.write_registry();

        match registry.state {
            BrokerState::Uninitialized | BrokerState::Open => {
                registry.state = BrokerState::Open;
                Ok(())
            }
            BrokerState::ShuttingDown | BrokerState::Closed => Err(BrokerError::BrokerClosed),
        }
    }

    /// Returns current lifecycle state.
    pub fn state(&self) -> BrokerState {
        self.read_registry().state
    }

    /// Returns broker settings.
    pub fn settings(&self) -> &BrokerSettings {
        &self.settings
    }

    /// Returns environment.
    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    /// Returns amount of enrolled consumers.
    pub fn consumers(&self) -> usize {
        self.read_registry().enrolments.len()
    }

    /// Returns true if every enrolled consumer returns all items it takes.
    pub fn is_full_return_capable(&self) -> bool {
        let registry = self.read_registry();
        !registry.enrolments.is_empty()
            && registry.enrolments.iter().all(|enrolment| enrolment.consumer.is_full_return_capable())
    }

    /// Registers a consumer: creates its buffer port and starts its processing.
    pub fn enrol(&self, consumer: Arc<dyn Consumer<T>>) -> BrokerResult<PortId> {
        let mut registry = self.write_registry();
        Self::ensure_open(registry.state)?;

        let is_enrolled = registry
            .enrolments
            .iter()
            .any(|enrolment| std::ptr::addr_eq(Arc::as_ptr(&enrolment.consumer), Arc::as_ptr(&consumer)));

        if is_enrolled {
            return Err(BrokerError::AlreadyEnrolled(consumer.name()));
        }

        let port_id = self.next_port.fetch_add(1, Ordering::Relaxed);
        let port = Arc::new(BufferPort::new(port_id, self.settings.queue_capacity));

        let context = ConsumerContext::new(
            port.clone(),
            self.is_stopped.clone(),
            self.environment.clone(),
            self.settings.poll_interval,
        );

        if let Err(err) = consumer.run(context) {
            port.close();
            return Err(BrokerError::ConnectionFailure(format!("cannot start '{}': {err}", consumer.name())));
        }

        self.log(&format!("enrolled {} on port {port_id}", consumer.name()));
        registry.enrolments.push(Enrolment { consumer, port });

        Ok(port_id)
    }

    /// Submits items without registering a route: processed items can be received with `retrieve`.
    pub fn submit(&self, items: Vec<WorkItem<T>>) -> BrokerResult<Submission<T>> {
        self.submit_items(None, items)
    }

    /// Submits items on behalf of the collector: processed items are delivered by `retrieve_for`.
    pub fn submit_for(&self, collector: CollectorId, items: Vec<WorkItem<T>>) -> BrokerResult<Submission<T>> {
        self.submit_items(Some(collector), items)
    }

    /// Takes one processed item from any port, bypassing collector routing.
    pub fn retrieve(&self, timeout: Duration) -> BrokerResult<WorkItem<T>> {
        let deadline = Instant::now() + timeout;

        loop {
            let ports = self.ports()?;

            if let Some(item) = ports.iter().find_map(|port| port.try_pop_processed().ok()) {
                return Ok(item);
            }

            let slice = self.next_slice(deadline)?;

            if ports.is_empty() {
                std::thread::sleep(slice);
                continue;
            }

            let port = &ports[self.cursor.fetch_add(1, Ordering::Relaxed) % ports.len()];
            match port.pop_processed_timeout(slice) {
                Ok(item) => return Ok(item),
                Err(PopError::TimeOut) | Err(PopError::Closed) => continue,
            }
        }
    }

    /// Registers a new collector with its own outbox.
    pub fn register_collector(&self) -> BrokerResult<CollectorId> {
        Self::ensure_open(self.state())?;

        let collector = self.next_collector.fetch_add(1, Ordering::Relaxed);
        self.lock_routing().mailboxes.insert(collector, Mailbox::new(self.settings.queue_capacity));

        Ok(collector)
    }

    /// Removes collector with its routes. Items which arrive for it later are discarded.
    pub fn deregister_collector(&self, collector: CollectorId) {
        let mut routing = self.lock_routing();

        if let Some(mailbox) = routing.mailboxes.remove(&collector) {
            mailbox.outbox.close();
            mailbox.submissions.iter().for_each(|submission_id| {
                routing.routes.remove(submission_id);
            });
        }
    }

    /// Takes one processed item which belongs to the collector's submissions. Items of other
    /// collectors met on the way are routed to their outboxes. An unknown collector is reported
    /// as `BrokerClosed`.
    pub fn retrieve_for(&self, collector: CollectorId, timeout: Duration) -> BrokerResult<WorkItem<T>> {
        let outbox = self
            .lock_routing()
            .mailboxes
            .get(&collector)
            .map(|mailbox| mailbox.outbox.clone())
            .ok_or(BrokerError::BrokerClosed)?;
        let deadline = Instant::now() + timeout;

        loop {
            if let Ok(item) = outbox.try_pop_front() {
                return Ok(item);
            }

            self.pump()?;

            if let Some(item) = self.lock_routing().mailboxes.get_mut(&collector).and_then(Mailbox::take_overflow) {
                return Ok(item);
            }

            let slice = self.next_slice(deadline)?;
            match outbox.pop_front_timeout(slice) {
                Ok(item) => return Ok(item),
                Err(PopError::TimeOut) => continue,
                Err(PopError::Closed) => return Err(BrokerError::BrokerClosed),
            }
        }
    }

    /// Stops all consumers and releases their ports. Idempotent.
    pub fn shutdown(&self) {
        let enrolments = {
            let mut registry = self.write_registry();
            match registry.state {
                BrokerState::ShuttingDown | BrokerState::Closed => return,
                BrokerState::Uninitialized | BrokerState::Open => registry.state = BrokerState::ShuttingDown,
            }

            std::mem::take(&mut registry.enrolments)
        };

        self.is_stopped.store(true, Ordering::Release);

        enrolments.iter().for_each(|enrolment| enrolment.port.close());
        enrolments.iter().for_each(|enrolment| {
            enrolment.consumer.stop();

            let abandoned = enrolment.port.drain_raw().len();
            if abandoned > 0 {
                self.log(&format!("{abandoned} item(s) left unprocessed on port {}", enrolment.port.id()));
            }
        });

        {
            let mut routing = self.lock_routing();
            routing.mailboxes.values().for_each(|mailbox| mailbox.outbox.close());
            routing.mailboxes.clear();
            routing.routes.clear();
        }

        self.write_registry().state = BrokerState::Closed;
        self.log(&format!("broker is closed, {} consumer(s) stopped", enrolments.len()));
    }

    fn submit_items(&self, collector: Option<CollectorId>, items: Vec<WorkItem<T>>) -> BrokerResult<Submission<T>> {
        let ports = self.ports()?;
        if ports.is_empty() {
            return Err(BrokerError::NoConsumers);
        }

        let submission_id = self.next_submission.fetch_add(1, Ordering::Relaxed);

        if let Some(collector) = collector {
            self.add_route(collector, submission_id)?;
        }

        let mut submission = Submission { id: submission_id, submitted: 0, rejected: vec![] };

        for (position_id, mut item) in items.into_iter().enumerate() {
            item.assign_id(ItemId { submission_id, position_id });

            match self.place(ports.as_slice(), item) {
                Ok(_) => submission.submitted += 1,
                Err(PushError::TimeOut(item)) => submission.rejected.push(item),
                Err(PushError::Closed(_)) => return Err(BrokerError::BrokerClosed),
            }
        }

        Ok(submission)
    }

    /// Prefers a port with free capacity starting from the round robin cursor, falls back to
    /// a timed push into the cursor's port.
    fn place(&self, ports: &[Arc<BufferPort<T>>], item: WorkItem<T>) -> Result<(), PushError<WorkItem<T>>> {
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut item = item;

        for offset in 0..ports.len() {
            let port = &ports[(start + offset) % ports.len()];
            if port.raw_free_capacity() == 0 {
                continue;
            }

            match port.push_raw_timeout(item, Duration::ZERO) {
                Ok(_) => return Ok(()),
                Err(PushError::TimeOut(rejected)) => item = rejected,
                Err(err @ PushError::Closed(_)) => return Err(err),
            }
        }

        ports[start % ports.len()].push_raw_timeout(item, self.settings.submit_timeout)
    }

    /// Registers a route of the submission, retiring the oldest routes of the collector beyond
    /// the route history.
    fn add_route(&self, collector: CollectorId, submission_id: u64) -> BrokerResult<()> {
        let mut routing = self.lock_routing();
        let Routing { mailboxes, routes } = &mut *routing;

        let mailbox = mailboxes.get_mut(&collector).ok_or(BrokerError::BrokerClosed)?;
        mailbox.submissions.push_back(submission_id);
        routes.insert(submission_id, collector);

        while mailbox.submissions.len() > self.settings.route_history.max(1) {
            if let Some(retired) = mailbox.submissions.pop_front() {
                routes.remove(&retired);
            }
        }

        Ok(())
    }

    /// Moves all processed items from ports to mailboxes of their collectors.
    fn pump(&self) -> BrokerResult<()> {
        self.ports()?.iter().for_each(|port| {
            while let Ok(item) = port.try_pop_processed() {
                self.route(item);
            }
        });

        Ok(())
    }

    fn route(&self, item: WorkItem<T>) {
        let Some(id) = item.id() else {
            self.log("processed item without id is dropped");
            return;
        };

        let mut routing = self.lock_routing();
        let Routing { mailboxes, routes } = &mut *routing;

        let mailbox = match routes.get(&id.submission_id) {
            Some(collector) => mailboxes.get_mut(collector),
            None => None,
        };

        match mailbox {
            Some(mailbox) => mailbox.deliver(item),
            None => self.log(&format!("item {id} of unknown or retired submission is dropped")),
        }
    }

    fn ports(&self) -> BrokerResult<Vec<Arc<BufferPort<T>>>> {
        let registry = self.read_registry();
        Self::ensure_open(registry.state)?;

        Ok(registry.enrolments.iter().map(|enrolment| enrolment.port.clone()).collect())
    }

    fn next_slice(&self, deadline: Instant) -> BrokerResult<Duration> {
        if self.is_stopped.load(Ordering::Acquire) {
            return Err(BrokerError::BrokerClosed);
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(BrokerError::TimeOut);
        }

        Ok(self.settings.poll_interval.min(deadline - now))
    }

    fn ensure_open(state: BrokerState) -> BrokerResult<()> {
        match state {
            BrokerState::Open => Ok(()),
            BrokerState::Uninitialized => Err(BrokerError::NotOpen),
            BrokerState::ShuttingDown | BrokerState::Closed => Err(BrokerError::BrokerClosed),
        }
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, Registry<T>> {
        self.registry.read().unwrap_or_else(|err| err.into_inner())
    }

    fn write_registry(&self) -> std::sync::RwLockWriteGuard<'_, Registry<T>> {
        self.registry.write().unwrap_or_else(|err| err.into_inner())
    }

    fn lock_routing(&self) -> MutexGuard<'_, Routing<T>> {
        self.routing.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn log(&self, message: &str) {
        (self.environment.logger)(message)
    }
}

impl<T: Payload> Drop for Broker<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
