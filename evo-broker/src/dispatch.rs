//! A general purpose task queue served by a fixed set of background threads.

#[cfg(test)]
#[path = "../tests/unit/dispatch_test.rs"]
mod dispatch_test;

use crate::item::describe_panic;
use crate::queue::{BoundedQueue, PopError};
use crate::utils::InfoLogger;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// A task which can be dispatched.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

struct DispatchState {
    tasks: BoundedQueue<Task>,
    pending: Mutex<usize>,
    idle: Condvar,
    is_stopped: AtomicBool,
    logger: InfoLogger,
}

impl DispatchState {
    fn complete(&self, amount: usize) {
        let mut pending = self.pending.lock().unwrap_or_else(|err| err.into_inner());
        *pending = pending.saturating_sub(amount);

        if *pending == 0 {
            self.idle.notify_all();
        }
    }
}

/// Runs dispatched tasks on background threads.
///
/// Tasks dispatched after `stop` are silently dropped.
pub struct AsyncDispatchQueue {
    state: Arc<DispatchState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl AsyncDispatchQueue {
    /// Creates a new instance of `AsyncDispatchQueue` with given amount of threads and task queue capacity.
    pub fn new(name: &str, threads: usize, capacity: usize, logger: InfoLogger) -> Self {
        let state = Arc::new(DispatchState {
            tasks: BoundedQueue::new(capacity),
            pending: Mutex::new(0),
            idle: Condvar::new(),
            is_stopped: AtomicBool::new(false),
            logger,
        });

        let workers = (0..threads.max(1))
            .map(|idx| {
                let state = state.clone();
                std::thread::Builder::new()
                    .name(format!("{name}-{idx}"))
                    .spawn(move || run_worker(state))
                    .expect("cannot spawn dispatch thread")
            })
            .collect();

        Self { state, workers: Mutex::new(workers) }
    }

    /// Enqueues a task, blocking while the task queue is full.
    pub fn dispatch<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.state.is_stopped.load(Ordering::Acquire) {
            return;
        }

        *self.state.pending.lock().unwrap_or_else(|err| err.into_inner()) += 1;

        if self.state.tasks.push_back(Box::new(task)).is_err() {
            self.state.complete(1);
        }
    }

    /// Blocks until all dispatched tasks are finished.
    pub fn drain_queue(&self) {
        let mut pending = self.state.pending.lock().unwrap_or_else(|err| err.into_inner());

        while *pending > 0 {
            pending = self.state.idle.wait(pending).unwrap_or_else(|err| err.into_inner());
        }
    }

    /// Returns amount of tasks which are queued or running.
    pub fn pending(&self) -> usize {
        *self.state.pending.lock().unwrap_or_else(|err| err.into_inner())
    }

    /// Returns amount of worker threads.
    pub fn threads(&self) -> usize {
        self.workers.lock().unwrap_or_else(|err| err.into_inner()).len()
    }

    /// Returns true if queue is stopped.
    pub fn is_stopped(&self) -> bool {
        self.state.is_stopped.load(Ordering::Acquire)
    }

    /// Drops queued tasks, lets running tasks finish and joins worker threads. Idempotent.
    pub fn stop(&self) {
        self.state.is_stopped.store(true, Ordering::Release);

        let dropped = self.state.tasks.drain().len();
        self.state.tasks.close();
        self.state.complete(dropped);

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|err| err.into_inner()));
        workers.into_iter().for_each(|worker| {
            if worker.join().is_err() {
                (self.state.logger)("dispatch worker has terminated abnormally");
            }
        });
    }
}

impl Drop for AsyncDispatchQueue {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_worker(state: Arc<DispatchState>) {
    loop {
        match state.tasks.pop_front_timeout(WORKER_POLL_INTERVAL) {
            Ok(task) => {
                if !state.is_stopped.load(Ordering::Acquire) {
                    if let Err(panic) = catch_unwind(AssertUnwindSafe(task)) {
                        (state.logger)(&format!("dispatched task has panicked: {}", describe_panic(&*panic)));
                    }
                }

                state.complete(1);
            }
            Err(PopError::TimeOut) if !state.is_stopped.load(Ordering::Acquire) => continue,
            Err(_) => break,
        }
    }
}
