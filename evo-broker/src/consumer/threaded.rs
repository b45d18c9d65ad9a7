#[cfg(test)]
#[path = "../../tests/unit/consumer/threaded_test.rs"]
mod threaded_test;

use super::*;
use crate::dispatch::AsyncDispatchQueue;
use crate::item::ProcessingStatus;
use crate::queue::PopError;
use crate::utils::get_cpus;
use std::marker::PhantomData;
use std::sync::Mutex;

/// A consumer which processes items in-process on a fixed amount of worker threads.
pub struct ThreadPoolConsumer<T> {
    threads: usize,
    dispatcher: Mutex<Option<AsyncDispatchQueue>>,
    context: Mutex<Option<ConsumerContext<T>>>,
    _marker: PhantomData<fn(T)>,
}

impl<T: Payload> ThreadPoolConsumer<T> {
    /// Creates a new instance of `ThreadPoolConsumer`. Zero threads means amount of available cpus.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 { get_cpus() } else { threads };

        Self { threads, dispatcher: Mutex::new(None), context: Mutex::new(None), _marker: PhantomData }
    }

    /// Returns amount of worker threads.
    pub fn threads(&self) -> usize {
        self.threads
    }
}

impl<T: Payload> Default for ThreadPoolConsumer<T> {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: Payload> Consumer<T> for ThreadPoolConsumer<T> {
    fn name(&self) -> String {
        format!("thread pool consumer ({} threads)", self.threads)
    }

    fn run(&self, context: ConsumerContext<T>) -> GenericResult<()> {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(|err| err.into_inner());
        if dispatcher.is_some() {
            return Err("thread pool consumer is already running".into());
        }

        let queue = AsyncDispatchQueue::new(
            &format!("consumer-{}", context.port.id()),
            self.threads,
            self.threads,
            context.environment.logger.clone(),
        );

        (0..self.threads).for_each(|_| {
            let context = context.clone();
            queue.dispatch(move || process_items(context));
        });

        *dispatcher = Some(queue);
        *self.context.lock().unwrap_or_else(|err| err.into_inner()) = Some(context);

        Ok(())
    }

    fn stop(&self) {
        if let Some(context) = self.context.lock().unwrap_or_else(|err| err.into_inner()).as_ref() {
            context.request_stop();
        }

        let dispatcher = self.dispatcher.lock().unwrap_or_else(|err| err.into_inner()).take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop();
        }
    }

    fn is_full_return_capable(&self) -> bool {
        true
    }
}

fn process_items<T: Payload>(context: ConsumerContext<T>) {
    while !context.is_stopped() {
        let mut item = match context.port.pop_raw_timeout(context.poll_interval) {
            Ok(item) => item,
            Err(PopError::TimeOut) => continue,
            Err(PopError::Closed) => break,
        };

        item.process();
        if let ProcessingStatus::Failed(reason) = item.status() {
            context.log(&format!("item {:?} has failed: {reason}", item.id()));
        }

        context.return_item(item);
    }
}
