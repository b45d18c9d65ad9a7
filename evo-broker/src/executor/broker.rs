#[cfg(test)]
#[path = "../../tests/unit/executor/broker_test.rs"]
mod broker_test;

use super::*;
use crate::broker::{Broker, CollectorId};
use crate::item::ItemId;
use crate::utils::BrokerError;
use rustc_hash::FxHashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// An executor which evaluates populations through the broker.
///
/// When every enrolled consumer is capable of a full return (or `wait_factor` is zero) the
/// executor waits for all items. Otherwise it waits for
/// `wait_factor * (avg_return_time * expected + max_processing_time)`, recomputed after each
/// returned item. `max_wait` bounds both modes. A raised stop flag ends waiting within the broker's
/// poll interval, leaving items which have not returned pending.
pub struct BrokerExecutor<T: Payload> {
    broker: Arc<Broker<T>>,
    collector: CollectorId,
    settings: ExecutorSettings,
    last_budget: Option<Duration>,
    is_stopped: Option<Arc<AtomicBool>>,
}

impl<T: Payload + Clone> BrokerExecutor<T> {
    /// Creates a new instance of `BrokerExecutor` registering its own collector within the broker.
    pub fn new(broker: Arc<Broker<T>>, settings: ExecutorSettings) -> BrokerResult<Self> {
        let collector = broker.register_collector()?;

        Ok(Self { broker, collector, settings, last_budget: None, is_stopped: None })
    }

    /// Sets a flag which stops waiting for results once raised.
    pub fn with_stop_flag(mut self, is_stopped: Arc<AtomicBool>) -> Self {
        self.is_stopped = Some(is_stopped);
        self
    }

    /// Returns executor settings.
    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    /// Returns the broker.
    pub fn broker(&self) -> &Arc<Broker<T>> {
        &self.broker
    }

    /// Returns a time budget derived from the latest returns, if any.
    pub fn last_budget(&self) -> Option<Duration> {
        self.last_budget
    }

    fn submit_slots(
        &self,
        handle: &mut SubmissionHandle,
        population: &[WorkItem<T>],
        slots: Vec<usize>,
    ) -> BrokerResult<()> {
        if slots.is_empty() {
            return Ok(());
        }

        let items = slots.iter().map(|&slot| population[slot].clone()).collect();
        let submission = self.broker.submit_for(self.collector, items)?;

        let rejected =
            submission.rejected.iter().filter_map(|item| item.id()).map(|id| id.position_id).collect::<Vec<_>>();
        if !rejected.is_empty() {
            let (amount, id) = (rejected.len(), submission.id);
            self.log(&format!("{amount} item(s) of submission {id} are rejected: ports are full"));
        }

        handle.add_submission(submission.id, slots, rejected.as_slice());

        Ok(())
    }

    /// Receives returned items until every awaited slot is accounted for or waiting time is over.
    fn collect(
        &mut self,
        handle: &SubmissionHandle,
        population: &mut [WorkItem<T>],
        late: &mut Vec<WorkItem<T>>,
        seen_late: &mut FxHashSet<ItemId>,
    ) -> BrokerResult<()> {
        let mut waiting = handle
            .slots()
            .into_iter()
            .filter(|slot| !handle.rejected().contains(slot) && population[*slot].is_pending())
            .collect::<FxHashSet<_>>();

        let expected = waiting.len();
        if expected == 0 {
            return Ok(());
        }

        let min_returns = if self.settings.min_partial_return > 0. {
            ((self.settings.min_partial_return.clamp(0., 1.) * expected as f64).ceil() as usize).max(1)
        } else {
            expected
        };

        let max_wait = self.settings.max_wait;
        let is_full_return = self.settings.wait_factor == 0. || self.broker.is_full_return_capable();
        let mut budget = if is_full_return { max_wait } else { self.last_budget.unwrap_or(max_wait).min(max_wait) };

        let timer = Timer::start();
        let mut returned = 0;
        let mut processed = 0;
        let mut max_processing_time = Duration::ZERO;

        while !waiting.is_empty() && returned < min_returns {
            if self.is_stopped() {
                self.log(&format!("stop waiting on request: {returned} of {expected} item(s) have returned"));
                break;
            }

            let elapsed = timer.elapsed();
            if elapsed >= budget {
                self.log(&format!(
                    "stop waiting after {}ms: {} of {expected} item(s) have returned",
                    elapsed.as_millis(),
                    returned
                ));
                break;
            }

            let timeout = (budget - elapsed).min(self.broker.settings().poll_interval);
            let item = match self.broker.retrieve_for(self.collector, timeout) {
                Ok(item) => item,
                Err(BrokerError::TimeOut) => continue,
                Err(err) => return Err(err),
            };

            let Some(id) = item.id() else { continue };

            let Some(slot) = handle.get_slot(id.submission_id, id.position_id) else {
                if item.is_processed() && seen_late.insert(id) {
                    late.push(item);
                }
                continue;
            };

            // NOTE an unprocessed copy of a superseded submission says nothing about the latest one
            if item.is_pending() && !handle.is_latest(slot, id.submission_id) {
                continue;
            }

            if !waiting.remove(&slot) {
                continue;
            }

            returned += 1;

            // NOTE an item can come back unprocessed when its worker has gone
            if !item.is_pending() {
                processed += 1;
                max_processing_time = max_processing_time.max(item.processing_time().unwrap_or_default());
                population[slot] = item;
            }

            if !is_full_return && processed > 0 {
                let avg_return_time = timer.elapsed() / processed as u32;
                let adaptive = (avg_return_time * expected as u32 + max_processing_time)
                    .mul_f64(self.settings.wait_factor.max(0.));

                budget = adaptive.min(max_wait);
                self.last_budget = Some(budget);
            }
        }

        Ok(())
    }

    fn is_stopped(&self) -> bool {
        self.is_stopped.as_ref().is_some_and(|flag| flag.load(Ordering::Acquire))
    }

    fn log(&self, message: &str) {
        (self.broker.environment().logger)(message)
    }
}

impl<T: Payload + Clone> Executor<T> for BrokerExecutor<T> {
    fn submit_all(&mut self, population: &[WorkItem<T>]) -> BrokerResult<SubmissionHandle> {
        let mut handle = SubmissionHandle::new();
        self.submit_slots(&mut handle, population, get_pending_slots(population))?;

        Ok(handle)
    }

    fn wait_for_results(
        &mut self,
        handle: &SubmissionHandle,
        population: &mut [WorkItem<T>],
    ) -> BrokerResult<Evaluation<T>> {
        let (mut late, mut seen_late) = (vec![], FxHashSet::default());
        self.collect(handle, population, &mut late, &mut seen_late)?;

        Ok(create_evaluation(handle.slots().as_slice(), population, self.settings.max_item_misses, late))
    }

    fn work_on(&mut self, population: &mut [WorkItem<T>]) -> BrokerResult<Evaluation<T>> {
        let mut handle = self.submit_all(population)?;
        let (mut late, mut seen_late) = (vec![], FxHashSet::default());

        self.collect(&handle, population, &mut late, &mut seen_late)?;

        // NOTE a caller which accepts partial returns does not want to wait for resubmissions
        let max_resubmissions = if self.settings.min_partial_return > 0. { 0 } else { self.settings.max_resubmissions };

        for attempt in 1..=max_resubmissions {
            let remaining =
                handle.slots().into_iter().filter(|&slot| population[slot].is_pending()).collect::<Vec<_>>();

            if remaining.is_empty() || self.is_stopped() {
                break;
            }

            self.log(&format!("resubmitting {} item(s), attempt {attempt}/{max_resubmissions}", remaining.len()));

            self.submit_slots(&mut handle, population, remaining)?;
            self.collect(&handle, population, &mut late, &mut seen_late)?;
        }

        Ok(create_evaluation(handle.slots().as_slice(), population, self.settings.max_item_misses, late))
    }
}

impl<T: Payload> Drop for BrokerExecutor<T> {
    fn drop(&mut self) {
        self.broker.deregister_collector(self.collector);
    }
}
