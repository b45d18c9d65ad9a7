//! Executors connect a population based algorithm with item processing: they submit all
//! unevaluated items of a population and collect them back under a waiting policy.

#[cfg(test)]
#[path = "../../tests/unit/executor/executor_test.rs"]
mod executor_test;

use crate::item::{Payload, WorkItem};
use crate::utils::{BrokerResult, Timer};
use rustc_hash::FxHashMap;
use std::time::Duration;

mod broker;
pub use self::broker::BrokerExecutor;

mod parallel;
pub use self::parallel::ParallelExecutor;

mod serial;
pub use self::serial::SerialExecutor;

/// Specifies how long executor waits for submitted items.
#[derive(Clone, Debug)]
pub struct ExecutorSettings {
    /// Scales adaptive timeout. Zero means waiting for a full return.
    pub wait_factor: f64,
    /// A fraction of expected items in `[0, 1]` after which waiting stops. Zero disables it.
    pub min_partial_return: f64,
    /// How many times items which have not returned are resubmitted within one `work_on` call.
    pub max_resubmissions: usize,
    /// An absolute limit on waiting for one submission.
    pub max_wait: Duration,
    /// How many times in a row an item can be reported pending before it is marked as failed.
    /// Zero means no limit.
    pub max_item_misses: usize,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            wait_factor: 2.,
            min_partial_return: 0.,
            max_resubmissions: 3,
            max_wait: Duration::from_secs(300),
            max_item_misses: 0,
        }
    }
}

/// A result of population evaluation.
#[derive(Debug)]
pub struct Evaluation<T> {
    /// True if every submitted item has returned.
    pub is_complete: bool,
    /// True if at least one returned item has failed.
    pub has_errors: bool,
    /// Population slots which have got processed or failed items.
    pub evaluated: Vec<usize>,
    /// Population slots which are still not evaluated, keeping their previous state.
    pub pending: Vec<usize>,
    /// Processed items of earlier generations which have returned too late.
    pub late: Vec<WorkItem<T>>,
}

/// Keeps track of items submitted for one population.
#[derive(Debug)]
pub struct SubmissionHandle {
    submissions: FxHashMap<u64, Vec<usize>>,
    latest: FxHashMap<usize, u64>,
    rejected: Vec<usize>,
    timer: Timer,
}

impl SubmissionHandle {
    pub(crate) fn new() -> Self {
        Self {
            submissions: FxHashMap::default(),
            latest: FxHashMap::default(),
            rejected: vec![],
            timer: Timer::start(),
        }
    }

    /// Registers a submission of given population slots. Positions of items which could not be
    /// submitted are kept as rejected.
    pub(crate) fn add_submission(&mut self, submission_id: u64, slots: Vec<usize>, rejected_positions: &[usize]) {
        self.rejected.retain(|slot| !slots.contains(slot));
        self.rejected.extend(rejected_positions.iter().filter_map(|&position| slots.get(position).copied()));
        self.latest.extend(slots.iter().map(|&slot| (slot, submission_id)));
        self.submissions.insert(submission_id, slots);
    }

    /// Returns true if the slot was handed over last time within the given submission.
    pub(crate) fn is_latest(&self, slot: usize, submission_id: u64) -> bool {
        self.latest.get(&slot).is_some_and(|&latest| latest == submission_id)
    }

    /// Returns population slot of the item with given submission and position ids.
    pub(crate) fn get_slot(&self, submission_id: u64, position_id: usize) -> Option<usize> {
        self.submissions.get(&submission_id).and_then(|slots| slots.get(position_id)).copied()
    }

    /// Returns ids of all submissions made under this handle.
    pub fn submission_ids(&self) -> Vec<u64> {
        let mut ids = self.submissions.keys().copied().collect::<Vec<_>>();
        ids.sort_unstable();
        ids
    }

    /// Returns population slots which were handed over for processing.
    pub fn slots(&self) -> Vec<usize> {
        let mut slots = self.submissions.values().flatten().copied().collect::<Vec<_>>();
        slots.sort_unstable();
        slots.dedup();
        slots
    }

    /// Returns population slots which could not be submitted.
    pub fn rejected(&self) -> &[usize] {
        self.rejected.as_slice()
    }

    /// Returns time passed since the first submission.
    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }
}

/// Evaluates populations of work items.
pub trait Executor<T: Payload> {
    /// Hands every pending item of the population over for processing.
    fn submit_all(&mut self, population: &[WorkItem<T>]) -> BrokerResult<SubmissionHandle>;

    /// Waits for submitted items and puts returned ones into their population slots.
    fn wait_for_results(
        &mut self,
        handle: &SubmissionHandle,
        population: &mut [WorkItem<T>],
    ) -> BrokerResult<Evaluation<T>>;

    /// Evaluates all pending items of the population.
    fn work_on(&mut self, population: &mut [WorkItem<T>]) -> BrokerResult<Evaluation<T>> {
        let handle = self.submit_all(population)?;
        self.wait_for_results(&handle, population)
    }
}

/// Creates evaluation from the final state of the given slots, counting a miss for every item
/// which is still pending. Items which have reached `max_item_misses` are marked as failed.
pub(crate) fn create_evaluation<T>(
    slots: &[usize],
    population: &mut [WorkItem<T>],
    max_item_misses: usize,
    late: Vec<WorkItem<T>>,
) -> Evaluation<T> {
    let mut evaluated = Vec::with_capacity(slots.len());
    let mut pending = vec![];

    slots.iter().copied().for_each(|slot| {
        let item = &mut population[slot];

        if item.is_pending() {
            let misses = item.add_miss();
            if max_item_misses > 0 && misses >= max_item_misses {
                item.mark_failed(format!("not returned after {misses} attempt(s)"));
                evaluated.push(slot);
            } else {
                pending.push(slot);
            }
        } else {
            evaluated.push(slot);
        }
    });

    let has_errors = evaluated.iter().any(|&slot| population[slot].has_errors());

    Evaluation { is_complete: pending.is_empty(), has_errors, evaluated, pending, late }
}

/// Returns population slots with pending items.
pub(crate) fn get_pending_slots<T>(population: &[WorkItem<T>]) -> Vec<usize> {
    population.iter().enumerate().filter(|(_, item)| item.is_pending()).map(|(idx, _)| idx).collect()
}
