#[cfg(test)]
#[path = "../../tests/unit/executor/parallel_test.rs"]
mod parallel_test;

use super::*;
use crate::item::ItemId;
use crate::utils::{ThreadPool, get_cpus, parallel_foreach_mut};

/// An executor which processes all pending items of a population on a thread pool.
pub struct ParallelExecutor {
    pool: ThreadPool,
    next_submission: u64,
}

impl ParallelExecutor {
    /// Creates a new instance of `ParallelExecutor`. Zero threads means amount of available cpus.
    pub fn new(threads: usize) -> Self {
        let threads = if threads == 0 { get_cpus() } else { threads };

        Self { pool: ThreadPool::new(threads), next_submission: 0 }
    }

    /// Returns amount of threads.
    pub fn threads(&self) -> usize {
        self.pool.size()
    }
}

impl Default for ParallelExecutor {
    fn default() -> Self {
        Self::new(0)
    }
}

impl<T: Payload + Sync> Executor<T> for ParallelExecutor {
    fn submit_all(&mut self, population: &[WorkItem<T>]) -> BrokerResult<SubmissionHandle> {
        let submission_id = self.next_submission;
        self.next_submission += 1;

        let mut handle = SubmissionHandle::new();
        handle.add_submission(submission_id, get_pending_slots(population), &[]);

        Ok(handle)
    }

    fn wait_for_results(
        &mut self,
        handle: &SubmissionHandle,
        population: &mut [WorkItem<T>],
    ) -> BrokerResult<Evaluation<T>> {
        handle.submission_ids().into_iter().for_each(|submission_id| {
            (0..)
                .map_while(|position_id| handle.get_slot(submission_id, position_id).map(|slot| (position_id, slot)))
                .for_each(|(position_id, slot)| population[slot].assign_id(ItemId { submission_id, position_id }));
        });

        let slots = handle.slots();
        let mut targets = population
            .iter_mut()
            .enumerate()
            .filter(|(idx, _)| slots.binary_search(idx).is_ok())
            .map(|(_, item)| item)
            .collect::<Vec<_>>();

        self.pool.execute(|| {
            parallel_foreach_mut(targets.as_mut_slice(), |item| {
                item.process();
            })
        });

        Ok(create_evaluation(slots.as_slice(), population, 0, vec![]))
    }
}
