#[cfg(test)]
#[path = "../../tests/unit/executor/serial_test.rs"]
mod serial_test;

use super::*;
use crate::item::ItemId;

/// An executor which processes items one by one in the calling thread.
#[derive(Default)]
pub struct SerialExecutor {
    next_submission: u64,
}

impl SerialExecutor {
    /// Creates a new instance of `SerialExecutor`.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<T: Payload> Executor<T> for SerialExecutor {
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
                .for_each(|(position_id, slot)| {
                    let item = &mut population[slot];
                    item.assign_id(ItemId { submission_id, position_id });
                    item.process();
                });
        });

        Ok(create_evaluation(handle.slots().as_slice(), population, 0, vec![]))
    }
}
