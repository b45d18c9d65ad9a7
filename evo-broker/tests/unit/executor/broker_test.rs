use super::*;
use crate::consumer::{Consumer, ConsumerContext, ThreadPoolConsumer};
use crate::helpers::payload::{TestPayload, create_counted_items, create_test_items};
use crate::helpers::utils::{create_test_broker, create_test_broker_with_threads};
use crate::network::{NetworkConsumer, NetworkConsumerSettings};
use crate::queue::PopError;
use crate::utils::GenericResult;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;

/// Keeps every item it gets.
struct SinkConsumer;

impl Consumer<TestPayload> for SinkConsumer {
    fn name(&self) -> String {
        "sink".to_string()
    }

    fn run(&self, _: ConsumerContext<TestPayload>) -> GenericResult<()> {
        Ok(())
    }

    fn stop(&self) {}

    fn is_full_return_capable(&self) -> bool {
        false
    }
}

/// Gives the first `drops` items back unprocessed, as a worker which has gone does.
struct FlakyConsumer {
    drops: usize,
    worker: Mutex<Option<(ConsumerContext<TestPayload>, JoinHandle<()>)>>,
}

impl FlakyConsumer {
    fn new(drops: usize) -> Self {
        Self { drops, worker: Mutex::new(None) }
    }
}

impl Consumer<TestPayload> for FlakyConsumer {
    fn name(&self) -> String {
        "flaky".to_string()
    }

    fn run(&self, context: ConsumerContext<TestPayload>) -> GenericResult<()> {
        let drops = self.drops;
        let handle = {
            let context = context.clone();
            std::thread::spawn(move || {
                let mut dropped = 0;
                while !context.is_stopped() {
                    let mut item = match context.port.pop_raw_timeout(context.poll_interval) {
                        Ok(item) => item,
                        Err(PopError::TimeOut) => continue,
                        Err(PopError::Closed) => break,
                    };

                    if dropped < drops {
                        dropped += 1;
                    } else {
                        item.process();
                    }

                    context.return_item(item);
                }
            })
        };

        *self.worker.lock().unwrap() = Some((context, handle));

        Ok(())
    }

    fn stop(&self) {
        if let Some((context, handle)) = self.worker.lock().unwrap().take() {
            context.request_stop();
            handle.join().unwrap();
        }
    }

    fn is_full_return_capable(&self) -> bool {
        true
    }
}

/// Holds the first item until the next one arrives. Then gives the held item back unprocessed and
/// returns the next one processed a bit later.
#[derive(Default)]
struct HoldingConsumer {
    worker: Mutex<Option<(ConsumerContext<TestPayload>, JoinHandle<()>)>>,
}

impl Consumer<TestPayload> for HoldingConsumer {
    fn name(&self) -> String {
        "holding".to_string()
    }

    fn run(&self, context: ConsumerContext<TestPayload>) -> GenericResult<()> {
        let handle = {
            let context = context.clone();
            std::thread::spawn(move || {
                let (mut held, mut has_held) = (None, false);
                while !context.is_stopped() {
                    let mut item = match context.port.pop_raw_timeout(context.poll_interval) {
                        Ok(item) => item,
                        Err(PopError::TimeOut) => continue,
                        Err(PopError::Closed) => break,
                    };

                    if !has_held {
                        has_held = true;
                        held = Some(item);
                        continue;
                    }

                    if let Some(previous) = held.take() {
                        context.return_item(previous);
                        std::thread::sleep(Duration::from_millis(20));
                    }

                    item.process();
                    context.return_item(item);
                }
            })
        };

        *self.worker.lock().unwrap() = Some((context, handle));

        Ok(())
    }

    fn stop(&self) {
        if let Some((context, handle)) = self.worker.lock().unwrap().take() {
            context.request_stop();
            handle.join().unwrap();
        }
    }

    fn is_full_return_capable(&self) -> bool {
        false
    }
}

fn create_executor(broker: &Arc<Broker<TestPayload>>, settings: ExecutorSettings) -> BrokerExecutor<TestPayload> {
    BrokerExecutor::new(broker.clone(), settings).unwrap()
}

fn create_delayed_items(values: std::ops::Range<i64>, delay: Duration) -> Vec<WorkItem<TestPayload>> {
    values.map(|value| WorkItem::new(TestPayload::new(value).with_delay(delay))).collect()
}

fn get_results(population: &[WorkItem<TestPayload>]) -> Vec<Option<i64>> {
    population.iter().map(|item| item.payload().result).collect()
}

#[test]
fn can_evaluate_whole_population_with_full_return() {
    let broker = create_test_broker_with_threads(2);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut population = create_counted_items(0..10, calls.clone());
    let mut executor = create_executor(&broker, ExecutorSettings::default());

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(evaluation.is_complete);
    assert!(!evaluation.has_errors);
    assert_eq!(evaluation.evaluated, (0..10).collect::<Vec<_>>());
    assert_eq!(get_results(&population), (0..10).map(|value| Some(value * value)).collect::<Vec<_>>());
    assert_eq!(calls.load(Ordering::SeqCst), 10);
    assert_eq!(executor.last_budget(), None);
}

#[test]
fn can_skip_already_evaluated_items() {
    let broker = create_test_broker_with_threads(1);
    let calls = Arc::new(AtomicUsize::new(0));
    let mut population = create_counted_items(0..4, calls.clone());
    population[1].process();
    population[3].process();
    let mut executor = create_executor(&broker, ExecutorSettings::default());

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert_eq!(evaluation.evaluated, vec![0, 2]);
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(population.iter().all(|item| item.is_processed()));
}

#[test]
fn can_stop_waiting_after_max_wait_when_nobody_processes() {
    let broker = create_test_broker();
    let consumer = NetworkConsumer::<TestPayload>::new(NetworkConsumerSettings {
        address: "127.0.0.1:0".to_string(),
        ..NetworkConsumerSettings::default()
    });
    broker.enrol(Arc::new(consumer)).unwrap();
    let settings =
        ExecutorSettings { max_wait: Duration::from_millis(100), max_resubmissions: 0, ..ExecutorSettings::default() };
    let mut population = create_test_items(0..5);
    let mut executor = create_executor(&broker, settings);

    let timer = Timer::start();
    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(timer.elapsed() >= Duration::from_millis(90));
    assert!(timer.elapsed() < Duration::from_secs(5));
    assert!(!evaluation.is_complete);
    assert_eq!(evaluation.pending, vec![0, 1, 2, 3, 4]);
    assert!(population.iter().all(|item| item.is_pending() && item.misses() == 1));
}

#[test]
fn can_stop_waiting_when_stop_flag_is_raised() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(SinkConsumer)).unwrap();
    let is_stopped = Arc::new(AtomicBool::new(false));
    let settings =
        ExecutorSettings { wait_factor: 0., max_wait: Duration::from_secs(600), ..ExecutorSettings::default() };
    let mut executor = create_executor(&broker, settings).with_stop_flag(is_stopped.clone());
    let mut population = create_test_items(0..2);
    let raiser = {
        let is_stopped = is_stopped.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            is_stopped.store(true, Ordering::Release);
        })
    };
    let start = std::time::Instant::now();

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();
    raiser.join().unwrap();

    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!evaluation.is_complete);
    assert_eq!(evaluation.pending, vec![0, 1]);
}

#[test]
fn can_mark_items_failed_after_max_misses() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(SinkConsumer)).unwrap();
    let settings = ExecutorSettings {
        max_wait: Duration::from_millis(20),
        max_resubmissions: 0,
        max_item_misses: 2,
        ..ExecutorSettings::default()
    };
    let mut population = create_test_items(0..2);
    let mut executor = create_executor(&broker, settings);

    let first = executor.work_on(population.as_mut_slice()).unwrap();
    let second = executor.work_on(population.as_mut_slice()).unwrap();

    assert_eq!(first.pending, vec![0, 1]);
    assert!(second.is_complete);
    assert!(second.has_errors);
    assert!(population.iter().all(|item| item.has_errors()));
}

#[test]
fn can_use_adaptive_budget_when_items_can_be_lost() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(ThreadPoolConsumer::<TestPayload>::new(2))).unwrap();
    broker.enrol(Arc::new(SinkConsumer)).unwrap();
    let settings =
        ExecutorSettings { max_wait: Duration::from_secs(30), max_resubmissions: 0, ..ExecutorSettings::default() };
    let mut population = create_delayed_items(0..10, Duration::from_millis(5));
    let mut executor = create_executor(&broker, settings);

    let timer = Timer::start();
    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(timer.elapsed() < Duration::from_secs(10));
    assert_eq!(evaluation.evaluated.len(), 5);
    assert_eq!(evaluation.pending.len(), 5);
    assert!(executor.last_budget().is_some_and(|budget| budget < Duration::from_secs(30)));
}

#[test]
fn can_resubmit_items_returned_unprocessed() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(FlakyConsumer::new(3))).unwrap();
    let mut population = create_test_items(0..5);
    let mut executor = create_executor(&broker, ExecutorSettings::default());

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(evaluation.is_complete);
    assert_eq!(get_results(&population), vec![Some(0), Some(1), Some(4), Some(9), Some(16)]);
}

#[test]
fn can_ignore_stale_unprocessed_copy_of_resubmitted_item() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(HoldingConsumer::default())).unwrap();
    let mut population = create_test_items(3..4);
    let settings = ExecutorSettings {
        wait_factor: 0.,
        max_wait: Duration::from_millis(300),
        max_resubmissions: 1,
        ..ExecutorSettings::default()
    };
    let mut executor = create_executor(&broker, settings);

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(evaluation.is_complete);
    assert_eq!(evaluation.evaluated, vec![0]);
    assert!(evaluation.pending.is_empty());
    assert_eq!(get_results(&population), vec![Some(9)]);
}

#[test]
fn can_leave_items_pending_without_resubmissions() {
    let broker = create_test_broker();
    broker.enrol(Arc::new(FlakyConsumer::new(3))).unwrap();
    let mut population = create_test_items(0..5);
    let settings = ExecutorSettings { max_resubmissions: 0, ..ExecutorSettings::default() };
    let mut executor = create_executor(&broker, settings);

    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

    assert!(!evaluation.is_complete);
    assert_eq!(evaluation.pending, vec![0, 1, 2]);
    assert_eq!(evaluation.evaluated, vec![3, 4]);
}

#[test]
fn can_return_partially_and_collect_late_items_later() {
    let broker = create_test_broker_with_threads(1);
    let settings = ExecutorSettings { min_partial_return: 0.5, ..ExecutorSettings::default() };
    let mut population = create_delayed_items(0..4, Duration::from_millis(20));
    let mut executor = create_executor(&broker, settings);

    let first = executor.work_on(population.as_mut_slice()).unwrap();
    let mut next_population = create_test_items(10..11);
    let second = executor.work_on(next_population.as_mut_slice()).unwrap();

    assert_eq!(first.evaluated, vec![0, 1]);
    assert_eq!(first.pending, vec![2, 3]);
    assert!(second.is_complete);
    assert_eq!(next_population[0].payload().result, Some(100));
    assert_eq!(
        second.late.iter().map(|item| item.payload().result).collect::<Vec<_>>(),
        vec![Some(4), Some(9)]
    );
}

#[test]
fn can_split_submission_and_waiting() {
    let broker = create_test_broker_with_threads(2);
    let mut population = create_test_items(0..3);
    let mut executor = create_executor(&broker, ExecutorSettings::default());

    let handle = executor.submit_all(population.as_slice()).unwrap();
    let evaluation = executor.wait_for_results(&handle, population.as_mut_slice()).unwrap();

    assert_eq!(handle.slots(), vec![0, 1, 2]);
    assert!(handle.rejected().is_empty());
    assert!(evaluation.is_complete);
    assert_eq!(get_results(&population), vec![Some(0), Some(1), Some(4)]);
}

#[test]
fn can_serve_many_executors_on_same_broker() {
    let broker = create_test_broker_with_threads(4);

    let results = std::thread::scope(|scope| {
        let workers = (0..3_i64)
            .map(|idx| {
                let broker = broker.clone();
                scope.spawn(move || {
                    let mut population = create_test_items(idx * 10..idx * 10 + 10);
                    let mut executor = create_executor(&broker, ExecutorSettings::default());
                    let evaluation = executor.work_on(population.as_mut_slice()).unwrap();

                    (evaluation.is_complete, get_results(&population))
                })
            })
            .collect::<Vec<_>>();

        workers.into_iter().map(|worker| worker.join().unwrap()).collect::<Vec<_>>()
    });

    results.into_iter().enumerate().for_each(|(idx, (is_complete, values))| {
        let idx = idx as i64;
        assert!(is_complete);
        assert_eq!(values, (idx * 10..idx * 10 + 10).map(|value| Some(value * value)).collect::<Vec<_>>());
    });
}

#[test]
fn can_fail_when_broker_is_closed() {
    let broker = create_test_broker_with_threads(1);
    let mut executor = create_executor(&broker, ExecutorSettings::default());
    broker.shutdown();

    let result = executor.work_on(create_test_items(0..2).as_mut_slice());

    assert_eq!(result.err(), Some(BrokerError::BrokerClosed));
}
