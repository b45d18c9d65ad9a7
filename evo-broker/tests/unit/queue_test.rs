use super::*;
use std::sync::Arc;
use std::time::Instant;

#[test]
fn can_keep_fifo_order() {
    let queue = BoundedQueue::new(10);

    (0..5).for_each(|value| queue.push_back(value).unwrap());

    let values = (0..5).map(|_| queue.pop_front().unwrap()).collect::<Vec<_>>();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    assert!(queue.is_empty());
}

#[test]
fn can_time_out_push_on_full_queue_and_retry_after_pop() {
    let queue = Arc::new(BoundedQueue::new(3));
    (0..3).for_each(|value| queue.push_back(value).unwrap());

    let start = Instant::now();
    let result = queue.push_back_timeout(3, Duration::from_millis(50));
    let elapsed = start.elapsed();

    assert_eq!(result, Err(PushError::TimeOut(3)));
    assert!(elapsed >= Duration::from_millis(45), "returned too early: {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned too late: {elapsed:?}");

    let popper = {
        let queue = queue.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            queue.pop_front().unwrap()
        })
    };

    assert_eq!(queue.push_back_timeout(3, Duration::from_secs(5)), Ok(()));
    assert_eq!(popper.join().unwrap(), 0);
    assert_eq!(queue.size(), 3);
}

#[test]
fn can_block_push_until_pop() {
    let queue = Arc::new(BoundedQueue::new(1));
    queue.push_back(1).unwrap();

    let pusher = {
        let queue = queue.clone();
        std::thread::spawn(move || queue.push_back(2))
    };

    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(queue.size(), 1);

    assert_eq!(queue.pop_front(), Ok(1));
    assert_eq!(pusher.join().unwrap(), Ok(()));
    assert_eq!(queue.pop_front(), Ok(2));
}

#[test]
fn can_time_out_pop_on_empty_queue() {
    let queue = BoundedQueue::<i32>::new(2);

    let start = Instant::now();
    assert_eq!(queue.pop_front_timeout(Duration::from_millis(30)), Err(PopError::TimeOut));
    assert!(start.elapsed() >= Duration::from_millis(25));

    assert_eq!(queue.try_pop_front(), Err(PopError::TimeOut));
}

#[test]
fn can_wake_blocked_callers_on_close() {
    let queue = Arc::new(BoundedQueue::<i32>::new(1));

    let popper = {
        let queue = queue.clone();
        std::thread::spawn(move || queue.pop_front())
    };

    std::thread::sleep(Duration::from_millis(20));
    queue.close();

    assert_eq!(popper.join().unwrap(), Err(PopError::Closed));
    assert_eq!(queue.push_back(1), Err(PushError::Closed(1)));
    assert!(queue.is_closed());
}

#[test]
fn can_pop_remaining_items_after_close() {
    let queue = BoundedQueue::new(3);
    queue.push_back(1).unwrap();
    queue.push_back(2).unwrap();

    queue.close();
    queue.close();

    assert_eq!(queue.pop_front(), Ok(1));
    assert_eq!(queue.pop_front_timeout(Duration::from_millis(1)), Ok(2));
    assert_eq!(queue.pop_front(), Err(PopError::Closed));
}

#[test]
fn can_drain_queue() {
    let queue = BoundedQueue::new(3);
    (0..3).for_each(|value| queue.push_back(value).unwrap());

    assert_eq!(queue.free_capacity(), 0);
    assert_eq!(queue.try_push_back(4).map_err(|err| err.into_inner()), Err(4));

    assert_eq!(queue.drain(), vec![0, 1, 2]);
    assert_eq!(queue.free_capacity(), 3);
}

parameterized_test! {can_normalize_capacity, (capacity, expected), {
    assert_eq!(BoundedQueue::<i32>::new(capacity).capacity(), expected);
}}

can_normalize_capacity! {
    case_01: (0, 1),
    case_02: (1, 1),
    case_03: (42, 42),
}

#[test]
fn can_hand_over_items_between_many_threads_without_loss() {
    let queue = Arc::new(BoundedQueue::new(4));
    let producers = (0..4)
        .map(|producer| {
            let queue = queue.clone();
            std::thread::spawn(move || (0..100).for_each(|value| queue.push_back(producer * 100 + value).unwrap()))
        })
        .collect::<Vec<_>>();

    let consumers = (0..2)
        .map(|_| {
            let queue = queue.clone();
            std::thread::spawn(move || {
                let mut values = vec![];
                while let Ok(value) = queue.pop_front_timeout(Duration::from_millis(200)) {
                    values.push(value);
                }
                values
            })
        })
        .collect::<Vec<_>>();

    producers.into_iter().for_each(|producer| producer.join().unwrap());
    let mut values = consumers.into_iter().flat_map(|consumer| consumer.join().unwrap()).collect::<Vec<_>>();
    values.sort_unstable();

    assert_eq!(values, (0..400).collect::<Vec<_>>());
}
