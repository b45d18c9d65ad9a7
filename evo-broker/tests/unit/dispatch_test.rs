use super::*;
use crate::helpers::utils::create_collecting_logger;
use std::sync::atomic::AtomicUsize;

fn create_queue(threads: usize) -> AsyncDispatchQueue {
    AsyncDispatchQueue::new("test", threads, 16, Arc::new(|_| {}))
}

#[test]
fn can_run_all_dispatched_tasks() {
    let queue = create_queue(4);
    let counter = Arc::new(AtomicUsize::new(0));

    (0..100).for_each(|_| {
        let counter = counter.clone();
        queue.dispatch(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
    });
    queue.drain_queue();

    assert_eq!(counter.load(Ordering::SeqCst), 100);
    assert_eq!(queue.pending(), 0);
    assert_eq!(queue.threads(), 4);
}

#[test]
fn can_ignore_tasks_dispatched_after_stop() {
    let queue = create_queue(2);
    let counter = Arc::new(AtomicUsize::new(0));

    queue.stop();
    queue.stop();

    let task_counter = counter.clone();
    queue.dispatch(move || {
        task_counter.fetch_add(1, Ordering::SeqCst);
    });
    queue.drain_queue();

    assert!(queue.is_stopped());
    assert_eq!(queue.threads(), 0);
    assert_eq!(counter.load(Ordering::SeqCst), 0);
}

#[test]
fn can_finish_running_task_on_stop() {
    let queue = create_queue(1);
    let counter = Arc::new(AtomicUsize::new(0));

    let task_counter = counter.clone();
    queue.dispatch(move || {
        std::thread::sleep(Duration::from_millis(50));
        task_counter.fetch_add(1, Ordering::SeqCst);
    });

    std::thread::sleep(Duration::from_millis(10));
    queue.stop();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[test]
fn can_survive_panicking_task() {
    let (logger, messages) = create_collecting_logger();
    let queue = AsyncDispatchQueue::new("test", 1, 4, logger);
    let counter = Arc::new(AtomicUsize::new(0));

    queue.dispatch(|| panic!("task failure"));
    let task_counter = counter.clone();
    queue.dispatch(move || {
        task_counter.fetch_add(1, Ordering::SeqCst);
    });
    queue.drain_queue();

    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(messages.lock().unwrap().iter().any(|msg| msg.contains("task failure")));
}
