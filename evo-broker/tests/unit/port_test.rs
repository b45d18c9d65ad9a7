use super::*;
use crate::helpers::payload::create_test_items;

#[test]
fn can_move_items_between_raw_and_processed_queues() {
    let port = BufferPort::new(7, 4);
    create_test_items(0..3).into_iter().for_each(|item| port.push_raw_timeout(item, Duration::ZERO).unwrap());

    assert_eq!(port.id(), 7);
    assert_eq!(port.raw_size(), 3);
    assert_eq!(port.raw_free_capacity(), 1);

    let item = port.pop_raw_timeout(Duration::ZERO).unwrap();
    assert_eq!(item.payload().value, 0);
    port.push_processed_timeout(item, Duration::ZERO).unwrap();

    assert_eq!(port.raw_size(), 2);
    assert_eq!(port.processed_size(), 1);
    assert_eq!(port.try_pop_processed().unwrap().payload().value, 0);
    assert!(port.try_pop_processed().is_err());
}

#[test]
fn can_close_port_and_drain_raw_items() {
    let port = BufferPort::new(0, 4);
    create_test_items(0..2).into_iter().for_each(|item| port.push_raw_timeout(item, Duration::ZERO).unwrap());

    port.close();

    assert!(port.is_closed());
    let result = port.push_processed_timeout(create_test_items(5..6).remove(0), Duration::ZERO);
    assert!(matches!(result, Err(PushError::Closed(_))));
    assert_eq!(port.drain_raw().len(), 2);
    assert_eq!(port.pop_raw_timeout(Duration::from_millis(1)).err(), Some(PopError::Closed));
    assert_eq!(port.pop_processed_timeout(Duration::from_millis(1)).err(), Some(PopError::Closed));
}

#[test]
fn can_time_out_on_full_raw_queue() {
    let port = BufferPort::new(0, 1);
    let mut items = create_test_items(0..2);

    port.push_raw_timeout(items.remove(0), Duration::ZERO).unwrap();
    let result = port.push_raw_timeout(items.remove(0), Duration::from_millis(10));

    match result {
        Err(PushError::TimeOut(item)) => assert_eq!(item.payload().value, 1),
        _ => unreachable!("unexpected result"),
    }
}
