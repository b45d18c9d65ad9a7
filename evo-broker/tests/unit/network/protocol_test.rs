use super::*;
use crate::helpers::payload::TestPayload;
use crate::item::ItemId;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};

fn never_stopped() -> bool {
    false
}

/// Fails every read with `WouldBlock` as a socket with expired read timeout does.
struct BlockedReader {
    reads: AtomicUsize,
}

impl Read for BlockedReader {
    fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        Err(ErrorKind::WouldBlock.into())
    }
}

/// Fails a given amount of writes with `TimedOut` as a socket with a full send buffer does, then
/// accepts at most four bytes per call.
struct StallingWriter {
    stalls: usize,
    written: Vec<u8>,
}

impl Write for StallingWriter {
    fn write(&mut self, buffer: &[u8]) -> std::io::Result<usize> {
        if self.stalls > 0 {
            self.stalls -= 1;
            return Err(ErrorKind::TimedOut.into());
        }

        let size = buffer.len().min(4);
        self.written.extend_from_slice(&buffer[..size]);

        Ok(size)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

parameterized_test! {can_encode_and_parse_command, (command, expected_text), {
    let header = encode_command(command).unwrap();
    let text = std::str::from_utf8(&header).unwrap();

    assert_eq!(text.len(), HEADER_WIDTH);
    assert_eq!(text.trim_end(), expected_text);
    assert_eq!(Command::parse(text), Ok(command));
}}

can_encode_and_parse_command! {
    case_01_ready: (Command::Ready, "ready"),
    case_02_result: (Command::Result, "result"),
    case_03_compute: (Command::Compute, "compute"),
    case_04_close: (Command::Close, "close"),
    case_05_idle: (Command::Idle(150), "idle(150)"),
    case_06_idle_max: (Command::Idle(9_999_999_999), "idle(9999999999)"),
}

parameterized_test! {can_reject_unknown_command, text, {
    assert!(matches!(Command::parse(text), Err(BrokerError::ProtocolViolation(_))));
}}

can_reject_unknown_command! {
    case_01_unknown: "hello           ",
    case_02_empty: "                ",
    case_03_idle_no_value: "idle()          ",
    case_04_idle_not_number: "idle(abc)       ",
    case_05_case: "READY           ",
}

#[test]
fn can_reject_too_long_header() {
    assert!(matches!(encode_command(Command::Idle(u64::MAX)), Err(BrokerError::ProtocolViolation(_))));
}

parameterized_test! {can_decode_size, (header, max_payload, expected), {
    assert_eq!(decode_size(header.as_bytes(), max_payload).ok(), expected);
}}

can_decode_size! {
    case_01_zero: ("0000000000000000", 10, Some(0)),
    case_02_hex: ("00000000000000ff", 1000, Some(255)),
    case_03_at_limit: ("0000000000000010", 16, Some(16)),
    case_04_over_limit: ("0000000000000011", 16, None),
    case_05_not_hex: ("00000000000000zz", 1000, None),
    case_06_blank: ("                ", 1000, None),
}

#[test]
fn can_write_and_read_frame() {
    let mut buffer = vec![];
    write_frame(&mut buffer, Command::Compute, b"payload", &never_stopped).unwrap();
    write_command(&mut buffer, Command::Close, &never_stopped).unwrap();
    assert_eq!(buffer.len(), 3 * HEADER_WIDTH + 7);
    assert_eq!(&buffer[HEADER_WIDTH..2 * HEADER_WIDTH], b"0000000000000007");

    let mut reader = Cursor::new(buffer);
    assert_eq!(read_command(&mut reader, &never_stopped), Ok(Command::Compute));
    assert_eq!(read_payload(&mut reader, 100, &never_stopped), Ok(b"payload".to_vec()));
    assert_eq!(read_command(&mut reader, &never_stopped), Ok(Command::Close));
}

#[test]
fn can_fail_on_truncated_frame() {
    let mut buffer = vec![];
    write_frame(&mut buffer, Command::Result, b"payload", &never_stopped).unwrap();
    buffer.truncate(buffer.len() - 2);

    let mut reader = Cursor::new(buffer);
    read_command(&mut reader, &never_stopped).unwrap();

    assert!(matches!(read_payload(&mut reader, 100, &never_stopped), Err(BrokerError::ConnectionFailure(_))));
}

#[test]
fn can_reject_oversized_payload_before_reading_it() {
    let mut buffer = vec![];
    write_frame(&mut buffer, Command::Result, &[0_u8; 32], &never_stopped).unwrap();

    let mut reader = Cursor::new(buffer);
    read_command(&mut reader, &never_stopped).unwrap();

    assert!(matches!(read_payload(&mut reader, 16, &never_stopped), Err(BrokerError::ProtocolViolation(_))));
    assert_eq!(reader.position() as usize, 2 * HEADER_WIDTH);
}

#[test]
fn can_interrupt_blocked_read_on_stop() {
    let mut reader = BlockedReader { reads: AtomicUsize::new(0) };
    let checks = AtomicUsize::new(0);
    let is_stopped = || checks.fetch_add(1, Ordering::Relaxed) >= 2;

    let result = read_command(&mut reader, &is_stopped);

    assert!(matches!(result, Err(BrokerError::ConnectionFailure(_))));
    assert_eq!(reader.reads.load(Ordering::Relaxed), 3);
}

#[test]
fn can_encode_and_decode_item_with_id() {
    let mut item = WorkItem::new(TestPayload::new(7));
    item.assign_id(ItemId { submission_id: 3, position_id: 5 });

    let restored = decode_item::<TestPayload>(encode_item(&item).unwrap().as_slice()).unwrap();

    assert_eq!(restored.id(), item.id());
    assert_eq!(restored.payload().value, 7);
    assert!(restored.is_pending());
}

#[test]
fn can_report_malformed_item_as_serialization_error() {
    assert!(matches!(decode_item::<TestPayload>(b"{not json"), Err(BrokerError::Serialization(_))));
}

#[test]
fn can_complete_stalled_write_when_not_stopped() {
    let mut writer = StallingWriter { stalls: 3, written: vec![] };

    write_command(&mut writer, Command::Ready, &never_stopped).unwrap();

    assert_eq!(writer.stalls, 0);
    assert_eq!(writer.written, encode_command(Command::Ready).unwrap().to_vec());
}

#[test]
fn can_interrupt_stalled_write_on_stop() {
    let mut writer = StallingWriter { stalls: usize::MAX, written: vec![] };
    let checks = AtomicUsize::new(0);
    let is_stopped = || checks.fetch_add(1, Ordering::Relaxed) >= 2;

    let result = write_frame(&mut writer, Command::Result, b"payload", &is_stopped);

    assert!(matches!(result, Err(BrokerError::ConnectionFailure(_))));
    assert_eq!(usize::MAX - writer.stalls, 3);
    assert!(writer.written.is_empty());
}
