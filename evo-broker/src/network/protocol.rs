//! A framing used between the network consumer and remote workers.
//!
//! Every frame starts with a fixed width command header. Frames which carry data are followed
//! by a fixed width hexadecimal size header and exactly that many payload bytes.

#[cfg(test)]
#[path = "../../tests/unit/network/protocol_test.rs"]
mod protocol_test;

use crate::item::WorkItem;
use crate::utils::{BrokerError, BrokerResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::{ErrorKind, Read, Write};

/// A width of command and size headers.
pub const HEADER_WIDTH: usize = 16;

/// A default port used by network consumer.
pub const DEFAULT_PORT: u16 = 10000;

/// A default maximum accepted payload size.
pub const DEFAULT_MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// A command exchanged between server and client.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// Client asks for a work item.
    Ready,
    /// Client returns a processed item, payload follows.
    Result,
    /// Server sends an item to process, payload follows.
    Compute,
    /// Server has no work, client should retry after given amount of milliseconds.
    Idle(u64),
    /// Server asks client to terminate.
    Close,
}

impl Command {
    /// Returns a textual representation of the command.
    pub fn as_text(&self) -> String {
        match self {
            Command::Ready => "ready".to_string(),
            Command::Result => "result".to_string(),
            Command::Compute => "compute".to_string(),
            Command::Idle(millis) => format!("idle({millis})"),
            Command::Close => "close".to_string(),
        }
    }

    /// Parses a command from header text. Trailing padding is ignored.
    pub fn parse(text: &str) -> BrokerResult<Self> {
        let text = text.trim_end();

        match text {
            "ready" => Ok(Command::Ready),
            "result" => Ok(Command::Result),
            "compute" => Ok(Command::Compute),
            "close" => Ok(Command::Close),
            _ => text
                .strip_prefix("idle(")
                .and_then(|rest| rest.strip_suffix(')'))
                .and_then(|millis| millis.parse::<u64>().ok())
                .map(Command::Idle)
                .ok_or_else(|| BrokerError::ProtocolViolation(format!("unknown command: '{text}'"))),
        }
    }

    /// Returns true if the command is followed by size header and payload.
    pub fn has_payload(&self) -> bool {
        matches!(self, Command::Result | Command::Compute)
    }
}

/// Encodes command as a space padded header.
pub fn encode_command(command: Command) -> BrokerResult<[u8; HEADER_WIDTH]> {
    encode_header(command.as_text().as_str())
}

/// Encodes payload size as a zero padded hexadecimal header.
pub fn encode_size(size: usize) -> BrokerResult<[u8; HEADER_WIDTH]> {
    encode_header(format!("{size:016x}").as_str())
}

/// Decodes payload size, rejecting values above `max_payload`.
pub fn decode_size(header: &[u8], max_payload: usize) -> BrokerResult<usize> {
    let text = std::str::from_utf8(header)
        .map_err(|_| BrokerError::ProtocolViolation("size header is not a valid text".to_string()))?
        .trim();

    let size = usize::from_str_radix(text, 16)
        .map_err(|_| BrokerError::ProtocolViolation(format!("invalid size header: '{text}'")))?;

    if size > max_payload {
        return Err(BrokerError::ProtocolViolation(format!("payload size {size} exceeds limit {max_payload}")));
    }

    Ok(size)
}

/// Writes a command without payload.
pub fn write_command<W: Write>(writer: &mut W, command: Command, is_stopped: &dyn Fn() -> bool) -> BrokerResult<()> {
    write_all_interruptibly(writer, &encode_command(command)?, is_stopped)
}

/// Writes a command followed by size header and payload.
pub fn write_frame<W: Write>(
    writer: &mut W,
    command: Command,
    payload: &[u8],
    is_stopped: &dyn Fn() -> bool,
) -> BrokerResult<()> {
    let mut frame = Vec::with_capacity(2 * HEADER_WIDTH + payload.len());
    frame.extend_from_slice(&encode_command(command)?);
    frame.extend_from_slice(&encode_size(payload.len())?);
    frame.extend_from_slice(payload);

    write_all_interruptibly(writer, frame.as_slice(), is_stopped)
}

/// Reads a command header.
pub fn read_command<R: Read>(reader: &mut R, is_stopped: &dyn Fn() -> bool) -> BrokerResult<Command> {
    let mut header = [0_u8; HEADER_WIDTH];
    read_exact_interruptibly(reader, &mut header, is_stopped)?;

    let text = std::str::from_utf8(&header)
        .map_err(|_| BrokerError::ProtocolViolation("command header is not a valid text".to_string()))?;

    Command::parse(text)
}

/// Reads size header and the payload which follows it.
pub fn read_payload<R: Read>(
    reader: &mut R,
    max_payload: usize,
    is_stopped: &dyn Fn() -> bool,
) -> BrokerResult<Vec<u8>> {
    let mut header = [0_u8; HEADER_WIDTH];
    read_exact_interruptibly(reader, &mut header, is_stopped)?;

    let size = decode_size(&header, max_payload)?;
    let mut payload = vec![0_u8; size];
    read_exact_interruptibly(reader, payload.as_mut_slice(), is_stopped)?;

    Ok(payload)
}

/// Serializes work item.
pub fn encode_item<T: Serialize>(item: &WorkItem<T>) -> BrokerResult<Vec<u8>> {
    Ok(serde_json::to_vec(item)?)
}

/// Deserializes work item.
pub fn decode_item<T: DeserializeOwned>(payload: &[u8]) -> BrokerResult<WorkItem<T>> {
    Ok(serde_json::from_slice(payload)?)
}

/// Fills the buffer completely. Read timeouts set on the underlying stream are used as polling
/// points to check the stop flag.
fn read_exact_interruptibly<R: Read>(
    reader: &mut R,
    buffer: &mut [u8],
    is_stopped: &dyn Fn() -> bool,
) -> BrokerResult<()> {
    let mut offset = 0;

    while offset < buffer.len() {
        match reader.read(&mut buffer[offset..]) {
            Ok(0) => return Err(BrokerError::ConnectionFailure("connection is closed by peer".to_string())),
            Ok(read) => offset += read,
            Err(err) if is_poll_point(&err) => {
                if is_stopped() {
                    return Err(BrokerError::ConnectionFailure("reading is interrupted by stop request".to_string()));
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(())
}

/// Writes the buffer completely. Write timeouts set on the underlying stream are used as polling
/// points to check the stop flag, so a peer which stops reading cannot block the caller forever.
fn write_all_interruptibly<W: Write>(writer: &mut W, buffer: &[u8], is_stopped: &dyn Fn() -> bool) -> BrokerResult<()> {
    let mut offset = 0;

    while offset < buffer.len() {
        match writer.write(&buffer[offset..]) {
            Ok(0) => return Err(BrokerError::ConnectionFailure("connection is closed by peer".to_string())),
            Ok(written) => offset += written,
            Err(err) if is_poll_point(&err) => {
                if is_stopped() {
                    return Err(BrokerError::ConnectionFailure("writing is interrupted by stop request".to_string()));
                }
            }
            Err(err) => return Err(err.into()),
        }
    }

    writer.flush()?;

    Ok(())
}

fn is_poll_point(err: &std::io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted)
}

fn encode_header(text: &str) -> BrokerResult<[u8; HEADER_WIDTH]> {
    let bytes = text.as_bytes();
    if bytes.len() > HEADER_WIDTH {
        return Err(BrokerError::ProtocolViolation(format!("header '{text}' is too long")));
    }

    let mut header = [b' '; HEADER_WIDTH];
    header[..bytes.len()].copy_from_slice(bytes);

    Ok(header)
}
