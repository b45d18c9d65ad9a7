#[cfg(test)]
#[path = "../../tests/unit/network/client_test.rs"]
mod client_test;

use super::protocol::*;
use crate::item::{Payload, WorkItem};
use crate::utils::{BrokerError, BrokerResult, Environment, Timer, sleep_interruptibly};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Specifies remote worker settings.
#[derive(Clone, Debug)]
pub struct ClientSettings {
    /// A server address.
    pub address: String,
    /// A maximum amount of consecutive idle answers before worker terminates. Zero means no limit.
    pub max_stalls: usize,
    /// A maximum amount of consecutive failed connection attempts.
    pub max_connection_attempts: usize,
    /// A delay between connection attempts.
    pub connection_retry_delay: Duration,
    /// Whether items which have failed processing are sent back.
    pub return_regardless: bool,
    /// A maximum amount of items to process. Zero means no limit.
    pub process_max: usize,
    /// A maximum running time.
    pub max_duration: Option<Duration>,
    /// A socket read and write timeout, used as a polling interval for the stop flag.
    pub io_timeout: Duration,
    /// A maximum accepted payload size.
    pub max_payload: usize,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            address: format!("127.0.0.1:{DEFAULT_PORT}"),
            max_stalls: 10,
            max_connection_attempts: 10,
            connection_retry_delay: Duration::from_secs(1),
            return_regardless: true,
            process_max: 0,
            max_duration: None,
            io_timeout: Duration::from_millis(100),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Specifies why remote worker has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop was requested.
    Stopped,
    /// Server had no work too many times in a row.
    MaxStalls,
    /// Maximum amount of items is processed.
    ProcessMax,
    /// Maximum running time is exceeded.
    MaxDuration,
    /// Server has asked to terminate.
    ServerClosed,
}

/// Summarizes remote worker run.
#[derive(Clone, Debug)]
pub struct WorkerReport {
    /// Amount of items processed successfully.
    pub processed: usize,
    /// Amount of items which have failed processing.
    pub failed: usize,
    /// Total amount of idle answers.
    pub stalls: usize,
    /// Amount of connections established.
    pub connections: usize,
    /// A reason to finish.
    pub reason: ExitReason,
}

impl WorkerReport {
    fn new() -> Self {
        Self { processed: 0, failed: 0, stalls: 0, connections: 0, reason: ExitReason::Stopped }
    }

    fn finish(mut self, reason: ExitReason) -> Self {
        self.reason = reason;
        self
    }
}

/// A remote worker: asks a network consumer for items, processes them and sends results back.
pub struct NetworkClient<T> {
    settings: ClientSettings,
    environment: Arc<Environment>,
    is_stopped: Arc<AtomicBool>,
    _marker: PhantomData<fn(T)>,
}

impl<T> NetworkClient<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    /// Creates a new instance of `NetworkClient`.
    pub fn new(settings: ClientSettings, environment: Arc<Environment>) -> Self {
        Self { settings, environment, is_stopped: Arc::new(AtomicBool::new(false)), _marker: PhantomData }
    }

    /// Returns a flag which stops the worker once raised.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.is_stopped.clone()
    }

    /// Requests worker to stop.
    pub fn stop(&self) {
        self.is_stopped.store(true, Ordering::Release);
    }

    /// Runs worker loop until one of halt conditions is met. Returns `ConnectionFailure` when
    /// server cannot be reached within configured amount of attempts.
    pub fn run(&self) -> BrokerResult<WorkerReport> {
        let timer = Timer::start();
        let mut report = WorkerReport::new();
        let mut consecutive_stalls = 0;
        let mut connection: Option<TcpStream> = None;

        loop {
            if let Some(reason) = self.get_halt_reason(&report, &timer) {
                if let Some(stream) = connection.as_mut() {
                    let _ = write_command(stream, Command::Close, &|| true);
                }
                return Ok(report.finish(reason));
            }

            if connection.is_none() {
                match self.connect()? {
                    Some(stream) => {
                        report.connections += 1;
                        connection = Some(stream);
                    }
                    None => return Ok(report.finish(ExitReason::Stopped)),
                }
            }

            let Some(stream) = connection.as_mut() else { continue };

            match self.exchange(stream, &mut report) {
                Ok(Reply::Processed) => consecutive_stalls = 0,
                Ok(Reply::Idle(millis)) => {
                    consecutive_stalls += 1;
                    report.stalls += 1;

                    if self.settings.max_stalls > 0 && consecutive_stalls >= self.settings.max_stalls {
                        self.log(&format!("server had no work {consecutive_stalls} time(s) in a row"));
                        let _ = write_command(stream, Command::Close, &|| true);
                        return Ok(report.finish(ExitReason::MaxStalls));
                    }

                    self.back_off(millis);
                }
                Ok(Reply::Close) => return Ok(report.finish(ExitReason::ServerClosed)),
                Err(ExchangeError::Resend(item)) => {
                    connection = None;
                    self.resend(item, &mut connection, &mut report)?;
                }
                Err(ExchangeError::Broken(err)) => {
                    if !self.is_stopped() {
                        self.log(&format!("connection is dropped: {err}"));
                    }
                    connection = None;
                }
            }
        }
    }

    /// Asks for one item and processes it.
    fn exchange(&self, stream: &mut TcpStream, report: &mut WorkerReport) -> Result<Reply, ExchangeError<T>> {
        let is_stopped = || self.is_stopped();

        write_command(stream, Command::Ready, &is_stopped)?;

        match read_command(stream, &is_stopped)? {
            Command::Compute => {
                let payload = read_payload(stream, self.settings.max_payload, &is_stopped)?;
                let mut item = decode_item::<T>(payload.as_slice())
                    .map_err(|err| BrokerError::ProtocolViolation(format!("cannot decode item: {err}")))?;

                item.process();

                if item.has_errors() {
                    report.failed += 1;
                    if !self.settings.return_regardless {
                        return Ok(Reply::Processed);
                    }
                } else {
                    report.processed += 1;
                }

                let payload = encode_item(&item)?;
                write_frame(stream, Command::Result, payload.as_slice(), &is_stopped)
                    .map_err(|_| ExchangeError::Resend(item))?;

                Ok(Reply::Processed)
            }
            Command::Idle(millis) => Ok(Reply::Idle(millis)),
            Command::Close => Ok(Reply::Close),
            command @ (Command::Ready | Command::Result) => Err(BrokerError::ProtocolViolation(format!(
                "unexpected command from server: '{}'",
                command.as_text()
            ))
            .into()),
        }
    }

    /// Reconnects and sends the result once more. The item is given up if it fails again.
    fn resend(
        &self,
        item: WorkItem<T>,
        connection: &mut Option<TcpStream>,
        report: &mut WorkerReport,
    ) -> BrokerResult<()> {
        let Some(mut stream) = self.connect()? else {
            return Ok(());
        };
        report.connections += 1;

        let payload = encode_item(&item)?;
        match write_frame(&mut stream, Command::Result, payload.as_slice(), &|| self.is_stopped()) {
            Ok(_) => *connection = Some(stream),
            Err(err) => self.log(&format!("result of item {:?} is lost: {err}", item.id())),
        }

        Ok(())
    }

    /// Connects to the server. Returns `None` if stop is requested while connecting.
    fn connect(&self) -> BrokerResult<Option<TcpStream>> {
        let attempts = self.settings.max_connection_attempts.max(1);

        for attempt in 1..=attempts {
            if self.is_stopped() {
                return Ok(None);
            }

            match self.try_connect() {
                Ok(stream) => return Ok(Some(stream)),
                Err(err) => {
                    let address = self.settings.address.as_str();
                    self.log(&format!("connection attempt {attempt}/{attempts} to {address} failed: {err}"))
                }
            }

            if attempt < attempts
                && !sleep_interruptibly(self.settings.connection_retry_delay, self.settings.io_timeout, || {
                    self.is_stopped()
                })
            {
                return Ok(None);
            }
        }

        Err(BrokerError::ConnectionFailure(format!(
            "cannot connect to {} after {attempts} attempt(s)",
            self.settings.address
        )))
    }

    fn try_connect(&self) -> BrokerResult<TcpStream> {
        let address = self
            .settings
            .address
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| BrokerError::ConnectionFailure(format!("cannot resolve '{}'", self.settings.address)))?;

        let timeout = self.settings.io_timeout.max(Duration::from_millis(100)) * 10;
        let stream = TcpStream::connect_timeout(&address, timeout)?;
        stream.set_nodelay(true)?;
        let io_timeout = self.settings.io_timeout.max(Duration::from_millis(1));
        stream.set_read_timeout(Some(io_timeout))?;
        stream.set_write_timeout(Some(io_timeout))?;

        Ok(stream)
    }

    fn back_off(&self, millis: u64) {
        let jitter = self.environment.random.uniform_int(0, (millis / 10).min(i32::MAX as u64) as i32) as u64;
        let duration = Duration::from_millis(millis + jitter);

        sleep_interruptibly(duration, self.settings.io_timeout, || self.is_stopped());
    }

    fn get_halt_reason(&self, report: &WorkerReport, timer: &Timer) -> Option<ExitReason> {
        if self.is_stopped() {
            return Some(ExitReason::Stopped);
        }

        if self.settings.process_max > 0 && report.processed + report.failed >= self.settings.process_max {
            return Some(ExitReason::ProcessMax);
        }

        if self.settings.max_duration.is_some_and(|max_duration| timer.elapsed() >= max_duration) {
            return Some(ExitReason::MaxDuration);
        }

        None
    }

    fn is_stopped(&self) -> bool {
        self.is_stopped.load(Ordering::Acquire)
    }

    fn log(&self, message: &str) {
        (self.environment.logger)(message)
    }
}

enum Reply {
    Processed,
    Idle(u64),
    Close,
}

enum ExchangeError<T> {
    /// Connection is unusable.
    Broken(BrokerError),
    /// Result could not be sent back.
    Resend(WorkItem<T>),
}

impl<T> From<BrokerError> for ExchangeError<T> {
    fn from(value: BrokerError) -> Self {
        ExchangeError::Broken(value)
    }
}
