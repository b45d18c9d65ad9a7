#[cfg(test)]
#[path = "../../tests/unit/network/server_test.rs"]
mod server_test;

use super::protocol::*;
use crate::consumer::{Consumer, ConsumerContext};
use crate::dispatch::AsyncDispatchQueue;
use crate::item::{Payload, WorkItem};
use crate::queue::PopError;
use crate::utils::{BrokerError, BrokerResult, GenericResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

/// The longest idle hint which fits into the command header.
const MAX_IDLE_MILLIS: u64 = 9_999_999_999;

/// Specifies network consumer settings.
#[derive(Clone, Debug)]
pub struct NetworkConsumerSettings {
    /// An address to listen on.
    pub address: String,
    /// A maximum amount of simultaneously served workers. Extra connections are closed.
    pub max_sessions: usize,
    /// A back-off suggested to a worker when there is no work.
    pub idle_hint: Duration,
    /// A socket read and write timeout, used as a polling interval for the stop flag.
    pub io_timeout: Duration,
    /// A maximum accepted payload size.
    pub max_payload: usize,
}

impl Default for NetworkConsumerSettings {
    fn default() -> Self {
        Self {
            address: format!("0.0.0.0:{DEFAULT_PORT}"),
            max_sessions: 64,
            idle_hint: Duration::from_millis(100),
            io_timeout: Duration::from_millis(100),
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }
}

struct ServerRuntime<T> {
    context: ConsumerContext<T>,
    acceptor: JoinHandle<()>,
    sessions: Arc<AsyncDispatchQueue>,
}

/// A consumer which serves work items to remote workers connected over TCP.
///
/// Items taken by a worker which disconnects before returning them are put back to the
/// processed queue unprocessed, so the executor learns about them without waiting.
pub struct NetworkConsumer<T> {
    settings: NetworkConsumerSettings,
    local_address: Mutex<Option<SocketAddr>>,
    runtime: Mutex<Option<ServerRuntime<T>>>,
    _marker: PhantomData<fn(T)>,
}

impl<T> NetworkConsumer<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    /// Creates a new instance of `NetworkConsumer`.
    pub fn new(settings: NetworkConsumerSettings) -> Self {
        Self { settings, local_address: Mutex::new(None), runtime: Mutex::new(None), _marker: PhantomData }
    }

    /// Returns an address the consumer listens on once it is running.
    pub fn local_address(&self) -> Option<SocketAddr> {
        *self.local_address.lock().unwrap_or_else(|err| err.into_inner())
    }
}

impl<T> Consumer<T> for NetworkConsumer<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    fn name(&self) -> String {
        format!("network consumer ({})", self.settings.address)
    }

    fn run(&self, context: ConsumerContext<T>) -> GenericResult<()> {
        let mut runtime = self.runtime.lock().unwrap_or_else(|err| err.into_inner());
        if runtime.is_some() {
            return Err("network consumer is already running".into());
        }

        let listener = TcpListener::bind(self.settings.address.as_str())
            .map_err(|err| format!("cannot listen on '{}': {err}", self.settings.address))?;
        listener.set_nonblocking(true)?;

        let address = listener.local_addr()?;
        *self.local_address.lock().unwrap_or_else(|err| err.into_inner()) = Some(address);

        let max_sessions = self.settings.max_sessions.max(1);
        let sessions = Arc::new(AsyncDispatchQueue::new(
            "session",
            max_sessions,
            max_sessions,
            context.environment.logger.clone(),
        ));

        let acceptor = {
            let context = context.clone();
            let sessions = sessions.clone();
            let settings = self.settings.clone();

            std::thread::Builder::new()
                .name("session-acceptor".to_string())
                .spawn(move || accept_connections::<T>(listener, context, sessions, settings))?
        };

        context.log(&format!("network consumer is listening on {address}"));
        *runtime = Some(ServerRuntime { context, acceptor, sessions });

        Ok(())
    }

    fn stop(&self) {
        let runtime = self.runtime.lock().unwrap_or_else(|err| err.into_inner()).take();

        if let Some(runtime) = runtime {
            runtime.context.request_stop();

            if runtime.acceptor.join().is_err() {
                runtime.context.log("session acceptor has terminated abnormally");
            }

            runtime.sessions.stop();
        }
    }

    fn is_full_return_capable(&self) -> bool {
        false
    }
}

fn accept_connections<T>(
    listener: TcpListener,
    context: ConsumerContext<T>,
    sessions: Arc<AsyncDispatchQueue>,
    settings: NetworkConsumerSettings,
) where
    T: Payload + Serialize + DeserializeOwned,
{
    let active = Arc::new(AtomicUsize::new(0));
    let max_sessions = settings.max_sessions.max(1);

    while !context.is_stopped() {
        let (mut stream, peer) = match listener.accept() {
            Ok(connection) => connection,
            Err(err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(context.poll_interval);
                continue;
            }
            Err(err) => {
                context.log(&format!("cannot accept connection: {err}"));
                std::thread::sleep(context.poll_interval);
                continue;
            }
        };

        if let Err(err) = configure_stream(&stream, &settings) {
            context.log(&format!("cannot configure connection with {peer}: {err}"));
            continue;
        }

        if active.load(Ordering::Acquire) >= max_sessions {
            context.log(&format!("rejecting {peer}: {max_sessions} session(s) are already active"));
            let _ = write_command(&mut stream, Command::Close, &|| true);
            continue;
        }

        active.fetch_add(1, Ordering::AcqRel);

        let context = context.clone();
        let settings = settings.clone();
        let active = active.clone();

        sessions.dispatch(move || {
            let mut session = Session { stream, peer, context, settings, outstanding: None };
            session.serve();
            active.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

fn configure_stream(stream: &TcpStream, settings: &NetworkConsumerSettings) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let io_timeout = settings.io_timeout.max(Duration::from_millis(1));
    stream.set_read_timeout(Some(io_timeout))?;
    stream.set_write_timeout(Some(io_timeout))?;

    Ok(())
}

/// Serves one worker connection.
struct Session<T> {
    stream: TcpStream,
    peer: SocketAddr,
    context: ConsumerContext<T>,
    settings: NetworkConsumerSettings,
    outstanding: Option<WorkItem<T>>,
}

impl<T> Session<T>
where
    T: Payload + Serialize + DeserializeOwned,
{
    fn serve(&mut self) {
        self.context.log(&format!("worker {} is connected", self.peer));

        let result = loop {
            if self.context.is_stopped() {
                let _ = self.send(Command::Close, None);
                break Ok(());
            }

            match self.exchange() {
                Ok(true) => continue,
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        if let Some(item) = self.outstanding.take() {
            self.context.log(&format!("item {:?} is returned unprocessed: worker {} has gone", item.id(), self.peer));
            self.context.return_item(item);
        }

        match result {
            Ok(_) => self.context.log(&format!("worker {} is disconnected", self.peer)),
            Err(err) => self.context.log(&format!("worker {} is dropped: {err}", self.peer)),
        }
    }

    /// Handles one request. Returns false when the session should end gracefully.
    fn exchange(&mut self) -> BrokerResult<bool> {
        let context = self.context.clone();
        let is_stopped = move || context.is_stopped();

        match read_command(&mut self.stream, &is_stopped)? {
            Command::Ready => self.send_work(),
            Command::Result => {
                let payload = read_payload(&mut self.stream, self.settings.max_payload, &is_stopped)?;
                let item = decode_item::<T>(payload.as_slice())
                    .map_err(|err| BrokerError::ProtocolViolation(format!("cannot decode result: {err}")))?;

                if self.outstanding.as_ref().is_some_and(|outstanding| outstanding.id() == item.id()) {
                    self.outstanding = None;
                }

                self.context.return_item(item);

                Ok(true)
            }
            Command::Close => Ok(false),
            command @ (Command::Compute | Command::Idle(_)) => {
                Err(BrokerError::ProtocolViolation(format!("unexpected command from worker: '{}'", command.as_text())))
            }
        }
    }

    fn send_work(&mut self) -> BrokerResult<bool> {
        // NOTE worker asks for more work without returning the previous item: it has given up on it
        if let Some(item) = self.outstanding.take() {
            self.context.return_item(item);
        }

        match self.context.port.pop_raw_timeout(self.context.poll_interval) {
            Ok(mut item) => match encode_item(&item) {
                Ok(payload) => {
                    let result = self.send(Command::Compute, Some(payload.as_slice()));
                    self.outstanding = Some(item);
                    result.map(|_| true)
                }
                Err(err) => {
                    item.mark_failed(format!("cannot encode item: {err}"));
                    self.context.return_item(item);
                    self.send_idle()
                }
            },
            Err(PopError::TimeOut) => self.send_idle(),
            Err(PopError::Closed) => {
                self.send(Command::Close, None)?;
                Ok(false)
            }
        }
    }

    fn send_idle(&mut self) -> BrokerResult<bool> {
        let millis = (self.settings.idle_hint.as_millis() as u64).min(MAX_IDLE_MILLIS);
        self.send(Command::Idle(millis), None)?;

        Ok(true)
    }

    /// Writes a command giving up on a worker which does not read once stop is requested.
    fn send(&mut self, command: Command, payload: Option<&[u8]>) -> BrokerResult<()> {
        let context = self.context.clone();
        let is_stopped = move || context.is_stopped();

        match payload {
            Some(payload) => write_frame(&mut self.stream, command, payload, &is_stopped),
            None => write_command(&mut self.stream, command, &is_stopped),
        }
    }
}
