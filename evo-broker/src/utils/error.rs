#[cfg(test)]
#[path = "../../tests/unit/utils/error_test.rs"]
mod error_test;

use std::hash::{Hash, Hasher};

/// A basic error type which, essentially, a wrapper on String type.
#[derive(Clone, Debug)]
pub struct GenericError(String);

/// A type alias for result type with `GenericError`.
pub type GenericResult<T> = Result<T, GenericError>;

impl std::fmt::Display for GenericError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for GenericError {}

impl From<String> for GenericError {
    fn from(msg: String) -> Self {
        Self(msg)
    }
}

impl<'a> From<&'a str> for GenericError {
    fn from(value: &'a str) -> Self {
        Self(value.to_string())
    }
}

impl From<std::io::Error> for GenericError {
    fn from(value: std::io::Error) -> Self {
        Self(value.to_string())
    }
}

impl From<BrokerError> for GenericError {
    fn from(value: BrokerError) -> Self {
        Self(value.to_string())
    }
}

impl PartialEq<Self> for GenericError {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq(&other.0)
    }
}

impl Eq for GenericError {}

impl Hash for GenericError {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

/// Specifies failures which can be observed while distributing work items.
///
/// Errors local to one item or one connection never escape their consumer: only lifecycle
/// errors reach the caller of broker or executor operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    /// An operation did not complete within its time budget. Always recoverable.
    TimeOut,
    /// Broker is shutting down or already closed.
    BrokerClosed,
    /// Broker has not been opened yet.
    NotOpen,
    /// The same consumer instance was enrolled twice.
    AlreadyEnrolled(String),
    /// There is no consumer which can process submitted items.
    NoConsumers,
    /// A remote peer cannot be reached.
    ConnectionFailure(String),
    /// A peer has sent malformed data, the connection cannot be used anymore.
    ProtocolViolation(String),
    /// A work item cannot be encoded or decoded.
    Serialization(String),
}

/// A type alias for result type with `BrokerError`.
pub type BrokerResult<T> = Result<T, BrokerError>;

impl BrokerError {
    /// Returns true if operation can be retried later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BrokerError::TimeOut | BrokerError::ConnectionFailure(_))
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::TimeOut => write!(f, "operation timed out"),
            BrokerError::BrokerClosed => write!(f, "broker is closed"),
            BrokerError::NotOpen => write!(f, "broker is not open yet"),
            BrokerError::AlreadyEnrolled(name) => write!(f, "consumer '{name}' is already enrolled"),
            BrokerError::NoConsumers => write!(f, "no consumers are enrolled"),
            BrokerError::ConnectionFailure(msg) => write!(f, "connection failure: {msg}"),
            BrokerError::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            BrokerError::Serialization(msg) => write!(f, "serialization error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

impl From<std::io::Error> for BrokerError {
    fn from(value: std::io::Error) -> Self {
        BrokerError::ConnectionFailure(value.to_string())
    }
}

impl From<serde_json::Error> for BrokerError {
    fn from(value: serde_json::Error) -> Self {
        BrokerError::Serialization(value.to_string())
    }
}
