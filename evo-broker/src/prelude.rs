//! This module reimports a common used types.

pub use crate::broker::Broker;
pub use crate::broker::BrokerSettings;
pub use crate::broker::BrokerState;

pub use crate::consumer::Consumer;
pub use crate::consumer::ThreadPoolConsumer;

pub use crate::dispatch::AsyncDispatchQueue;

pub use crate::executor::BrokerExecutor;
pub use crate::executor::Evaluation;
pub use crate::executor::Executor;
pub use crate::executor::ExecutorSettings;
pub use crate::executor::ParallelExecutor;
pub use crate::executor::SerialExecutor;

pub use crate::item::{ItemId, Payload, ProcessingStatus, WorkItem};

pub use crate::network::{ClientSettings, NetworkClient, NetworkConsumer, NetworkConsumerSettings};

pub use crate::queue::BoundedQueue;

pub use crate::utils::Environment;
pub use crate::utils::InfoLogger;
pub use crate::utils::{BrokerError, BrokerResult, GenericError, GenericResult};
pub use crate::utils::{DefaultRandom, Random};
