//! This crate exposes a broker which distributes fitness evaluations of population based
//! metaheuristics over local threads and remote workers.
//!
//! # Overview
//!
//! An optimization algorithm hands a population of [`WorkItem`](crate::item::WorkItem)s to an
//! [`Executor`](crate::executor::Executor). A broker based executor submits them to the
//! [`Broker`](crate::broker::Broker), which spreads them over buffer ports of enrolled
//! [`Consumer`](crate::consumer::Consumer)s: an in-process thread pool or a TCP server serving
//! remote workers. Processed items are routed back by submission id to the executor which has
//! submitted them, so several populations can be in flight at the same time.
//!
//! Waiting for results is bounded: when consumers cannot guarantee a full return, the executor
//! uses a timeout adapted to the observed return times and reports items which have not returned
//! as pending, so the algorithm can proceed.

#![warn(missing_docs)]

#[cfg(test)]
#[path = "../tests/helpers/mod.rs"]
#[macro_use]
pub mod helpers;

pub mod broker;
pub mod consumer;
pub mod dispatch;
pub mod example;
pub mod executor;
pub mod item;
pub mod network;
pub mod port;
pub mod prelude;
pub mod queue;
pub mod utils;
