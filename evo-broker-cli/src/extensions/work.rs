//! Runs a remote worker which evaluates demo solutions.

use super::config::{Config, create_client_settings};
use evo_broker::example::VectorSolution;
use evo_broker::network::{ExitReason, WorkerReport};
use evo_broker::prelude::*;
use std::sync::Arc;

/// Creates a remote worker from config.
pub fn create_worker(config: &Config, environment: Arc<Environment>) -> NetworkClient<VectorSolution> {
    NetworkClient::new(create_client_settings(config), environment)
}

/// Describes how worker has finished.
pub fn describe_report(report: &WorkerReport) -> String {
    let reason = match report.reason {
        ExitReason::Stopped => "stopped",
        ExitReason::MaxStalls => "no work from server",
        ExitReason::ProcessMax => "processed enough items",
        ExitReason::MaxDuration => "time is over",
        ExitReason::ServerClosed => "server has closed connection",
    };

    format!(
        "worker has finished, reason: {reason}, processed: {}, failed: {}, stalls: {}, connections: {}",
        report.processed, report.failed, report.stalls, report.connections
    )
}
