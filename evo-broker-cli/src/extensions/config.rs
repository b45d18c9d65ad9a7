//! Run configuration.

#[cfg(test)]
#[path = "../../tests/unit/extensions/config_test.rs"]
mod config_test;

use evo_broker::example::{Evolution, FunctionKind, MutationMode};
use evo_broker::prelude::*;
use evo_broker::utils::Noise;
use serde::Deserialize;
use std::io::{BufReader, Read};
use std::sync::Arc;
use std::time::Duration;

/// A run configuration.
#[derive(Clone, Default, Deserialize, Debug)]
pub struct Config {
    /// Specifies evolution configuration.
    pub evolution: Option<EvolutionConfig>,
    /// Specifies broker configuration.
    pub broker: Option<BrokerConfig>,
    /// Specifies how long generations wait for results.
    pub executor: Option<ExecutorConfig>,
    /// Specifies network consumer. When omitted, no remote workers are served.
    pub server: Option<ServerConfig>,
    /// Specifies remote worker configuration.
    pub client: Option<ClientConfig>,
    /// Specifies logging configuration.
    pub logging: Option<LoggingConfig>,
}

/// An evolution configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct EvolutionConfig {
    /// A benchmark function to minimize. Default is rosenbrock.
    pub function: Option<FunctionKind>,
    /// Amount of dimensions of random initial solutions. Default is 2.
    pub dimensions: Option<usize>,
    /// Initial solutions. When omitted, random ones are generated.
    pub initial: Option<Vec<Vec<f64>>>,
    /// Amount of parents. Default is 4.
    pub parents: Option<usize>,
    /// Amount of offspring per generation. Default is 16.
    pub offspring: Option<usize>,
    /// An artificial delay of every evaluation in milliseconds.
    pub delay_ms: Option<u64>,
    /// Mutation operators. When omitted, default ones are used.
    pub mutation: Option<Vec<MutationConfig>>,
    /// Termination criteria.
    pub termination: Option<TerminationConfig>,
}

/// A mutation operator configuration.
#[derive(Clone, Deserialize, Debug)]
#[serde(tag = "type")]
pub enum MutationConfig {
    /// Adds noise to every dimension.
    #[serde(rename(deserialize = "noise"))]
    Noise {
        /// A probability to pick this operator.
        weight: f64,
        /// A probability to change a dimension.
        probability: f64,
        /// A noise range.
        range: (f64, f64),
    },

    /// Adds noise to specific dimensions only.
    #[serde(rename(deserialize = "dimension-noise"))]
    DimensionNoise {
        /// A probability to pick this operator.
        weight: f64,
        /// A probability to change a dimension.
        probability: f64,
        /// A noise range.
        range: (f64, f64),
        /// Dimensions to change.
        dimensions: Vec<usize>,
    },
}

/// A termination configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TerminationConfig {
    /// Max running time in seconds.
    pub max_time: Option<u64>,
    /// Max amount of generations. Default is 100.
    pub max_generations: Option<usize>,
    /// A fitness which is good enough to stop.
    pub target_fitness: Option<f64>,
}

/// A broker configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfig {
    /// Amount of local worker threads. Zero disables local processing. Default is number of cpus.
    pub threads: Option<usize>,
    /// A capacity of broker queues.
    pub queue_capacity: Option<usize>,
    /// A poll interval of blocking operations in milliseconds.
    pub poll_interval_ms: Option<u64>,
    /// A time given to put an item into a full port in milliseconds.
    pub submit_timeout_ms: Option<u64>,
    /// How many latest submissions keep their routes for late items.
    pub route_history: Option<usize>,
}

/// An executor configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecutorConfig {
    /// Scales adaptive timeout. Zero means waiting for all items.
    pub wait_factor: Option<f64>,
    /// A fraction of items in `[0, 1]` after which generation proceeds.
    pub min_partial_return: Option<f64>,
    /// How many times pending items are resubmitted within a generation.
    pub max_resubmissions: Option<usize>,
    /// An absolute limit on waiting for a generation in seconds.
    pub max_wait_secs: Option<f64>,
    /// After how many pending reports an item is considered failed. Zero means never.
    pub max_item_misses: Option<usize>,
}

/// A network consumer configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// An address to listen on.
    pub address: Option<String>,
    /// A maximum amount of connected workers.
    pub max_sessions: Option<usize>,
    /// A back-off suggested to workers when there is no work, in milliseconds.
    pub idle_hint_ms: Option<u64>,
    /// A socket read timeout in milliseconds.
    pub io_timeout_ms: Option<u64>,
    /// A maximum payload size in bytes.
    pub max_payload: Option<usize>,
}

/// A remote worker configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ClientConfig {
    /// A server address.
    pub address: Option<String>,
    /// Max consecutive idle answers. Zero means no limit.
    pub max_stalls: Option<usize>,
    /// Max consecutive connection attempts.
    pub max_connection_attempts: Option<usize>,
    /// A delay between connection attempts in milliseconds.
    pub connection_retry_delay_ms: Option<u64>,
    /// Whether failed items are sent back.
    pub return_regardless: Option<bool>,
    /// Max amount of items to process. Zero means no limit.
    pub process_max: Option<usize>,
    /// Max running time in seconds.
    pub max_duration_secs: Option<u64>,
    /// A socket read timeout in milliseconds.
    pub io_timeout_ms: Option<u64>,
    /// A maximum payload size in bytes.
    pub max_payload: Option<usize>,
}

/// A logging configuration.
#[derive(Clone, Default, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Specifies whether logging is enabled.
    pub enabled: bool,
    /// How often (in generations) the best solution is logged.
    pub log_best: Option<usize>,
}

/// Reads config from reader.
pub fn read_config<R: Read>(reader: BufReader<R>) -> Result<Config, String> {
    serde_json::from_reader(reader).map_err(|err| format!("cannot deserialize config: '{err}'"))
}

/// Returns whether logging is enabled in config.
pub fn is_logging_enabled(config: &Config) -> bool {
    config.logging.as_ref().is_some_and(|logging| logging.enabled)
}

/// Returns amount of local worker threads.
pub fn get_local_threads(config: &Config, environment: &Environment) -> usize {
    config.broker.as_ref().and_then(|broker| broker.threads).unwrap_or(environment.available_cpus)
}

/// Creates broker settings from config.
pub fn create_broker_settings(config: &Config) -> BrokerSettings {
    let defaults = BrokerSettings::default();

    match config.broker.as_ref() {
        Some(broker) => BrokerSettings {
            queue_capacity: broker.queue_capacity.unwrap_or(defaults.queue_capacity),
            poll_interval: broker.poll_interval_ms.map(Duration::from_millis).unwrap_or(defaults.poll_interval),
            submit_timeout: broker.submit_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.submit_timeout),
            route_history: broker.route_history.unwrap_or(defaults.route_history),
        },
        None => defaults,
    }
}

/// Creates executor settings from config.
pub fn create_executor_settings(config: &Config) -> Result<ExecutorSettings, String> {
    let defaults = ExecutorSettings::default();
    let Some(executor) = config.executor.as_ref() else { return Ok(defaults) };

    let wait_factor = executor.wait_factor.unwrap_or(defaults.wait_factor);
    if !wait_factor.is_finite() || wait_factor < 0. {
        return Err(format!("wait factor must be a non-negative number, got: {wait_factor}"));
    }

    let min_partial_return = executor.min_partial_return.unwrap_or(defaults.min_partial_return);
    if !(0. ..=1.).contains(&min_partial_return) {
        return Err(format!("min partial return must be in [0, 1] range, got: {min_partial_return}"));
    }

    let max_wait = match executor.max_wait_secs {
        Some(secs) if secs.is_finite() && secs > 0. => Duration::from_secs_f64(secs),
        Some(secs) => return Err(format!("max wait must be a positive number, got: {secs}")),
        None => defaults.max_wait,
    };

    Ok(ExecutorSettings {
        wait_factor,
        min_partial_return,
        max_resubmissions: executor.max_resubmissions.unwrap_or(defaults.max_resubmissions),
        max_wait,
        max_item_misses: executor.max_item_misses.unwrap_or(defaults.max_item_misses),
    })
}

/// Creates network consumer settings when server is configured.
pub fn create_server_settings(config: &Config) -> Option<NetworkConsumerSettings> {
    config.server.as_ref().map(|server| {
        let defaults = NetworkConsumerSettings::default();

        NetworkConsumerSettings {
            address: server.address.clone().unwrap_or(defaults.address),
            max_sessions: server.max_sessions.unwrap_or(defaults.max_sessions),
            idle_hint: server.idle_hint_ms.map(Duration::from_millis).unwrap_or(defaults.idle_hint),
            io_timeout: server.io_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.io_timeout),
            max_payload: server.max_payload.unwrap_or(defaults.max_payload),
        }
    })
}

/// Creates remote worker settings from config.
pub fn create_client_settings(config: &Config) -> ClientSettings {
    let defaults = ClientSettings::default();
    let Some(client) = config.client.as_ref() else { return defaults };

    ClientSettings {
        address: client.address.clone().unwrap_or(defaults.address),
        max_stalls: client.max_stalls.unwrap_or(defaults.max_stalls),
        max_connection_attempts: client.max_connection_attempts.unwrap_or(defaults.max_connection_attempts),
        connection_retry_delay: client
            .connection_retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.connection_retry_delay),
        return_regardless: client.return_regardless.unwrap_or(defaults.return_regardless),
        process_max: client.process_max.unwrap_or(defaults.process_max),
        max_duration: client.max_duration_secs.map(Duration::from_secs).or(defaults.max_duration),
        io_timeout: client.io_timeout_ms.map(Duration::from_millis).unwrap_or(defaults.io_timeout),
        max_payload: client.max_payload.unwrap_or(defaults.max_payload),
    }
}

/// Creates evolution from config.
pub fn create_evolution(config: &Config, environment: Arc<Environment>) -> Result<Evolution, String> {
    let evolution = config.evolution.clone().unwrap_or_default();
    let random = environment.random.clone();

    let function = evolution.function.unwrap_or(FunctionKind::Rosenbrock);
    let dimensions = evolution.dimensions.unwrap_or(2).max(function.min_dimension());
    let parents = evolution.parents.unwrap_or(4);
    let offspring = evolution.offspring.unwrap_or(16);

    let initial = evolution.initial.unwrap_or_else(|| {
        (0..parents).map(|_| (0..dimensions).map(|_| random.uniform_real(-2., 2.)).collect()).collect()
    });

    let operators = match evolution.mutation {
        Some(mutation) if mutation.is_empty() => return Err("mutation operators cannot be empty".to_string()),
        Some(mutation) => mutation.into_iter().map(|mutation| create_operator(mutation, random.clone())).collect(),
        None => get_default_operators(dimensions, random),
    };

    let termination = evolution.termination.unwrap_or_default();
    let log_best = config.logging.as_ref().and_then(|logging| logging.log_best).unwrap_or(10);

    let evolution = Evolution::new(function, environment)
        .with_init_solutions(initial)
        .with_sizes(parents, offspring)
        .with_termination(
            termination.max_time.map(Duration::from_secs),
            termination.max_generations.or(Some(100)),
            termination.target_fitness,
        )
        .with_delay(Duration::from_millis(evolution.delay_ms.unwrap_or(0)))
        .with_log_best(log_best);

    Ok(operators.into_iter().fold(evolution, |evolution, (mode, weight)| evolution.with_operator(mode, weight)))
}

fn create_operator(mutation: MutationConfig, random: Arc<dyn Random + Send + Sync>) -> (MutationMode, f64) {
    match mutation {
        MutationConfig::Noise { weight, probability, range } => {
            (MutationMode::JustNoise(Noise::new(probability, range, random)), weight)
        }
        MutationConfig::DimensionNoise { weight, probability, range, dimensions } => (
            MutationMode::DimensionNoise(Noise::new(probability, range, random), dimensions.into_iter().collect()),
            weight,
        ),
    }
}

fn get_default_operators(dimensions: usize, random: Arc<dyn Random + Send + Sync>) -> Vec<(MutationMode, f64)> {
    let dimension_weight = 0.5 / dimensions.max(1) as f64;

    vec![
        (MutationMode::JustNoise(Noise::new(1., (-0.05, 0.05), random.clone())), 0.3),
        (MutationMode::JustNoise(Noise::new(1., (0., 0.1), random.clone())), 0.1),
        (MutationMode::JustNoise(Noise::new(1., (-0.1, 0.), random.clone())), 0.1),
    ]
    .into_iter()
    .chain((0..dimensions).map(|dimension| {
        let mode = MutationMode::DimensionNoise(
            Noise::new(1., (-0.1, 0.1), random.clone()),
            std::iter::once(dimension).collect(),
        );
        (mode, dimension_weight)
    }))
    .collect()
}
