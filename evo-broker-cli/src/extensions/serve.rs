//! Runs the demo optimization which distributes evaluations over enrolled consumers.

use super::config::*;
use evo_broker::example::{EvolutionResult, VectorSolution};
use evo_broker::prelude::*;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Runs evolution using a broker with local threads and/or a network consumer, as configured.
/// The stop flag ends both the generation loop and waiting for results. The broker is shut down
/// before returning.
pub fn run_evolution(
    config: &Config,
    environment: Arc<Environment>,
    is_stopped: Arc<AtomicBool>,
) -> Result<EvolutionResult, String> {
    let broker = Arc::new(Broker::<VectorSolution>::new(create_broker_settings(config), environment.clone()));

    let result = enrol_consumers(config, &broker, environment.as_ref()).and_then(|_| {
        let mut executor = BrokerExecutor::new(broker.clone(), create_executor_settings(config)?)
            .map_err(|err| err.to_string())?
            .with_stop_flag(is_stopped.clone());

        create_evolution(config, environment.clone())?
            .with_stop_flag(is_stopped)
            .run(&mut executor)
            .map_err(|err| format!("cannot run evolution: '{err}'"))
    });

    broker.shutdown();

    result
}

fn enrol_consumers(config: &Config, broker: &Broker<VectorSolution>, environment: &Environment) -> Result<(), String> {
    broker.open().map_err(|err| err.to_string())?;

    let threads = get_local_threads(config, environment);
    if threads > 0 {
        broker.enrol(Arc::new(ThreadPoolConsumer::<VectorSolution>::new(threads))).map_err(|err| err.to_string())?;
        (environment.logger)(&format!("local processing uses {threads} thread(s)"));
    }

    if let Some(settings) = create_server_settings(config) {
        let consumer = Arc::new(NetworkConsumer::<VectorSolution>::new(settings));
        broker.enrol(consumer.clone()).map_err(|err| format!("cannot start server: '{err}'"))?;

        if let Some(address) = consumer.local_address() {
            (environment.logger)(&format!("serving remote workers on {address}"));
        }
    }

    if broker.consumers() == 0 {
        return Err("no consumers: set local threads or configure server".to_string());
    }

    Ok(())
}
