#[cfg(test)]
#[path = "../../tests/unit/commands/work_test.rs"]
mod work_test;

use super::*;

use evo_broker_cli::extensions::config::{ClientConfig, Config};
use evo_broker_cli::extensions::interruption::register_interruption_flag;
use evo_broker_cli::extensions::work::{create_worker, describe_report};

const ADDRESS_ARG_NAME: &str = "address";
const STALLS_ARG_NAME: &str = "max-stalls";
const PROCESS_MAX_ARG_NAME: &str = "process-max";
const TIME_ARG_NAME: &str = "max-time";

pub fn get_work_app() -> Command {
    let command = Command::new("work")
        .about("Runs remote worker which evaluates items served by another process")
        .arg(
            Arg::new(ADDRESS_ARG_NAME)
                .help("Specifies server address, e.g. 127.0.0.1:10000")
                .short('a')
                .long(ADDRESS_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(STALLS_ARG_NAME)
                .help("Specifies how many idle answers in a row stop worker, zero means no limit")
                .long(STALLS_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(PROCESS_MAX_ARG_NAME)
                .help("Specifies max amount of items to process, zero means no limit")
                .long(PROCESS_MAX_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(TIME_ARG_NAME)
                .help("Specifies max time worker runs in seconds")
                .short('t')
                .long(TIME_ARG_NAME)
                .required(false),
        );

    add_common_args(command)
}

/// Runs remote worker.
pub fn run_work(matches: &ArgMatches) -> Result<(), String> {
    let mut config = get_config(matches)?;
    apply_work_args(matches, &mut config)?;

    let environment = create_environment(matches, &config);
    let worker = create_worker(&config, environment);
    register_interruption_flag(&worker.stop_handle())?;

    let report = worker.run().map_err(|err| format!("worker has failed: '{err}'"))?;
    println!("{}", describe_report(&report));

    Ok(())
}

fn apply_work_args(matches: &ArgMatches, config: &mut Config) -> Result<(), String> {
    let max_stalls = parse_int_value::<usize>(matches, STALLS_ARG_NAME, "max stalls")?;
    let process_max = parse_int_value::<usize>(matches, PROCESS_MAX_ARG_NAME, "process max")?;
    let max_duration_secs = parse_int_value::<u64>(matches, TIME_ARG_NAME, "max time")?;

    let client = config.client.get_or_insert_with(ClientConfig::default);
    client.address = matches.get_one::<String>(ADDRESS_ARG_NAME).cloned().or(client.address.take());
    client.max_stalls = max_stalls.or(client.max_stalls);
    client.process_max = process_max.or(client.process_max);
    client.max_duration_secs = max_duration_secs.or(client.max_duration_secs);

    Ok(())
}
