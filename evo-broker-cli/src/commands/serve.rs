#[cfg(test)]
#[path = "../../tests/unit/commands/serve_test.rs"]
mod serve_test;

use super::*;

use evo_broker::example::FunctionKind;
use evo_broker_cli::extensions::config::*;
use evo_broker_cli::extensions::interruption::register_interruption_flag;
use evo_broker_cli::extensions::serve::run_evolution;
use std::sync::atomic::AtomicBool;

const FUNCTION_ARG_NAME: &str = "function";
const DIMENSIONS_ARG_NAME: &str = "dimensions";
const THREADS_ARG_NAME: &str = "threads";
const LISTEN_ARG_NAME: &str = "listen";
const GENERATIONS_ARG_NAME: &str = "max-generations";
const TIME_ARG_NAME: &str = "max-time";
const TARGET_ARG_NAME: &str = "target-fitness";
const DELAY_ARG_NAME: &str = "delay";
const OUT_RESULT_ARG_NAME: &str = "out-result";

pub fn get_serve_app() -> Command {
    let command = Command::new("serve")
        .about("Runs demo optimization which distributes evaluations over local threads and remote workers")
        .arg(
            Arg::new(FUNCTION_ARG_NAME)
                .help("Specifies benchmark function to minimize")
                .short('f')
                .long(FUNCTION_ARG_NAME)
                .required(false)
                .value_parser(["rosenbrock", "sphere", "rastrigin"]),
        )
        .arg(
            Arg::new(DIMENSIONS_ARG_NAME)
                .help("Specifies amount of dimensions of random initial solutions")
                .short('d')
                .long(DIMENSIONS_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(THREADS_ARG_NAME)
                .help("Specifies amount of local worker threads, zero disables local processing")
                .long(THREADS_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(LISTEN_ARG_NAME)
                .help("Specifies address to serve remote workers on, e.g. 0.0.0.0:10000")
                .short('l')
                .long(LISTEN_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(GENERATIONS_ARG_NAME)
                .help("Specifies maximum number of generations")
                .short('n')
                .long(GENERATIONS_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(TIME_ARG_NAME)
                .help("Specifies max time algorithm run in seconds")
                .short('t')
                .long(TIME_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(TARGET_ARG_NAME)
                .help("Specifies fitness which is good enough to stop")
                .long(TARGET_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(DELAY_ARG_NAME)
                .help("Specifies artificial delay of every evaluation in milliseconds")
                .long(DELAY_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(OUT_RESULT_ARG_NAME)
                .help("Specifies path to file for result output")
                .short('o')
                .long(OUT_RESULT_ARG_NAME)
                .required(false),
        );

    add_common_args(command)
}

/// Runs demo optimization.
pub fn run_serve<F>(matches: &ArgMatches, out_writer_func: F) -> Result<(), String>
where
    F: Fn(Option<File>) -> BufWriter<Box<dyn Write>>,
{
    let mut config = get_config(matches)?;
    apply_serve_args(matches, &mut config)?;

    let environment = create_environment(matches, &config);
    let is_stopped = Arc::new(AtomicBool::new(false));
    register_interruption_flag(&is_stopped)?;

    let result = run_evolution(&config, environment, is_stopped)?;

    let out_result = matches.get_one::<String>(OUT_RESULT_ARG_NAME).map(|path| create_file(path, "out result"));
    let mut writer = out_writer_func(out_result);

    serde_json::to_writer_pretty(&mut writer, &result).map_err(|err| format!("cannot write result: '{err}'"))?;
    writer.flush().map_err(|err| format!("cannot write result: '{err}'"))
}

fn apply_serve_args(matches: &ArgMatches, config: &mut Config) -> Result<(), String> {
    let function = matches
        .get_one::<String>(FUNCTION_ARG_NAME)
        .map(|function| function.parse::<FunctionKind>().map_err(|err| err.to_string()))
        .transpose()?;
    let dimensions = parse_int_value::<usize>(matches, DIMENSIONS_ARG_NAME, "dimensions")?;
    let threads = parse_int_value::<usize>(matches, THREADS_ARG_NAME, "threads")?;
    let max_generations = parse_int_value::<usize>(matches, GENERATIONS_ARG_NAME, "max generations")?;
    let max_time = parse_int_value::<u64>(matches, TIME_ARG_NAME, "max time")?;
    let target_fitness = parse_float_value::<f64>(matches, TARGET_ARG_NAME, "target fitness")?;
    let delay_ms = parse_int_value::<u64>(matches, DELAY_ARG_NAME, "delay")?;

    let evolution = config.evolution.get_or_insert_with(EvolutionConfig::default);
    evolution.function = function.or(evolution.function);
    evolution.dimensions = dimensions.or(evolution.dimensions);
    evolution.delay_ms = delay_ms.or(evolution.delay_ms);

    let termination = evolution.termination.get_or_insert_with(TerminationConfig::default);
    termination.max_generations = max_generations.or(termination.max_generations);
    termination.max_time = max_time.or(termination.max_time);
    termination.target_fitness = target_fitness.or(termination.target_fitness);

    if threads.is_some() {
        config.broker.get_or_insert_with(BrokerConfig::default).threads = threads;
    }

    if let Some(address) = matches.get_one::<String>(LISTEN_ARG_NAME) {
        config.server.get_or_insert_with(ServerConfig::default).address = Some(address.clone());
    }

    Ok(())
}
