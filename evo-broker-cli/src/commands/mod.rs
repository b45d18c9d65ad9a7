use clap::{Arg, ArgAction, ArgMatches, Command};

pub mod serve;
pub mod work;

use evo_broker::prelude::Environment;
use evo_broker_cli::extensions::config::{Config, is_logging_enabled, read_config};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write, stdout};
use std::process;
use std::str::FromStr;
use std::sync::Arc;

const CONFIG_ARG_NAME: &str = "config";
const LOG_ARG_NAME: &str = "log";

pub(crate) fn create_write_buffer(out_file: Option<File>) -> BufWriter<Box<dyn Write>> {
    if let Some(out_file) = out_file {
        BufWriter::new(Box::new(out_file))
    } else {
        BufWriter::new(Box::new(stdout()))
    }
}

fn open_file(path: &str, description: &str) -> File {
    File::open(path).unwrap_or_else(|err| {
        eprintln!("cannot open {description} file '{path}': '{err}'");
        process::exit(1);
    })
}

fn create_file(path: &str, description: &str) -> File {
    File::create(path).unwrap_or_else(|err| {
        eprintln!("cannot create {description} file '{path}': '{err}'");
        process::exit(1);
    })
}

fn parse_float_value<T: FromStr<Err = std::num::ParseFloatError>>(
    matches: &ArgMatches,
    arg_name: &str,
    arg_desc: &str,
) -> Result<Option<T>, String> {
    matches
        .get_one::<String>(arg_name)
        .map(|arg| {
            arg.parse::<T>().map_err(|err| format!("cannot get float value, error: '{err}': '{arg_desc}'")).map(Some)
        })
        .unwrap_or(Ok(None))
}

fn parse_int_value<T: FromStr<Err = std::num::ParseIntError>>(
    matches: &ArgMatches,
    arg_name: &str,
    arg_desc: &str,
) -> Result<Option<T>, String> {
    matches
        .get_one::<String>(arg_name)
        .map(|arg| {
            arg.parse::<T>().map_err(|err| format!("cannot get integer value, error: '{err}': '{arg_desc}'")).map(Some)
        })
        .unwrap_or(Ok(None))
}

fn add_common_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(CONFIG_ARG_NAME)
                .help("Specifies path to configuration file")
                .short('c')
                .long(CONFIG_ARG_NAME)
                .required(false),
        )
        .arg(
            Arg::new(LOG_ARG_NAME)
                .help("Specifies whether default logging is enabled")
                .long(LOG_ARG_NAME)
                .required(false)
                .action(ArgAction::SetTrue),
        )
}

fn get_config(matches: &ArgMatches) -> Result<Config, String> {
    matches
        .get_one::<String>(CONFIG_ARG_NAME)
        .map(|path| read_config(BufReader::new(open_file(path, "config"))))
        .unwrap_or_else(|| Ok(Config::default()))
}

fn create_environment(matches: &ArgMatches, config: &Config) -> Arc<Environment> {
    if matches.get_flag(LOG_ARG_NAME) || is_logging_enabled(config) {
        Arc::new(Environment::default())
    } else {
        Arc::new(Environment::silent())
    }
}
