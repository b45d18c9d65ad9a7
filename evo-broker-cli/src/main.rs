//! A command line interface to evo-broker: runs a demo optimization which distributes fitness
//! evaluations over local threads and remote workers, or runs such a remote worker.

#[cfg(test)]
#[path = "../tests/helpers/mod.rs"]
#[macro_use]
mod helpers;

#[cfg(test)]
#[path = "../tests/unit/main_test.rs"]
mod main_test;

mod commands;
use self::commands::*;

mod cli {
    use super::*;
    use clap::{ArgMatches, Command};
    use std::process;

    pub fn get_app() -> Command {
        Command::new("Evolution Broker")
            .version(env!("CARGO_PKG_VERSION"))
            .about("Distributes fitness evaluations of evolutionary optimization over threads and remote workers")
            .subcommand(serve::get_serve_app())
            .subcommand(work::get_work_app())
    }

    pub fn run_subcommand(arg_matches: ArgMatches) {
        if let Err(err) = match arg_matches.subcommand() {
            Some(("serve", serve_matches)) => serve::run_serve(serve_matches, create_write_buffer),
            Some(("work", work_matches)) => work::run_work(work_matches),
            _ => Err("no subcommand was used. Use -h to print help information.".to_string()),
        } {
            eprintln!("{err}");
            process::exit(1);
        }
    }
}

fn main() {
    let matches = cli::get_app().get_matches();

    cli::run_subcommand(matches);
}
