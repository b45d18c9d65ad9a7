use crate::utils::{DefaultRandom, Random};
use std::sync::Arc;

/// Specifies a logger which consumes information messages.
pub type InfoLogger = Arc<dyn Fn(&str) + Send + Sync>;

/// Keeps track of process scoped services shared by broker components.
#[derive(Clone)]
pub struct Environment {
    /// A random generator.
    pub random: Arc<dyn Random + Send + Sync>,
    /// An information logger.
    pub logger: InfoLogger,
    /// Amount of available cpus.
    pub available_cpus: usize,
}

impl Environment {
    /// Creates a new instance of `Environment` with given logger.
    pub fn new_with_logger(logger: InfoLogger) -> Self {
        Self { logger, ..Self::default() }
    }

    /// Creates an environment which drops all log messages.
    pub fn silent() -> Self {
        Self::new_with_logger(Arc::new(|_| {}))
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            random: Arc::new(DefaultRandom::default()),
            logger: Arc::new(|msg| println!("{msg}")),
            available_cpus: get_cpus(),
        }
    }
}

/// Returns amount of CPUs.
pub fn get_cpus() -> usize {
    num_cpus::get()
}
