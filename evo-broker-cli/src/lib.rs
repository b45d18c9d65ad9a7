//! A library part of evo-broker command line interface: reads run configuration, wires interruption
//! handling into cooperative stop flags and runs the demo optimization or a remote worker.

#![warn(missing_docs)]

#[cfg(test)]
#[path = "../tests/helpers/mod.rs"]
#[macro_use]
mod helpers;

#[cfg(test)]
#[path = "../tests/features/mod.rs"]
mod features;

pub mod extensions;
