//! Module provides various helper functionality.

pub mod config;
pub mod interruption;
pub mod serve;
pub mod work;
