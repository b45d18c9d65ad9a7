//! Distributes work items to remote workers over TCP.

pub mod protocol;

mod client;
pub use self::client::*;

mod server;
pub use self::server::*;
