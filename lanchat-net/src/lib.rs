//! Lanchat host: tokio transports and session glue around the host-driven core.

pub mod config;
pub mod error;
pub mod file_transfer;
pub mod frontend;
pub mod multicast;
pub mod probe;
pub mod session;
pub mod unicast;

pub use config::Config;
pub use error::{ErrorSink, LogErrorSink, NetError};
pub use frontend::{Frontend, LogFrontend};
pub use session::Session;
