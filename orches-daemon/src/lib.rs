//! Long-running reconciler: a periodic sync plus a Unix socket that feeds
//! commands to a single serializing worker.

mod error;
pub mod protocol;
mod runtime;

pub use error::DaemonError;
pub use protocol::{send_command, Command, DaemonRequest, ERROR_PREFIX};
pub use runtime::{bind, run, serve, CommandHandler, DaemonExit, DEFAULT_INTERVAL};
