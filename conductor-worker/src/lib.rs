//! Worker side of the supervisor contract.
//!
//! A worker binary implements [`AppServer`] and hands it to [`WorkerHost`],
//! which parses the launch arguments, binds the control channel under the
//! session's rendezvous name and maps STOP / RECONFIGURE onto the app.

mod app;
mod error;
mod host;
mod logging;

pub use app::{AppServer, WorkerContext};
pub use error::WorkerError;
pub use host::{ExitReason, WorkerHost};
pub use logging::init_tracing;
