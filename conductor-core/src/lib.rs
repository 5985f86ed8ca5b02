//! Conductor core library: desired-state types, snapshot loading and the
//! worker launch contract.
//!
//! Public API surface:
//! - [`types`]: newtypes and domain structs
//! - [`error`]: [`ConfigError`]
//! - [`snapshot`]: load / save / [`ConfigSource`]
//! - [`launch`]: worker launch-argument contract

pub mod error;
pub mod launch;
pub mod snapshot;
pub mod types;

pub use error::ConfigError;
pub use launch::WorkerArgs;
pub use snapshot::{load_snapshot_at, save_snapshot_at, ConfigSource, FileConfigSource};
pub use types::{
    Command, ConfigurationSnapshot, ControllerSettings, InstanceId, ProcessInstanceSpec,
    SessionToken, EXIT_ACK,
};
