//! Point-to-point control channel between the supervisor and its workers.
//!
//! Each worker listens on a Unix domain socket named after its session token.
//! An exchange is one connection carrying one length-prefixed text frame in
//! each direction; see [`frame`] for the wire layout.

pub mod address;
pub mod client;
pub mod error;
pub mod frame;
pub mod server;

pub use address::{channel_path, default_channel_dir, CHANNEL_DIR_ENV};
pub use client::ClientChannel;
pub use error::ChannelError;
pub use frame::{ChannelStream, MAX_PAYLOAD};
pub use server::{FnHandler, MessageHandler, ServerChannel};
