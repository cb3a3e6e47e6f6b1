//! Taskwire channel
//!
//! This crate provides [`RemoteTaskChannel`], an out-of-process RPC task
//! runner: it lazily spawns a single worker process, multiplexes many
//! concurrent request/response exchanges over the worker's stdio, and maps
//! transport events (process exit, process error, malformed responses) onto
//! per-call results and lifecycle notifications.

pub mod channel;
pub mod error;
pub mod sink;

mod listeners;
mod pending;

// Re-export main types
pub use channel::{ChannelConfig, RemoteTaskChannel};
pub use error::ChannelError;
pub use sink::{DiagnosticSink, TracingSink};
