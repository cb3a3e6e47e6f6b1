//! Inter-process communication for Taskwire
//!
//! This crate provides the wire protocol and transport abstractions used for
//! communication between a task channel and its worker process.

pub mod error;
pub mod protocol;
pub mod transport;

// Re-export commonly used types
pub use error::IpcError;
pub use protocol::{RemoteErrorPayload, TaskRequest, TaskResponse};
pub use transport::{ChildProcessTransport, IpcTransport, StdioTransport};
