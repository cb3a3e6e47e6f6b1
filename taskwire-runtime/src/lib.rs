//! Taskwire worker runtime
//!
//! The worker side of a Taskwire channel: a registry of invocable modules and
//! the stdio request loop that serves them. Embedding applications register
//! their handlers on a [`ModuleRegistry`] and hand it to [`worker_main`].

pub mod registry;
pub mod worker;

// Re-export main types
pub use registry::{DispatchError, Handler, HandlerResult, ModuleRegistry, TaskModule};
pub use worker::{handle_request, worker_main, Worker};
