//! Diagnostic sink for worker output
//!
//! Worker stderr, plus any stdout line that is not a protocol response, is
//! forwarded here tagged with the worker's process id. Purely observational;
//! no contract on content.

use tracing::debug;

/// Receives raw output chunks from a worker process.
pub trait DiagnosticSink: Send + Sync {
    fn forward(&self, pid: u32, chunk: &str);
}

/// Default sink that logs worker output through `tracing`.
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn forward(&self, pid: u32, chunk: &str) {
        debug!("worker[{}]: {}", pid, chunk.trim_end());
    }
}
