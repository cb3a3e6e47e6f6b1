//! Channel error types

use thiserror::Error;

/// Errors surfaced by [`RemoteTaskChannel`](crate::RemoteTaskChannel).
///
/// Process-scoped failures (`SpawnFailed`, `ProcessFailed`, `ProcessExited`)
/// fan out to every pending call; `Remote` and `Timeout` are scoped to a
/// single call. The enum is `Clone` so fan-out can hand each waiter its own
/// copy.
#[derive(Debug, Clone, Error)]
pub enum ChannelError {
    /// The worker process could not be spawned. Fatal to the channel instance.
    #[error("Failed to spawn worker process: {0}")]
    SpawnFailed(String),

    /// The worker's transport failed at runtime.
    #[error("Worker process failure: {0}")]
    ProcessFailed(String),

    /// The worker process exited while calls were still pending.
    #[error("Worker process exited before responding (exit code: {code:?})")]
    ProcessExited { code: Option<i32> },

    /// The remote invocation itself failed; carries the worker's error
    /// descriptor.
    #[error("{message}")]
    Remote { message: String, stack: String },

    /// The per-call timeout elapsed before a response arrived.
    #[error("Timed out waiting for worker response")]
    Timeout,

    /// The channel has been disposed or its worker terminated; a new channel
    /// instance is required.
    #[error("Channel is terminated")]
    Terminated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_displays_message_only() {
        let err = ChannelError::Remote {
            message: "boom".to_string(),
            stack: "at add (/tmp/mod.js:3)".to_string(),
        };
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_process_exited_displays_code() {
        let err = ChannelError::ProcessExited { code: Some(7) };
        assert!(err.to_string().contains("Some(7)"));
    }
}
