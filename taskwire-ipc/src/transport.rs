//! IPC transport implementations
//!
//! Messages are framed as newline-delimited JSON. [`StdioTransport`] serves
//! the worker side of the pipe, [`ChildProcessTransport`] the parent side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::trace;

use crate::error::IpcError;

/// IPC transport trait for different communication mechanisms
#[async_trait]
pub trait IpcTransport: Send + Sync {
    /// Send a message to the other end
    async fn send<T: Serialize + Send + Sync>(&mut self, message: &T) -> Result<(), IpcError>;

    /// Receive a message from the other end
    async fn receive<T: for<'de> Deserialize<'de> + Send>(&mut self) -> Result<T, IpcError>;

    /// Close the transport
    async fn close(&mut self) -> Result<(), IpcError>;
}

/// Stdin/stdout transport used inside a worker process.
pub struct StdioTransport {
    stdin: BufReader<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
}

impl StdioTransport {
    /// Create a new stdio transport
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdioTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IpcTransport for StdioTransport {
    async fn send<T: Serialize + Send + Sync>(&mut self, message: &T) -> Result<(), IpcError> {
        write_message(&mut self.stdout, message).await
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(&mut self) -> Result<T, IpcError> {
        read_message(&mut self.stdin).await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Stdin/stdout don't need explicit closing
        Ok(())
    }
}

/// Parent-side transport over a spawned worker's piped stdio.
pub struct ChildProcessTransport {
    stdin: Option<tokio::process::ChildStdin>,
    stdout: Option<BufReader<tokio::process::ChildStdout>>,
}

impl ChildProcessTransport {
    /// Create a new child process transport
    pub fn new(stdin: tokio::process::ChildStdin, stdout: tokio::process::ChildStdout) -> Self {
        Self {
            stdin: Some(stdin),
            stdout: Some(BufReader::new(stdout)),
        }
    }
}

#[async_trait]
impl IpcTransport for ChildProcessTransport {
    async fn send<T: Serialize + Send + Sync>(&mut self, message: &T) -> Result<(), IpcError> {
        let stdin = self.stdin.as_mut().ok_or(IpcError::NotConnected)?;
        write_message(stdin, message).await
    }

    async fn receive<T: for<'de> Deserialize<'de> + Send>(&mut self) -> Result<T, IpcError> {
        let stdout = self.stdout.as_mut().ok_or(IpcError::NotConnected)?;
        read_message(stdout).await
    }

    async fn close(&mut self) -> Result<(), IpcError> {
        // Take ownership and drop to close the pipes
        let _ = self.stdin.take();
        let _ = self.stdout.take();
        Ok(())
    }
}

async fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), IpcError>
where
    W: tokio::io::AsyncWrite + Unpin + Send,
    T: Serialize,
{
    let json = serde_json::to_string(message)
        .map_err(|e| IpcError::SerializationError(e.to_string()))?;

    trace!("sending message: {}", json);

    // Send with newline delimiter
    let line = format!("{}\n", json);
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;

    Ok(())
}

async fn read_message<R, T>(reader: &mut R) -> Result<T, IpcError>
where
    R: tokio::io::AsyncBufRead + Unpin + Send,
    T: for<'de> Deserialize<'de>,
{
    let mut line = String::new();
    let bytes = reader.read_line(&mut line).await?;

    if bytes == 0 {
        return Err(IpcError::ConnectionClosed);
    }

    let trimmed = line.trim_end();
    trace!("received message: {}", trimmed);
    serde_json::from_str(trimmed).map_err(|e| IpcError::DeserializationError(e.to_string()))
}
