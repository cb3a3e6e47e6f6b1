//! Worker process request loop
//!
//! The worker side of the channel: receives requests over stdin, dispatches
//! them through the module registry, and writes the response for each request
//! back on stdout with the same correlation id. Runs until the coordinator
//! closes the channel.

use tracing::{debug, error, info};

use taskwire_ipc::{
    IpcError, IpcTransport, RemoteErrorPayload, StdioTransport, TaskRequest, TaskResponse,
};

use crate::registry::ModuleRegistry;

/// Worker process main entry point.
pub async fn worker_main(registry: ModuleRegistry) -> Result<(), IpcError> {
    let mut worker = Worker::new(registry);
    worker.run().await
}

/// Worker process implementation
pub struct Worker {
    transport: StdioTransport,
    registry: ModuleRegistry,
}

impl Worker {
    pub fn new(registry: ModuleRegistry) -> Self {
        Self {
            transport: StdioTransport::new(),
            registry,
        }
    }

    /// Main worker loop
    pub async fn run(&mut self) -> Result<(), IpcError> {
        info!("worker {} ready", std::process::id());

        loop {
            let request: TaskRequest = match self.transport.receive().await {
                Ok(request) => request,
                Err(IpcError::ConnectionClosed) => {
                    info!("coordinator closed the channel, shutting down");
                    break;
                }
                Err(IpcError::DeserializationError(e)) => {
                    // A bad line poisons one request, not the whole worker
                    error!("discarding malformed request: {}", e);
                    continue;
                }
                Err(e) => {
                    error!("failed to receive request: {}", e);
                    return Err(e);
                }
            };

            debug!("dispatching request {} for {}", request.id, request.file);
            let response = handle_request(&self.registry, request).await;
            self.transport.send(&response).await?;
        }

        Ok(())
    }
}

/// Dispatch one request, always producing a response with the same id.
pub async fn handle_request(registry: &ModuleRegistry, request: TaskRequest) -> TaskResponse {
    let TaskRequest {
        id,
        file,
        method,
        args,
    } = request;

    let handler = match registry.resolve(&file, method.as_deref()) {
        Ok(handler) => handler,
        Err(e) => return TaskResponse::failure(id, RemoteErrorPayload::from_error(&e)),
    };

    match handler(args.unwrap_or_default()).await {
        Ok(result) => TaskResponse::success(id, result),
        Err(e) => TaskResponse::failure(
            id,
            RemoteErrorPayload::new(
                format!("{:#}", e),
                std::backtrace::Backtrace::force_capture().to_string(),
            ),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    fn arithmetic_registry() -> ModuleRegistry {
        let mut registry = ModuleRegistry::new();
        registry
            .module("/tmp/mod.js")
            .export("add", |args| async move {
                let a = args
                    .first()
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| anyhow!("not a number"))?;
                let b = args
                    .get(1)
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| anyhow!("not a number"))?;
                Ok(json!(a + b))
            });
        registry
            .module("/tmp/boom.js")
            .default_export(|_args| async move { Err(anyhow!("boom")) });
        registry
    }

    #[tokio::test]
    async fn test_dispatch_resolves_named_export() {
        let registry = arithmetic_registry();
        let request = TaskRequest::new(
            "1",
            "/tmp/mod.js",
            Some("add".to_string()),
            Some(vec![json!(2), json!(3)]),
        );

        let response = handle_request(&registry, request).await;

        assert_eq!(response.id, "1");
        assert_eq!(response.outcome(), Some(Ok(json!(5))));
    }

    #[tokio::test]
    async fn test_dispatch_default_export_failure() {
        let registry = arithmetic_registry();
        let request = TaskRequest::new("7", "/tmp/boom.js", None, None);

        let response = handle_request(&registry, request).await;

        assert_eq!(response.id, "7");
        let error = response.outcome().unwrap().unwrap_err();
        assert_eq!(error.message, "boom");
        assert!(!error.stack.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_module() {
        let registry = arithmetic_registry();
        let request = TaskRequest::new("2", "/tmp/missing.js", None, None);

        let response = handle_request(&registry, request).await;

        assert_eq!(response.id, "2");
        let error = response.outcome().unwrap().unwrap_err();
        assert!(error.message.contains("/tmp/missing.js"));
    }

    #[tokio::test]
    async fn test_dispatch_missing_args_fail_cleanly() {
        let registry = arithmetic_registry();
        // add called with no args at all
        let request = TaskRequest::new("3", "/tmp/mod.js", Some("add".to_string()), None);

        let response = handle_request(&registry, request).await;
        assert_eq!(response.id, "3");
        assert!(response.error.is_some());
    }
}
