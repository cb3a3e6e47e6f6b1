//! Module registry
//!
//! Maps module paths to invocable exports. A request names a module file and
//! optionally an export; with no export name the module's default export is
//! invoked. Handlers are async and return plain serializable values.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result type produced by module handlers.
pub type HandlerResult = anyhow::Result<JsonValue>;

/// An invocable export: takes the call's argument list, returns a future of
/// its serializable result.
pub type Handler = Arc<dyn Fn(Vec<JsonValue>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// Request could not be routed to a handler.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Module {module} has no export named '{method}'")]
    MethodNotFound { module: String, method: String },

    #[error("Module {0} has no default export")]
    NoDefaultExport(String),
}

/// A registered module: named exports plus an optional default export.
#[derive(Default)]
pub struct TaskModule {
    default: Option<Handler>,
    exports: HashMap<String, Handler>,
}

impl TaskModule {
    /// Register a named export.
    pub fn export<F, Fut>(&mut self, name: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(Vec<JsonValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.exports.insert(name.into(), wrap(handler));
        self
    }

    /// Register the default export, invoked when a request carries no method
    /// name.
    pub fn default_export<F, Fut>(&mut self, handler: F) -> &mut Self
    where
        F: Fn(Vec<JsonValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.default = Some(wrap(handler));
        self
    }
}

fn wrap<F, Fut>(handler: F) -> Handler
where
    F: Fn(Vec<JsonValue>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(move |args| Box::pin(handler(args)))
}

/// All modules a worker can serve, keyed by absolute module path.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, TaskModule>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the module registered under `file`.
    pub fn module(&mut self, file: impl Into<String>) -> &mut TaskModule {
        self.modules.entry(file.into()).or_default()
    }

    /// Route a request to its handler.
    pub fn resolve(&self, file: &str, method: Option<&str>) -> Result<Handler, DispatchError> {
        let module = self
            .modules
            .get(file)
            .ok_or_else(|| DispatchError::ModuleNotFound(file.to_string()))?;

        match method {
            Some(name) => module.exports.get(name).cloned().ok_or_else(|| {
                DispatchError::MethodNotFound {
                    module: file.to_string(),
                    method: name.to_string(),
                }
            }),
            None => module
                .default
                .clone()
                .ok_or_else(|| DispatchError::NoDefaultExport(file.to_string())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}
