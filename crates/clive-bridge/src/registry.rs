//! Handler registry: method name → async handler.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::{HandlerError, RegistryError};

/// Trait implemented by every bridge method handler.
///
/// Handlers may fail or panic; the dispatcher converts both into an error
/// response and the connection stays open.
#[async_trait]
pub trait BridgeHandler: Send + Sync {
    /// Execute the handler with the request's `params`.
    async fn handle(&self, params: Value) -> Result<Value, HandlerError>;
}

/// Adapter turning an async closure into a [`BridgeHandler`].
pub struct FnHandler<F>(F);

/// Wrap `f` as a handler.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> BridgeHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
        (self.0)(params).await
    }
}

/// Registry mapping method names to handlers. Last registration wins.
///
/// The manager holds the registry behind an `Arc` snapshot, so a registry
/// is replaced wholesale rather than mutated in place once installed.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn BridgeHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a method name, replacing any previous one.
    pub fn register(
        &mut self,
        method: &str,
        handler: impl BridgeHandler + 'static,
    ) -> Result<(), RegistryError> {
        self.register_arc(method, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn register_arc(
        &mut self,
        method: &str,
        handler: Arc<dyn BridgeHandler>,
    ) -> Result<(), RegistryError> {
        if method.is_empty() || method.contains('.') {
            return Err(RegistryError::InvalidMethodName {
                name: method.to_owned(),
            });
        }
        if self.handlers.insert(method.to_owned(), handler).is_some() {
            tracing::debug!(method, "replaced bridge handler");
        }
        Ok(())
    }

    /// Look up a handler.
    pub fn get(&self, method: &str) -> Option<Arc<dyn BridgeHandler>> {
        self.handlers.get(method).cloned()
    }

    /// Run the handler for `method`, or fail with
    /// [`HandlerError::UnknownMethod`].
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value, HandlerError> {
        let Some(handler) = self.get(method) else {
            return Err(HandlerError::UnknownMethod {
                method: method.to_owned(),
            });
        };
        handler.handle(params).await
    }

    /// List all registered method names (sorted).
    pub fn methods(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check whether a method is registered.
    pub fn has_method(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("methods", &self.methods())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl BridgeHandler for EchoHandler {
        async fn handle(&self, params: Value) -> Result<Value, HandlerError> {
            Ok(json!({ "echoed": params }))
        }
    }

    #[tokio::test]
    async fn register_and_dispatch() {
        let mut reg = HandlerRegistry::new();
        reg.register("echo", EchoHandler).unwrap();
        let out = reg.dispatch("echo", json!({"x": 1})).await.unwrap();
        assert_eq!(out, json!({"echoed": {"x": 1}}));
    }

    #[tokio::test]
    async fn unknown_method_is_named() {
        let reg = HandlerRegistry::new();
        let err = reg.dispatch("doesNotExist", json!({})).await.unwrap_err();
        assert_matches!(err, HandlerError::UnknownMethod { ref method } if method == "doesNotExist");
    }

    #[tokio::test]
    async fn last_registration_wins() {
        let mut reg = HandlerRegistry::new();
        reg.register("m", handler_fn(|_| async { Ok(json!(1)) })).unwrap();
        reg.register("m", handler_fn(|_| async { Ok(json!(2)) })).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.dispatch("m", Value::Null).await.unwrap(), json!(2));
    }

    #[test]
    fn dotted_or_empty_names_rejected() {
        let mut reg = HandlerRegistry::new();
        assert_matches!(
            reg.register("plan.approve", EchoHandler),
            Err(RegistryError::InvalidMethodName { .. })
        );
        assert_matches!(reg.register("", EchoHandler), Err(RegistryError::InvalidMethodName { .. }));
        assert!(reg.is_empty());
    }

    #[test]
    fn methods_are_sorted() {
        let mut reg = HandlerRegistry::new();
        reg.register("writeTestFile", EchoHandler).unwrap();
        reg.register("approvePlan", EchoHandler).unwrap();
        assert_eq!(reg.methods(), vec!["approvePlan", "writeTestFile"]);
        assert!(reg.has_method("approvePlan"));
        assert!(!reg.has_method("echo"));
    }

    #[tokio::test]
    async fn handler_error_passes_through() {
        let mut reg = HandlerRegistry::new();
        reg.register("fail", handler_fn(|_| async { Err(HandlerError::failed("boom")) }))
            .unwrap();
        let err = reg.dispatch("fail", Value::Null).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }
}
