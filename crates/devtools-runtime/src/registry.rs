use crate::{Error, Result};
use rustc_hash::FxHashMap;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Core handler abstraction: typed params in, typed result out.
///
/// Each method declares its own input struct, so payload validation happens
/// at the dispatch boundary instead of ad-hoc field extraction inside
/// handlers.
#[async_trait::async_trait]
pub trait RpcHandler: Send + Sync + 'static {
    type Input: DeserializeOwned + Send;
    type Output: Serialize + Send;
    type Error: Into<Error>;

    async fn handle(&self, input: Self::Input) -> std::result::Result<Self::Output, Self::Error>;
}

pub(crate) trait HandlerEntry: Send + Sync {
    fn dispatch(&self, params: Value) -> BoxFuture<'static, Result<Value>>;
}

pub(crate) type DynHandler = Arc<dyn HandlerEntry>;

struct HandlerEntryImpl<H: RpcHandler> {
    handler: Arc<H>,
}

impl<H: RpcHandler> HandlerEntryImpl<H> {
    fn new(handler: H) -> Self {
        Self {
            handler: Arc::new(handler),
        }
    }
}

impl<H> HandlerEntry for HandlerEntryImpl<H>
where
    H: RpcHandler,
    H::Input: 'static,
    H::Output: 'static,
{
    fn dispatch(&self, params: Value) -> BoxFuture<'static, Result<Value>> {
        let input: H::Input = match serde_json::from_value(params) {
            Ok(input) => input,
            Err(e) => return Box::pin(async move { Err(e.into()) }),
        };

        let handler = self.handler.clone();
        Box::pin(async move {
            let output = handler.handle(input).await.map_err(Into::into)?;
            serde_json::to_value(&output).map_err(Into::into)
        })
    }
}

/// Method-name to handler mapping with O(1) average-case lookup.
///
/// `system.ping` is never present here; the server dispatches it specially so
/// it keeps answering with zero handlers registered.
pub struct HandlerRegistry {
    handlers: FxHashMap<String, DynHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
        }
    }

    /// Register a handler with a method name. Re-registration replaces.
    pub fn register<H>(&mut self, method: impl Into<String>, handler: H)
    where
        H: RpcHandler,
        H::Input: 'static,
        H::Output: 'static,
    {
        let entry = HandlerEntryImpl::new(handler);
        self.handlers.insert(method.into(), Arc::new(entry));
    }

    /// Remove a handler. Returns whether anything was registered.
    pub fn unregister(&mut self, method: &str) -> bool {
        self.handlers.remove(method).is_some()
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Look up the entry for out-of-lock invocation.
    pub(crate) fn lookup(&self, method: &str) -> Option<DynHandler> {
        self.handlers.get(method).cloned()
    }

    /// Dispatch to a handler by method name.
    pub async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        match self.lookup(method) {
            Some(handler) => handler.dispatch(params).await,
            None => Err(Error::MethodNotFound(method.to_string())),
        }
    }

    /// Sorted method names, as advertised by `system.ping`.
    pub fn method_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct EchoInput {
        value: String,
    }

    #[derive(Debug, Serialize)]
    struct EchoOutput {
        value: String,
    }

    struct EchoHandler {
        prefix: &'static str,
    }

    #[async_trait::async_trait]
    impl RpcHandler for EchoHandler {
        type Input = EchoInput;
        type Output = EchoOutput;
        type Error = Error;

        async fn handle(&self, input: Self::Input) -> Result<Self::Output> {
            Ok(EchoOutput {
                value: format!("{}{}", self.prefix, input.value),
            })
        }
    }

    struct FailingHandler;

    #[async_trait::async_trait]
    impl RpcHandler for FailingHandler {
        type Input = serde_json::Value;
        type Output = ();
        type Error = Error;

        async fn handle(&self, _input: Self::Input) -> Result<Self::Output> {
            Err(Error::Handler("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_dispatch_typed_handler() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler { prefix: "" });

        let result = registry
            .dispatch("echo", json!({"value": "hello"}))
            .await
            .unwrap();
        assert_eq!(result, json!({"value": "hello"}));
    }

    #[tokio::test]
    async fn test_dispatch_unknown_method() {
        let registry = HandlerRegistry::new();
        let err = registry.dispatch("missing", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_reregistration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler { prefix: "first:" });
        registry.register("echo", EchoHandler { prefix: "second:" });

        let result = registry.dispatch("echo", json!({"value": "x"})).await.unwrap();
        assert_eq!(result, json!({"value": "second:x"}));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_unregister_then_dispatch() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler { prefix: "" });
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));

        let err = registry.dispatch("echo", json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MethodNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_params_surface_as_error() {
        let mut registry = HandlerRegistry::new();
        registry.register("echo", EchoHandler { prefix: "" });

        let err = registry
            .dispatch("echo", json!({"wrong_field": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[tokio::test]
    async fn test_handler_failure_propagates() {
        let mut registry = HandlerRegistry::new();
        registry.register("fail", FailingHandler);

        let err = registry.dispatch("fail", json!({})).await.unwrap_err();
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_method_names_sorted() {
        let mut registry = HandlerRegistry::new();
        registry.register("b.method", EchoHandler { prefix: "" });
        registry.register("a.method", EchoHandler { prefix: "" });
        assert_eq!(registry.method_names(), vec!["a.method", "b.method"]);
    }
}
