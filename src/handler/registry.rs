//! Service registry for dispatching calls by service name.
//!
//! The registry maps service names to [`Service`] bundles. Bundles are
//! registered before serving starts and never change afterwards.
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::handler::{unary_fn, Service, ServiceRegistry};
//!
//! let mut registry = ServiceRegistry::new();
//! registry.register("echo", Service::new(unary_fn(|_method, msg| async move { Ok(msg) })));
//!
//! assert!(registry.get("echo").is_ok());
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;

use super::{BoxFuture, HandlerResult, StreamingHandler, UnaryHandler};
use crate::error::{BridgeError, Result};
use crate::request::{Emitter, RequestId};

/// Handler bundle for one service.
///
/// A service without a streaming handler rejects streaming calls with
/// [`BridgeError::UnsupportedOperation`].
#[derive(Clone)]
pub struct Service {
    unary: Arc<dyn UnaryHandler>,
    streaming: Option<Arc<dyn StreamingHandler>>,
}

impl Service {
    /// Create a unary-only service.
    pub fn new(unary: impl UnaryHandler) -> Self {
        Self {
            unary: Arc::new(unary),
            streaming: None,
        }
    }

    /// Add a streaming handler.
    pub fn with_streaming(mut self, streaming: impl StreamingHandler) -> Self {
        self.streaming = Some(Arc::new(streaming));
        self
    }

    /// Whether streaming calls are accepted.
    #[inline]
    pub fn supports_streaming(&self) -> bool {
        self.streaming.is_some()
    }

    /// The unary handler.
    pub fn unary(&self) -> &Arc<dyn UnaryHandler> {
        &self.unary
    }

    /// The streaming handler, if any.
    pub fn streaming(&self) -> Option<&Arc<dyn StreamingHandler>> {
        self.streaming.as_ref()
    }
}

/// Registry mapping service names to handler bundles.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Service>,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, returning the bundle it replaced.
    pub fn register(&mut self, name: impl Into<String>, service: Service) -> Option<Service> {
        let name = name.into();
        let replaced = self.services.insert(name.clone(), service);
        if replaced.is_some() {
            tracing::warn!(service = %name, "service registered twice, keeping the latest");
        }
        replaced
    }

    /// Look up a service.
    pub fn get(&self, name: &str) -> Result<&Service> {
        self.services
            .get(name)
            .ok_or_else(|| BridgeError::UnknownService(name.to_string()))
    }

    /// Look up the streaming handler of a service.
    pub fn streaming(&self, name: &str) -> Result<&Arc<dyn StreamingHandler>> {
        self.get(name)?
            .streaming()
            .ok_or_else(|| BridgeError::UnsupportedOperation(name.to_string()))
    }

    /// Whether a service is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    /// Registered service names, in no particular order.
    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Builds a [`Service`] that routes calls to per-method handlers.
///
/// Unregistered methods fail with [`BridgeError::UnknownMethod`]. The built
/// service supports streaming only if at least one streaming method was
/// registered.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Box<dyn UnaryHandler>>,
    streams: HashMap<String, Box<dyn StreamingHandler>>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    /// Route unary calls for `method` to `handler`.
    pub fn method(mut self, method: impl Into<String>, handler: impl UnaryHandler) -> Self {
        self.methods.insert(method.into(), Box::new(handler));
        self
    }

    /// Route streaming calls for `method` to `handler`.
    pub fn stream(mut self, method: impl Into<String>, handler: impl StreamingHandler) -> Self {
        self.streams.insert(method.into(), Box::new(handler));
        self
    }

    pub fn build(self) -> Service {
        let service = Service::new(UnaryRouter {
            service: self.name.clone(),
            methods: self.methods,
        });

        if self.streams.is_empty() {
            service
        } else {
            service.with_streaming(StreamingRouter {
                service: self.name,
                streams: self.streams,
            })
        }
    }
}

fn unknown_method(service: &str, method: &str) -> BridgeError {
    BridgeError::UnknownMethod {
        service: service.to_string(),
        method: method.to_string(),
    }
}

struct UnaryRouter {
    service: String,
    methods: HashMap<String, Box<dyn UnaryHandler>>,
}

impl UnaryHandler for UnaryRouter {
    fn call(&self, method: &str, message: Bytes) -> BoxFuture<'static, HandlerResult<Bytes>> {
        match self.methods.get(method) {
            Some(handler) => handler.call(method, message),
            None => {
                let err = unknown_method(&self.service, method);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

struct StreamingRouter {
    service: String,
    streams: HashMap<String, Box<dyn StreamingHandler>>,
}

impl StreamingHandler for StreamingRouter {
    fn call(
        &self,
        method: &str,
        message: Bytes,
        emitter: Emitter,
        request_id: RequestId,
    ) -> BoxFuture<'static, HandlerResult> {
        match self.streams.get(method) {
            Some(handler) => handler.call(method, message, emitter, request_id),
            None => {
                let err = unknown_method(&self.service, method);
                Box::pin(async move { Err(err.into()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::handler::{streaming_fn, unary_fn};

    fn echo() -> Service {
        Service::new(unary_fn(|_method, message| async move { Ok(message) }))
    }

    #[test]
    fn test_register_and_get() {
        let mut registry = ServiceRegistry::new();
        assert!(registry.register("echo", echo()).is_none());

        assert!(registry.get("echo").is_ok());
        assert!(registry.contains("echo"));
        assert_eq!(registry.service_names(), vec!["echo"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_twice_replaces() {
        let mut registry = ServiceRegistry::new();
        registry.register("echo", echo());

        assert!(registry.register("echo", echo()).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::new();

        let err = registry.get("nope").err().unwrap();
        assert_eq!(err.to_string(), "Unknown service: nope");
        assert_eq!(registry.streaming("nope").err().unwrap().kind(), ErrorKind::UnknownService);
    }

    #[test]
    fn test_streaming_unsupported() {
        let mut registry = ServiceRegistry::new();
        registry.register("echo", echo());

        assert!(!registry.get("echo").unwrap().supports_streaming());
        let err = registry.streaming("echo").err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnsupportedOperation);
    }

    #[test]
    fn test_with_streaming() {
        let service = echo().with_streaming(streaming_fn(|_m, _msg, _e, _id| async { Ok(()) }));
        assert!(service.supports_streaming());
    }

    #[tokio::test]
    async fn test_builder_routes_by_method() {
        let service = ServiceBuilder::new("math")
            .method("one", unary_fn(|_m, _msg| async { Ok(Bytes::from_static(b"1")) }))
            .method("two", unary_fn(|_m, _msg| async { Ok(Bytes::from_static(b"2")) }))
            .build();

        let out = service.unary().call("two", Bytes::new()).await.unwrap();
        assert_eq!(&out[..], b"2");
        assert!(!service.supports_streaming());
    }

    #[tokio::test]
    async fn test_builder_unknown_method() {
        let service = ServiceBuilder::new("math")
            .method("one", unary_fn(|_m, _msg| async { Ok(Bytes::new()) }))
            .build();

        let err = service.unary().call("three", Bytes::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown method: math.three");
    }

    #[test]
    fn test_builder_with_stream_supports_streaming() {
        let service = ServiceBuilder::new("counter")
            .stream("tick", streaming_fn(|_m, _msg, _e, _id| async { Ok(()) }))
            .build();

        assert!(service.supports_streaming());
    }
}
