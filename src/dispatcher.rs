//! Dispatcher - the entry point for every incoming call.
//!
//! Unary calls are awaited and always answered with a [`UnaryResponse`]
//! carrying the caller's correlation id. Streaming calls are registered
//! with the [`RequestRegistry`] first, then handed to the service's
//! streaming handler on a task of their own; the caller gets a
//! [`StreamHandle`] right away and responses arrive through its
//! [`StreamObserver`].
//!
//! # Example
//!
//! ```ignore
//! use hostbridge::dispatcher::{CallDescriptor, Dispatcher};
//! use hostbridge::request::response_channel;
//!
//! let dispatcher = Dispatcher::new(services);
//!
//! let reply = dispatcher
//!     .handle_unary(CallDescriptor::new("echo", "say", payload, "r1"))
//!     .await;
//!
//! let (observer, events) = response_channel(16);
//! let handle = dispatcher
//!     .handle_streaming(CallDescriptor::new("counter", "tick", payload, "r2"), Arc::new(observer))
//!     .await;
//! handle.cancel().await?;
//! ```

use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::error::{BridgeError, Result};
use crate::handler::ServiceRegistry;
use crate::request::{
    Emitter, RequestId, RequestMetadata, RequestRegistry, StreamHandle, StreamObserver,
};

/// One logical call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDescriptor {
    pub service: String,
    pub method: String,
    /// Opaque payload, never interpreted here.
    pub message: Bytes,
    pub request_id: RequestId,
}

impl CallDescriptor {
    pub fn new(
        service: impl Into<String>,
        method: impl Into<String>,
        message: impl Into<Bytes>,
        request_id: impl Into<RequestId>,
    ) -> Self {
        Self {
            service: service.into(),
            method: method.into(),
            message: message.into(),
            request_id: request_id.into(),
        }
    }
}

/// Answer to a unary call: `{message}` or `{error}`, always with `request_id`.
///
/// The constructors guarantee exactly one of `message` / `error` is set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnaryResponse {
    request_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl UnaryResponse {
    pub fn success(request_id: impl Into<RequestId>, message: impl Into<Bytes>) -> Self {
        Self {
            request_id: request_id.into(),
            message: Some(message.into()),
            error: None,
        }
    }

    pub fn failure(request_id: impl Into<RequestId>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            message: None,
            error: Some(error.into()),
        }
    }

    #[inline]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    #[inline]
    pub fn message(&self) -> Option<&Bytes> {
        self.message.as_ref()
    }

    #[inline]
    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    #[inline]
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.message.is_some()
    }

    /// The payload, or the error string.
    ///
    /// A decoded response carrying neither field is reported as an error.
    pub fn into_result(self) -> std::result::Result<Bytes, String> {
        match (self.message, self.error) {
            (_, Some(error)) => Err(error),
            (Some(message), None) => Ok(message),
            (None, None) => Err("response carried neither message nor error".to_string()),
        }
    }
}

/// What [`Dispatcher::handle_request`] produced.
#[derive(Debug)]
pub enum DispatchOutcome {
    Unary(UnaryResponse),
    Streaming(StreamHandle),
}

/// Routes calls to services and tracks streaming calls until they end.
///
/// Cheap to clone; clones share both registries.
#[derive(Clone)]
pub struct Dispatcher {
    services: Arc<ServiceRegistry>,
    requests: RequestRegistry,
}

impl Dispatcher {
    /// Create a dispatcher with a fresh request registry.
    pub fn new(services: ServiceRegistry) -> Self {
        Self::with_registry(Arc::new(services), RequestRegistry::new())
    }

    /// Create a dispatcher over existing registries.
    pub fn with_registry(services: Arc<ServiceRegistry>, requests: RequestRegistry) -> Self {
        Self { services, requests }
    }

    #[inline]
    pub fn services(&self) -> &ServiceRegistry {
        &self.services
    }

    #[inline]
    pub fn requests(&self) -> &RequestRegistry {
        &self.requests
    }

    /// Handle one call: streaming if an observer is supplied, unary otherwise.
    pub async fn handle_request(
        &self,
        call: CallDescriptor,
        observer: Option<Arc<dyn StreamObserver>>,
    ) -> DispatchOutcome {
        match observer {
            Some(observer) => DispatchOutcome::Streaming(self.handle_streaming(call, observer).await),
            None => DispatchOutcome::Unary(self.handle_unary(call).await),
        }
    }

    /// Handle a unary call. Failures come back as data, never as `Err`.
    pub async fn handle_unary(&self, call: CallDescriptor) -> UnaryResponse {
        let CallDescriptor {
            service,
            method,
            message,
            request_id,
        } = call;

        let handler = match self.services.get(&service) {
            Ok(svc) => svc.unary().clone(),
            Err(err) => {
                debug!(request_id = %request_id, "unary call rejected: {}", err);
                return UnaryResponse::failure(request_id, err.to_string());
            }
        };

        match handler.call(&method, message).await {
            Ok(response) => UnaryResponse::success(request_id, response),
            Err(err) => {
                let err = BridgeError::handler(err);
                debug!(
                    request_id = %request_id,
                    service = %service,
                    method = %method,
                    "unary handler failed: {}",
                    err
                );
                UnaryResponse::failure(request_id, err.to_string())
            }
        }
    }

    /// Handle a streaming call.
    ///
    /// The call is registered before the service is looked up, so the
    /// returned handle is valid even when the lookup fails; in that case the
    /// error has already gone to `on_error` and the stream has closed with
    /// [`Termination::Failed`](crate::request::Termination::Failed).
    pub async fn handle_streaming(
        &self,
        call: CallDescriptor,
        observer: Arc<dyn StreamObserver>,
    ) -> StreamHandle {
        let CallDescriptor {
            service,
            method,
            message,
            request_id,
        } = call;

        let emitter = Emitter::new(request_id.clone(), observer, &self.requests);
        let metadata = RequestMetadata::streaming(service.as_str(), method.as_str());

        if let Some(replaced) = self.requests.register_request(
            request_id.clone(),
            emitter.cleanup(),
            metadata,
            emitter.clone(),
        ) {
            warn!(
                request_id = %request_id,
                previous_service = %replaced.metadata().service,
                previous_method = %replaced.metadata().method,
                "correlation id reused while still active, replacing entry"
            );
            // Out of the registry, teardown can no longer reach it.
            replaced.emitter().abandon();
        }

        let handle = StreamHandle::new(request_id.clone(), self.requests.clone(), emitter.clone());

        let handler = match self.services.streaming(&service) {
            Ok(handler) => handler.clone(),
            Err(err) => {
                emitter.fail(err).await;
                return handle;
            }
        };

        let registered = match self.requests.get_request_info(request_id.as_str()) {
            Some(info) if info.emitter.same_stream(&emitter) => info.emitter,
            _ => {
                emitter
                    .fail(BridgeError::NoResponseChannel(request_id.clone()))
                    .await;
                return handle;
            }
        };

        debug!(request_id = %request_id, service = %service, method = %method, "starting stream");

        let call = handler.call(&method, message, registered.clone(), request_id);
        tokio::spawn(async move {
            if let Err(err) = call.await {
                registered.fail(BridgeError::handler(err)).await;
            }
        });

        handle
    }

    /// Cancel an active streaming call. See [`RequestRegistry::cancel_request`].
    pub async fn cancel_request(&self, request_id: &str) -> Result<bool> {
        self.requests.cancel_request(request_id).await
    }

    /// Cancel every active streaming call, returning how many were cancelled.
    ///
    /// Cleanup failures are logged; teardown continues past them.
    pub async fn shutdown(&self) -> usize {
        let results = self.requests.cancel_all().await;
        let count = results.len();

        for (request_id, result) in results {
            if let Err(err) = result {
                error!(request_id = %request_id, "cancel during shutdown failed: {}", err);
            }
        }

        if count > 0 {
            debug!(cancelled = count, "dispatcher shut down");
        }
        count
    }
}
