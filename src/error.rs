//! Error types for hostbridge.

use thiserror::Error;

use crate::request::RequestId;

/// Boxed error returned by service handlers and caller callbacks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for dispatch and transport operations.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// No service registered under the requested name.
    #[error("Unknown service: {0}")]
    UnknownService(String),

    /// The service exists but has no handler for the requested method.
    #[error("Unknown method: {service}.{method}")]
    UnknownMethod { service: String, method: String },

    /// The service exists but cannot serve streaming calls.
    #[error("Service {0} does not support streaming")]
    UnsupportedOperation(String),

    /// A streaming handler was started without a registered response channel.
    #[error("No response channel registered for request {0}")]
    NoResponseChannel(RequestId),

    /// A unary or streaming handler body failed.
    #[error("{0}")]
    HandlerFailure(BoxError),

    /// The caller's own `on_response` / `on_complete` callback failed.
    #[error("Callback failed: {0}")]
    CallbackFailure(BoxError),

    /// A cleanup registered for a request failed while it was being cancelled.
    #[error("Cleanup failed: {0}")]
    CleanupFailure(BoxError),

    /// I/O error on the underlying channel.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (invalid frame, unknown kind, oversize payload).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The channel to the caller closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// The writer queue stayed full for longer than the send timeout.
    #[error("Send timeout")]
    SendTimeout,
}

/// Fieldless classification of [`BridgeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UnknownService,
    UnknownMethod,
    UnsupportedOperation,
    NoResponseChannel,
    HandlerFailure,
    CallbackFailure,
    CleanupFailure,
    Transport,
}

impl BridgeError {
    /// Wrap a handler error.
    ///
    /// An [`UnknownMethod`](Self::UnknownMethod) raised by a method router is
    /// a routing failure, not a handler failure, and is passed through as is.
    pub fn handler(err: impl Into<BoxError>) -> Self {
        match err.into().downcast::<BridgeError>() {
            Ok(err) if matches!(*err, Self::UnknownMethod { .. }) => *err,
            Ok(err) => Self::HandlerFailure(err),
            Err(err) => Self::HandlerFailure(err),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnknownService(_) => ErrorKind::UnknownService,
            Self::UnknownMethod { .. } => ErrorKind::UnknownMethod,
            Self::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            Self::NoResponseChannel(_) => ErrorKind::NoResponseChannel,
            Self::HandlerFailure(_) => ErrorKind::HandlerFailure,
            Self::CallbackFailure(_) => ErrorKind::CallbackFailure,
            Self::CleanupFailure(_) => ErrorKind::CleanupFailure,
            Self::Io(_)
            | Self::MsgPackEncode(_)
            | Self::MsgPackDecode(_)
            | Self::Protocol(_)
            | Self::ConnectionClosed
            | Self::SendTimeout => ErrorKind::Transport,
        }
    }
}

/// Result type alias using BridgeError.
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_service_message() {
        let err = BridgeError::UnknownService("nope".to_string());
        assert_eq!(err.to_string(), "Unknown service: nope");
        assert_eq!(err.kind(), ErrorKind::UnknownService);
    }

    #[test]
    fn test_handler_failure_keeps_handler_message() {
        let err = BridgeError::handler("disk full");
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.kind(), ErrorKind::HandlerFailure);
    }

    #[test]
    fn test_router_miss_is_not_a_handler_failure() {
        let routed = BridgeError::handler(BridgeError::UnknownMethod {
            service: "echo".into(),
            method: "missing".into(),
        });
        assert_eq!(routed.kind(), ErrorKind::UnknownMethod);
        assert_eq!(routed.to_string(), "Unknown method: echo.missing");

        let inner = BridgeError::handler(BridgeError::SendTimeout);
        assert_eq!(inner.kind(), ErrorKind::HandlerFailure);
    }

    #[test]
    fn test_transport_kinds() {
        assert_eq!(BridgeError::ConnectionClosed.kind(), ErrorKind::Transport);
        assert_eq!(
            BridgeError::Protocol("bad".into()).kind(),
            ErrorKind::Transport
        );
    }
}
