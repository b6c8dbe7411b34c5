//! Correlation ids and per-request metadata.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Caller-generated correlation id linking a call to its response(s).
///
/// Unique among concurrently active calls only by convention: the UI side
/// reuses ids across retries, so the registry treats registration under an
/// existing id as a replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Create a request id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for RequestId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What kind of call a registry entry tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Long-lived call delivering zero or more responses.
    Streaming,
}

/// Metadata recorded alongside every registry entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestMetadata {
    pub kind: RequestKind,
    pub service: String,
    pub method: String,
}

impl RequestMetadata {
    /// Metadata for a streaming call.
    pub fn streaming(service: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            kind: RequestKind::Streaming,
            service: service.into(),
            method: method.into(),
        }
    }
}
