//! Request registry for tracking in-flight streaming calls.
//!
//! The registry maps correlation ids to the cleanup, metadata and emitter of
//! the active stream. It is the only shared mutable state in the dispatch
//! path; every mutation happens under one lock, and cleanups always run
//! after the lock is released.
//!
//! Registration is last-writer-wins: registering under an id that is still
//! active replaces the old entry and hands it back to the caller, who decides
//! whether the reuse is worth reporting.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::{Emitter, RequestId, RequestMetadata};
use crate::error::{BoxError, BridgeError, Result};
use crate::handler::BoxFuture;

type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, std::result::Result<(), BoxError>> + Send>;

/// Work to run when a request is cancelled. Runs at most once.
pub struct Cleanup(CleanupFn);

impl Cleanup {
    /// Wrap an async cleanup closure.
    pub fn new<F, Fut>(cleanup: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), BoxError>> + Send + 'static,
    {
        Self(Box::new(move || Box::pin(cleanup())))
    }

    /// Cleanup that does nothing.
    pub fn noop() -> Self {
        Self::new(|| async { Ok(()) })
    }

    /// Run the cleanup, consuming it.
    pub async fn run(self) -> std::result::Result<(), BoxError> {
        (self.0)().await
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Cleanup")
    }
}

/// Record of one active streaming call.
#[derive(Debug)]
pub struct RegistryEntry {
    cleanup: Cleanup,
    metadata: RequestMetadata,
    emitter: Emitter,
}

impl RegistryEntry {
    /// Metadata recorded at registration.
    pub fn metadata(&self) -> &RequestMetadata {
        &self.metadata
    }

    /// Emitter bound to the call.
    pub fn emitter(&self) -> &Emitter {
        &self.emitter
    }

    /// Take the cleanup out of the entry.
    pub fn into_cleanup(self) -> Cleanup {
        self.cleanup
    }
}

/// Snapshot of an entry returned by [`RequestRegistry::get_request_info`].
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub metadata: RequestMetadata,
    pub emitter: Emitter,
}

type Entries = Mutex<HashMap<RequestId, RegistryEntry>>;

/// Registry of in-flight streaming calls, keyed by correlation id.
///
/// Cheap to clone; clones share the same map.
#[derive(Clone, Default)]
pub struct RequestRegistry {
    entries: Arc<Entries>,
}

/// Non-owning reference held by stream adapters to release their entry.
#[derive(Clone)]
pub(crate) struct WeakRegistry(Weak<Entries>);

impl RequestRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `id`.
    ///
    /// Never runs `cleanup` or emits anything. Returns the replaced entry, if
    /// any; dropping it discards its cleanup without running it.
    pub fn register_request(
        &self,
        id: RequestId,
        cleanup: Cleanup,
        metadata: RequestMetadata,
        emitter: Emitter,
    ) -> Option<RegistryEntry> {
        tracing::debug!(
            request_id = %id,
            service = %metadata.service,
            method = %metadata.method,
            "registering request"
        );

        let entry = RegistryEntry {
            cleanup,
            metadata,
            emitter,
        };
        self.entries.lock().insert(id, entry)
    }

    /// Look up the entry for `id`.
    pub fn get_request_info(&self, id: &str) -> Option<RequestInfo> {
        self.entries.lock().get(id).map(|entry| RequestInfo {
            metadata: entry.metadata.clone(),
            emitter: entry.emitter.clone(),
        })
    }

    /// Cancel the request registered under `id`.
    ///
    /// Removes the entry and runs its cleanup exactly once, returning
    /// `Ok(true)`. Returns `Ok(false)` without side effects when nothing is
    /// registered. A failing cleanup is returned as
    /// [`BridgeError::CleanupFailure`]; the entry is gone either way.
    pub async fn cancel_request(&self, id: &str) -> Result<bool> {
        let entry = self.entries.lock().remove(id);

        let Some(entry) = entry else {
            tracing::debug!(request_id = %id, "cancel for unknown request");
            return Ok(false);
        };

        tracing::debug!(request_id = %id, "cancelling request");
        entry
            .into_cleanup()
            .run()
            .await
            .map_err(BridgeError::CleanupFailure)?;
        Ok(true)
    }

    /// Cancel every registered request.
    ///
    /// Returns each drained id with the outcome of its cleanup.
    pub async fn cancel_all(&self) -> Vec<(RequestId, Result<()>)> {
        let drained: Vec<_> = self.entries.lock().drain().collect();

        let mut outcomes = Vec::with_capacity(drained.len());
        for (id, entry) in drained {
            let outcome = entry
                .into_cleanup()
                .run()
                .await
                .map_err(BridgeError::CleanupFailure);
            outcomes.push((id, outcome));
        }
        outcomes
    }

    /// Check whether `id` has an active entry.
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Number of active entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether no requests are active.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Ids and metadata of every active request.
    pub fn active_requests(&self) -> Vec<(RequestId, RequestMetadata)> {
        self.entries
            .lock()
            .iter()
            .map(|(id, entry)| (id.clone(), entry.metadata.clone()))
            .collect()
    }

    pub(crate) fn downgrade(&self) -> WeakRegistry {
        WeakRegistry(Arc::downgrade(&self.entries))
    }
}

impl fmt::Debug for RequestRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestRegistry")
            .field("active", &self.len())
            .finish()
    }
}

impl WeakRegistry {
    /// Remove the entry for `id` only if it still belongs to `adapter`.
    pub(crate) fn release_entry(&self, id: &RequestId, adapter: *const ()) {
        let Some(entries) = self.0.upgrade() else {
            return;
        };

        let released = {
            let mut map = entries.lock();
            let owned = map
                .get(id)
                .map_or(false, |entry| entry.emitter.is_adapter(adapter));
            if owned {
                map.remove(id)
            } else {
                None
            }
        };

        if released.is_some() {
            tracing::debug!(request_id = %id, "stream completed, entry released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{StreamCallbacks, StreamObserver};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn silent() -> Arc<dyn StreamObserver> {
        Arc::new(StreamCallbacks::new(|_| Ok(())))
    }

    fn counting_cleanup(counter: &Arc<AtomicUsize>) -> Cleanup {
        let counter = counter.clone();
        Cleanup::new(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn meta() -> RequestMetadata {
        RequestMetadata::streaming("counter", "tick")
    }

    #[tokio::test]
    async fn test_register_does_not_run_cleanup() {
        let registry = RequestRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let emitter = Emitter::new("r1".into(), silent(), &registry);

        let replaced = registry.register_request("r1".into(), counting_cleanup(&runs), meta(), emitter);

        assert!(replaced.is_none());
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(registry.contains("r1"));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_get_request_info() {
        let registry = RequestRegistry::new();
        let emitter = Emitter::new("r1".into(), silent(), &registry);
        registry.register_request("r1".into(), Cleanup::noop(), meta(), emitter.clone());

        let info = registry.get_request_info("r1").unwrap();
        assert_eq!(info.metadata, meta());
        assert!(info.emitter.same_stream(&emitter));
        assert!(registry.get_request_info("r2").is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let registry = RequestRegistry::new();
        assert!(!registry.cancel_request("missing").await.unwrap());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_runs_cleanup_exactly_once() {
        let registry = RequestRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let emitter = Emitter::new("r1".into(), silent(), &registry);
        registry.register_request("r1".into(), counting_cleanup(&runs), meta(), emitter);

        assert!(registry.cancel_request("r1").await.unwrap());
        assert!(!registry.cancel_request("r1").await.unwrap());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!registry.contains("r1"));
    }

    #[tokio::test]
    async fn test_register_replaces_and_returns_previous() {
        let registry = RequestRegistry::new();
        let first_runs = Arc::new(AtomicUsize::new(0));
        let second_runs = Arc::new(AtomicUsize::new(0));
        let first = Emitter::new("r1".into(), silent(), &registry);
        let second = Emitter::new("r1".into(), silent(), &registry);

        registry.register_request("r1".into(), counting_cleanup(&first_runs), meta(), first.clone());
        let replaced = registry
            .register_request("r1".into(), counting_cleanup(&second_runs), meta(), second)
            .expect("previous entry returned");

        assert!(replaced.emitter().same_stream(&first));
        drop(replaced);
        assert_eq!(registry.len(), 1);

        assert!(registry.cancel_request("r1").await.unwrap());
        assert_eq!(first_runs.load(Ordering::SeqCst), 0);
        assert_eq!(second_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cleanup_failure_propagates() {
        let registry = RequestRegistry::new();
        let emitter = Emitter::new("r1".into(), silent(), &registry);
        let cleanup = Cleanup::new(|| async { Err("handler stuck".into()) });
        registry.register_request("r1".into(), cleanup, meta(), emitter);

        let err = registry.cancel_request("r1").await.unwrap_err();
        assert!(matches!(err, BridgeError::CleanupFailure(_)));
        assert!(err.to_string().contains("handler stuck"));
        assert!(!registry.contains("r1"));
    }

    #[tokio::test]
    async fn test_concurrent_cancel_runs_cleanup_once() {
        let registry = RequestRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        let emitter = Emitter::new("r1".into(), silent(), &registry);
        registry.register_request("r1".into(), counting_cleanup(&runs), meta(), emitter);

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.cancel_request("r1").await.unwrap() })
            })
            .collect();

        let mut cancelled = 0;
        for task in tasks {
            if task.await.unwrap() {
                cancelled += 1;
            }
        }

        assert_eq!(cancelled, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_all_drains_everything() {
        let registry = RequestRegistry::new();
        let runs = Arc::new(AtomicUsize::new(0));
        for id in ["a", "b", "c"] {
            let emitter = Emitter::new(id.into(), silent(), &registry);
            registry.register_request(id.into(), counting_cleanup(&runs), meta(), emitter);
        }

        let outcomes = registry.cancel_all().await;

        assert_eq!(outcomes.len(), 3);
        assert!(outcomes.iter().all(|(_, outcome)| outcome.is_ok()));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_active_requests() {
        let registry = RequestRegistry::new();
        let emitter = Emitter::new("r1".into(), silent(), &registry);
        registry.register_request("r1".into(), Cleanup::noop(), meta(), emitter);

        let active = registry.active_requests();
        assert_eq!(active, vec![(RequestId::from("r1"), meta())]);
    }
}
