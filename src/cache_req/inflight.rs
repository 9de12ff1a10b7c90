/// Single-flight registry for backend refreshes
///
/// At most one refresh per (domain, key) runs at a time. Later requests for
/// the same key await the running one. The refresh runs on its own task, so
/// it completes and writes through even when every waiter has gone away.
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn, Instrument};

/// What a finished refresh reports to every waiter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Backend answered with this many records, written through
    Found(usize),
    /// Backend confirmed the key does not exist
    NotFound,
    /// Backend could not be reached or answered garbage
    Unavailable(String),
    /// Backend answered but the local store rejected the write-through
    StoreFault(String),
}

pub type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Default)]
pub struct InflightRefreshes {
    pending: Mutex<HashMap<String, PendingRefresh>>,
}

impl InflightRefreshes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join the refresh running for `key`, or start `work` as that refresh
    ///
    /// The returned flag is true when an existing refresh was joined.
    pub fn join_or_start<F>(self: &Arc<Self>, key: String, work: F) -> (PendingRefresh, bool)
    where
        F: Future<Output = RefreshOutcome> + Send + 'static,
    {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = pending.get(&key) {
            debug!(key = %key, "Joining in-flight refresh");
            return (existing.clone(), true);
        }

        let registry = Arc::clone(self);
        let task_key = key.clone();
        // The refresh stays attributed to the request that started it
        let handle = tokio::spawn(
            async move {
                let outcome = work.await;
                registry.finish(&task_key);
                outcome
            }
            .in_current_span(),
        );

        let shared = async move {
            handle.await.unwrap_or_else(|e| {
                warn!(error = %e, "Refresh task failed");
                RefreshOutcome::StoreFault(format!("refresh task failed: {}", e))
            })
        }
        .boxed()
        .shared();

        pending.insert(key, shared.clone());
        (shared, false)
    }

    fn finish(&self, key: &str) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
