use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use futures::future::BoxFuture;

use super::RemoteStore;
use crate::error::{RemoteError, RemoteResult};
use crate::filter::{matches_all, Filter};
use crate::record::Document;

/// One call made against a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCall {
    pub method: &'static str,
    pub collection: String,
    pub id: Option<String>,
}

#[derive(Default)]
struct State {
    collections: HashMap<String, BTreeMap<String, Document>>,
    unreachable: bool,
    latency: Duration,
    fail_next: VecDeque<RemoteError>,
    failing_ids: HashMap<String, RemoteError>,
    calls: Vec<RemoteCall>,
}

/// In-process document store with failure injection.
///
/// Used by tests and by `fitsync` demos that run without a server. Calls are
/// recorded, and the number of calls in flight at once is tracked so
/// concurrency limits can be asserted.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Simulates an outage (every call fails as unreachable) or its end.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().unreachable = !reachable;
    }

    /// Fails the next call with `error`. Queued errors are used in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.lock().fail_next.push_back(error);
    }

    /// Fails every call naming `id` until cleared.
    pub fn fail_id(&self, id: &str, error: RemoteError) {
        self.lock().failing_ids.insert(id.to_string(), error);
    }

    pub fn clear_failures(&self) {
        let mut state = self.lock();
        state.fail_next.clear();
        state.failing_ids.clear();
    }

    /// Delay applied to every call before it is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Highest number of calls that were in flight at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Reads a document directly, bypassing failure injection.
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock()
            .collections
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Seeds or overwrites a document directly, as another device would.
    pub fn insert(&self, collection: &str, id: &str, document: Document) {
        self.lock()
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
    }

    /// Removes a document directly, as another device would.
    pub fn remove(&self, collection: &str, id: &str) -> Option<Document> {
        self.lock()
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id))
    }

    /// Records the call, waits out the latency and applies injected failures.
    async fn begin(
        &self,
        method: &'static str,
        collection: &str,
        id: Option<&str>,
    ) -> RemoteResult<InFlight<'_>> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let guard = InFlight(&self.in_flight);

        let latency = {
            let mut state = self.lock();
            state.calls.push(RemoteCall {
                method,
                collection: collection.to_string(),
                id: id.map(str::to_string),
            });
            state.latency
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let mut state = self.lock();
        if state.unreachable {
            return Err(RemoteError::Unreachable("simulated outage".to_string()));
        }
        if let Some(error) = state.fail_next.pop_front() {
            return Err(error);
        }
        if let Some(error) = id.and_then(|id| state.failing_ids.get(id)) {
            return Err(error.clone());
        }
        Ok(guard)
    }
}

fn not_found(collection: &str, id: &str) -> RemoteError {
    RemoteError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

impl RemoteStore for MemoryRemote {
    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        document: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let _call = self.begin("set", collection, Some(id)).await?;
            self.insert(collection, id, document.clone());
            Ok(())
        })
    }

    fn patch<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let _call = self.begin("patch", collection, Some(id)).await?;
            let mut state = self.lock();
            let existing = state
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| not_found(collection, id))?;
            for (key, value) in fields {
                existing.insert(key.clone(), value.clone());
            }
            Ok(())
        })
    }

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async move {
            let _call = self.begin("delete", collection, Some(id)).await?;
            self.remove(collection, id)
                .map(|_| ())
                .ok_or_else(|| not_found(collection, id))
        })
    }

    fn get<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Document>> {
        Box::pin(async move {
            let _call = self.begin("get", collection, Some(id)).await?;
            self.document(collection, id)
                .ok_or_else(|| not_found(collection, id))
        })
    }

    fn query<'a>(
        &'a self,
        collection: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, RemoteResult<Vec<Document>>> {
        Box::pin(async move {
            let _call = self.begin("query", collection, None).await?;
            Ok(self
                .documents(collection)
                .into_iter()
                .filter(|doc| matches_all(filters, doc))
                .collect())
        })
    }

    fn probe(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async move {
            let _call = self.begin("probe", "", None).await?;
            Ok(())
        })
    }
}
