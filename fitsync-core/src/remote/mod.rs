//! Remote authoritative store: one JSON document per `(collection, id)`.
//!
//! Every call distinguishes "not found" from "could not ask" through
//! [`RemoteError`], which is what lets the engine decide between falling
//! back, buffering and giving up.

mod http;
mod memory;

pub use http::HttpRemoteStore;
pub use memory::{MemoryRemote, RemoteCall};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::error::{RemoteError, RemoteResult};
use crate::filter::Filter;
use crate::record::Document;

pub trait RemoteStore: Send + Sync {
    /// Inserts or replaces the document by id.
    fn set<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        document: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    /// Merges `fields` into an existing document.
    fn patch<'a>(
        &'a self,
        collection: &'a str,
        id: &'a str,
        fields: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>>;

    fn delete<'a>(&'a self, collection: &'a str, id: &'a str) -> BoxFuture<'a, RemoteResult<()>>;

    fn get<'a>(&'a self, collection: &'a str, id: &'a str)
        -> BoxFuture<'a, RemoteResult<Document>>;

    /// Documents matching every filter.
    fn query<'a>(
        &'a self,
        collection: &'a str,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, RemoteResult<Vec<Document>>>;

    /// Cheap application-level reachability check.
    fn probe(&self) -> BoxFuture<'_, RemoteResult<()>>;
}

/// Body of `POST /collections/{collection}/query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub filters: Vec<Filter>,
}

/// Response of `POST /collections/{collection}/query`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResponse {
    pub documents: Vec<Document>,
}

/// Stand-in remote for engines without a configured server.
///
/// Every call fails with [`RemoteError::NotConfigured`], which the engine
/// treats as unreachable, so all writes are buffered locally.
#[derive(Debug, Clone, Copy, Default)]
pub struct Disconnected;

impl RemoteStore for Disconnected {
    fn set<'a>(
        &'a self,
        _collection: &'a str,
        _id: &'a str,
        _document: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn patch<'a>(
        &'a self,
        _collection: &'a str,
        _id: &'a str,
        _fields: &'a Document,
    ) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn delete<'a>(&'a self, _collection: &'a str, _id: &'a str) -> BoxFuture<'a, RemoteResult<()>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn get<'a>(
        &'a self,
        _collection: &'a str,
        _id: &'a str,
    ) -> BoxFuture<'a, RemoteResult<Document>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn query<'a>(
        &'a self,
        _collection: &'a str,
        _filters: &'a [Filter],
    ) -> BoxFuture<'a, RemoteResult<Vec<Document>>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }

    fn probe(&self) -> BoxFuture<'_, RemoteResult<()>> {
        Box::pin(async { Err(RemoteError::NotConfigured) })
    }
}
