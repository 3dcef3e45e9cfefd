//! Local mirror: a full, queryable copy of every entity, tagged with its
//! sync state.
//!
//! The mirror is both the read cache and the fallback source of truth while
//! the remote is unreachable. Implementations serialize their own writes.

mod sqlite;

pub use sqlite::{init_db, SqliteMirror};

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;

use crate::error::MirrorResult;
use crate::filter::Filter;
use crate::record::{Document, Record, SyncState};
use crate::schema::CollectionSchema;

pub trait LocalMirror: Send + Sync {
    /// Inserts or replaces the record by id.
    fn upsert<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        record: &'a Record,
    ) -> BoxFuture<'a, MirrorResult<()>>;

    fn get<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
    ) -> BoxFuture<'a, MirrorResult<Option<Record>>>;

    /// Applies `patch` to an existing row in one step and returns the result.
    /// `Ok(None)` if the row does not exist.
    fn merge<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        patch: &'a Document,
        updated_at: DateTime<Utc>,
        state: SyncState,
    ) -> BoxFuture<'a, MirrorResult<Option<Record>>>;

    /// Removes the row. Returns false if it did not exist.
    fn delete<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
    ) -> BoxFuture<'a, MirrorResult<bool>>;

    /// Rows matching every filter, oldest first.
    fn list<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        filters: &'a [Filter],
    ) -> BoxFuture<'a, MirrorResult<Vec<Record>>>;

    /// Updates a row's sync bookkeeping. `synced_at` of `None` leaves
    /// `lastSyncedAt` untouched. Returns false if the row does not exist.
    fn set_sync_state<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        state: SyncState,
        synced_at: Option<DateTime<Utc>>,
    ) -> BoxFuture<'a, MirrorResult<bool>>;

    /// Like [`set_sync_state`](Self::set_sync_state), but only if `guard`
    /// still returns true once this mirror's write lock is held. Writes that
    /// flag a row pending after queueing an operation then cannot be
    /// overwritten by a stale check. Returns false if skipped or missing.
    fn set_sync_state_if<'a>(
        &'a self,
        schema: &'a CollectionSchema,
        id: &'a str,
        state: SyncState,
        synced_at: Option<DateTime<Utc>>,
        guard: &'a (dyn Fn() -> bool + Send + Sync),
    ) -> BoxFuture<'a, MirrorResult<bool>>;
}
