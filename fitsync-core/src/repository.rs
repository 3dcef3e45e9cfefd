//! Data access facade: the single entry point for CRUD.
//!
//! Each write goes straight to the remote when it is reachable and nothing
//! is queued for the same record; otherwise it is applied to the local
//! mirror and buffered in the operation queue. Remote failures never reach
//! the caller of a write. Reads prefer the remote and fall back to the
//! mirror.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::context::SyncContext;
use crate::error::{CodecError, MirrorError, RemoteError, RemoteResult, StoreError, StoreResult};
use crate::filter::Filter;
use crate::models::Entity;
use crate::operation::NewOperation;
use crate::record::{
    format_timestamp, strip_reserved, Document, Record, SyncState, LAST_SYNCED_AT_KEY,
    SYNC_STATE_KEY, UPDATED_AT_KEY,
};
use crate::schema::{CollectionSchema, FieldKind};

#[derive(Clone)]
pub struct SyncRepository {
    ctx: Arc<SyncContext>,
}

impl SyncRepository {
    pub(crate) fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    fn schema(&self, collection: &str) -> StoreResult<Arc<CollectionSchema>> {
        self.ctx
            .schema(collection)
            .map_err(|source| invalid(collection, source))
    }

    /// Direct writes must not overtake buffered ones for the same record.
    fn can_write_direct(&self, collection: &str, id: &str) -> bool {
        self.ctx.monitor.is_reachable() && !self.ctx.queue.has_pending_for(collection, id)
    }

    /// Bounds a remote call and feeds transient failures to the monitor.
    async fn remote_call<T>(&self, call: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        let timeout = self.ctx.settings.request_timeout;
        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        };
        if let Err(e) = &result {
            self.ctx.monitor.report_failure(e);
        }
        result
    }

    async fn mirror_upsert(&self, schema: &CollectionSchema, record: &Record) {
        if let Err(e) = self.ctx.mirror.upsert(schema, record).await {
            warn_mirror(&schema.name, &record.id, &e);
        }
    }

    /// Flags the record synced if no queued operation still references it.
    /// Returns whether the flag was written.
    async fn settle_if_replayed(&self, schema: &CollectionSchema, id: &str) -> bool {
        let queue = &self.ctx.queue;
        let clear = || !queue.has_pending_for(&schema.name, id);
        if !clear() {
            return false;
        }
        let now = self.ctx.clock.now();
        match self
            .ctx
            .mirror
            .set_sync_state_if(schema, id, SyncState::Synced, Some(now), &clear)
            .await
        {
            Ok(written) => written,
            Err(e) => {
                warn_mirror(&schema.name, id, &e);
                false
            }
        }
    }

    /// Creates a record, assigning an id if the payload has none.
    pub async fn create(&self, collection: &str, mut fields: Document) -> StoreResult<Record> {
        let schema = self.schema(collection)?;
        let id = strip_reserved(&mut fields).unwrap_or_else(|| Uuid::new_v4().to_string());
        schema
            .validate_fields(&fields)
            .and_then(|()| schema.normalize(&mut fields))
            .map_err(|source| invalid(collection, source))?;

        let now = self.ctx.clock.now();
        let mut record = Record::new(id, fields, now);
        let document = record.to_document();

        if self.can_write_direct(collection, &record.id) {
            let result = self
                .remote_call(self.ctx.remote.set(collection, &record.id, &document))
                .await;
            match result {
                Ok(()) => {
                    record.mark_synced(now);
                    self.mirror_upsert(&schema, &record).await;
                    tracing::debug!(collection, id = %record.id, "Created on remote");
                    return Ok(record);
                }
                Err(e) => {
                    tracing::info!(collection, id = %record.id, error = %e, "Remote create failed, buffering");
                }
            }
        }

        self.ctx
            .enqueue(NewOperation::create(collection, &record.id, document))
            .await;
        self.mirror_upsert(&schema, &record).await;
        self.settle_if_replayed(&schema, &record.id).await;
        Ok(record)
    }

    /// Reads one record. `Ok(None)` when neither store has it.
    pub async fn read(&self, collection: &str, id: &str) -> StoreResult<Option<Record>> {
        let schema = self.schema(collection)?;

        let remote_error = if self.ctx.monitor.is_reachable() {
            match self.remote_call(self.ctx.remote.get(collection, id)).await {
                Ok(document) => match Record::from_document(document, self.ctx.clock.now()) {
                    Ok(record) if record.id == id => {
                        return Ok(self.absorb_remote(&schema, record).await);
                    }
                    Ok(_) => Some("remote returned a document with a different id".to_string()),
                    Err(e) => Some(e.to_string()),
                },
                Err(e) => Some(e.to_string()),
            }
        } else {
            None
        };

        match self.ctx.mirror.get(&schema, id).await {
            Ok(record) => Ok(record),
            Err(local) => Err(StoreError::Unavailable {
                remote: remote_error.unwrap_or_else(|| "offline".to_string()),
                local,
            }),
        }
    }

    /// Mirrors a freshly fetched record, unless local edits are still queued
    /// for it, in which case the local row wins. A queued delete has already
    /// removed that row, so the record reads as gone.
    async fn absorb_remote(&self, schema: &CollectionSchema, record: Record) -> Option<Record> {
        if self.ctx.queue.has_pending_for(&schema.name, &record.id) {
            return match self.ctx.mirror.get(schema, &record.id).await {
                Ok(local) => local,
                Err(e) => {
                    warn_mirror(&schema.name, &record.id, &e);
                    Some(record)
                }
            };
        }
        self.mirror_upsert(schema, &record).await;
        Some(record)
    }

    /// Applies a partial update. Fails with `NotFound` only when the record
    /// exists in neither store.
    pub async fn update(
        &self,
        collection: &str,
        id: &str,
        mut patch: Document,
    ) -> StoreResult<Record> {
        let schema = self.schema(collection)?;
        strip_reserved(&mut patch);
        schema
            .validate_fields(&patch)
            .and_then(|()| schema.normalize(&mut patch))
            .map_err(|source| invalid(collection, source))?;

        let now = self.ctx.clock.now();
        let mut remote_patch = patch.clone();
        remote_patch.insert(
            UPDATED_AT_KEY.to_string(),
            Value::String(format_timestamp(&now)),
        );

        if self.can_write_direct(collection, id) {
            let result = self
                .remote_call(self.ctx.remote.patch(collection, id, &remote_patch))
                .await;
            match result {
                Ok(()) => return Ok(self.apply_confirmed_update(&schema, id, &patch, now).await),
                Err(e) if e.is_not_found() => {
                    tracing::info!(collection, id, "Record missing on remote, buffering update");
                }
                Err(e) => {
                    tracing::info!(collection, id, error = %e, "Remote update failed, buffering");
                }
            }
        }

        let local = match self.ctx.mirror.get(&schema, id).await {
            Ok(Some(record)) => Some(record),
            Ok(None) => return Err(not_found(collection, id)),
            Err(e) => {
                warn_mirror(collection, id, &e);
                None
            }
        };

        self.ctx
            .enqueue(NewOperation::update(collection, id, remote_patch))
            .await;

        let merged = match self
            .ctx
            .mirror
            .merge(&schema, id, &patch, now, SyncState::Pending)
            .await
        {
            Ok(Some(record)) => Some(record),
            Ok(None) => None,
            Err(e) => {
                warn_mirror(collection, id, &e);
                None
            }
        };
        self.settle_if_replayed(&schema, id).await;

        Ok(merged.unwrap_or_else(|| {
            let mut record = local.unwrap_or_else(|| Record::new(id, Document::new(), now));
            record.apply_patch(&patch, now);
            record.sync_state = SyncState::Pending;
            record
        }))
    }

    async fn apply_confirmed_update(
        &self,
        schema: &CollectionSchema,
        id: &str,
        patch: &Document,
        now: DateTime<Utc>,
    ) -> Record {
        // Merged as pending so a write buffered meanwhile keeps the row
        // pending; the guarded settle then flags it synced.
        let merged = match self
            .ctx
            .mirror
            .merge(schema, id, patch, now, SyncState::Pending)
            .await
        {
            Ok(merged) => merged,
            Err(e) => {
                warn_mirror(&schema.name, id, &e);
                None
            }
        };

        if let Some(mut record) = merged {
            if self.settle_if_replayed(schema, id).await {
                record.mark_synced(now);
            }
            return record;
        }

        // Not mirrored yet: fetch the full document once.
        let fetched = self
            .remote_call(self.ctx.remote.get(&schema.name, id))
            .await
            .ok()
            .and_then(|doc| Record::from_document(doc, now).ok());
        match fetched {
            Some(record) => {
                self.mirror_upsert(schema, &record).await;
                record
            }
            None => {
                let mut record = Record::new(id, patch.clone(), now);
                record.mark_synced(now);
                record
            }
        }
    }

    /// Deletes a record. The local row goes away immediately; the remote
    /// deletion happens now or on replay.
    pub async fn delete(&self, collection: &str, id: &str) -> StoreResult<()> {
        let schema = self.schema(collection)?;

        let mut confirmed = false;
        if self.can_write_direct(collection, id) {
            match self
                .remote_call(self.ctx.remote.delete(collection, id))
                .await
            {
                Ok(()) => confirmed = true,
                Err(e) if e.is_not_found() => confirmed = true,
                Err(e) => {
                    tracing::info!(collection, id, error = %e, "Remote delete failed, buffering");
                }
            }
        }

        if !confirmed {
            self.ctx.enqueue(NewOperation::delete(collection, id)).await;
        }
        if let Err(e) = self.ctx.mirror.delete(&schema, id).await {
            warn_mirror(collection, id, &e);
        }
        Ok(())
    }

    /// Lists records matching every filter.
    ///
    /// Filters on local bookkeeping (`syncState`, `lastSyncedAt`) are
    /// answered by the mirror alone, since the remote never stores them.
    pub async fn list(&self, collection: &str, filters: &[Filter]) -> StoreResult<Vec<Record>> {
        let schema = self.schema(collection)?;
        validate_filters(&schema, filters)?;
        let filters: Vec<Filter> = filters.iter().map(|f| schema.normalize_filter(f)).collect();
        let local_only = filters
            .iter()
            .any(|f| f.field == SYNC_STATE_KEY || f.field == LAST_SYNCED_AT_KEY);

        let remote_error = if local_only {
            Some("filter is on local sync state".to_string())
        } else if self.ctx.monitor.is_reachable() {
            match self.remote_call(self.ctx.remote.query(collection, &filters)).await {
                Ok(documents) => return Ok(self.refresh_list(&schema, &filters, documents).await),
                Err(e) => Some(e.to_string()),
            }
        } else {
            None
        };

        self.ctx
            .mirror
            .list(&schema, &filters)
            .await
            .map_err(|local| StoreError::Unavailable {
                remote: remote_error.unwrap_or_else(|| "offline".to_string()),
                local,
            })
    }

    /// Mirrors the remote rows, prunes synced rows the remote no longer has
    /// and returns the mirror's view.
    async fn refresh_list(
        &self,
        schema: &CollectionSchema,
        filters: &[Filter],
        documents: Vec<Document>,
    ) -> Vec<Record> {
        let now = self.ctx.clock.now();
        let mut remote_records = Vec::with_capacity(documents.len());
        for document in documents {
            match Record::from_document(document, now) {
                Ok(record) => remote_records.push(record),
                Err(e) => tracing::warn!(collection = %schema.name, error = %e, "Skipping malformed remote document"),
            }
        }

        let remote_ids: HashSet<&str> = remote_records.iter().map(|r| r.id.as_str()).collect();
        for record in &remote_records {
            if !self.ctx.queue.has_pending_for(&schema.name, &record.id) {
                self.mirror_upsert(schema, record).await;
            }
        }

        match self.ctx.mirror.list(schema, filters).await {
            Ok(local) => {
                let mut view = Vec::with_capacity(local.len());
                for record in local {
                    let gone = record.sync_state == SyncState::Synced
                        && !remote_ids.contains(record.id.as_str())
                        && !self.ctx.queue.has_pending_for(&schema.name, &record.id);
                    if !gone {
                        view.push(record);
                        continue;
                    }
                    tracing::debug!(collection = %schema.name, id = %record.id, "Pruning record deleted on remote");
                    if let Err(e) = self.ctx.mirror.delete(schema, &record.id).await {
                        warn_mirror(&schema.name, &record.id, &e);
                    }
                }
                view
            }
            Err(e) => {
                warn_mirror(&schema.name, "*", &e);
                remote_records
            }
        }
    }

    /// Registers or replaces a collection schema, e.g. to mirror a
    /// collection into a differently named table.
    pub fn register(&self, schema: CollectionSchema) -> StoreResult<()> {
        let name = schema.name.clone();
        self.ctx
            .schemas
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .register(schema)
            .map_err(|source| invalid(&name, source))
    }

    pub async fn create_entity<E: Entity>(&self, entity: &E) -> StoreResult<E> {
        let fields = entity_fields(entity)?;
        let record = self.create(E::COLLECTION, fields).await?;
        record_to_entity(&record)
    }

    pub async fn read_entity<E: Entity>(&self, id: &str) -> StoreResult<Option<E>> {
        self.read(E::COLLECTION, id)
            .await?
            .map(|record| record_to_entity(&record))
            .transpose()
    }

    pub async fn list_entities<E: Entity>(&self, filters: &[Filter]) -> StoreResult<Vec<E>> {
        self.list(E::COLLECTION, filters)
            .await?
            .iter()
            .map(record_to_entity)
            .collect()
    }
}

fn invalid(collection: &str, source: CodecError) -> StoreError {
    StoreError::InvalidRecord {
        collection: collection.to_string(),
        source,
    }
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn warn_mirror(collection: &str, id: &str, error: &MirrorError) {
    tracing::warn!(collection, id, error = %error, "Local mirror operation failed");
}

fn validate_filters(schema: &CollectionSchema, filters: &[Filter]) -> StoreResult<()> {
    for filter in filters {
        filter.validate().map_err(StoreError::InvalidFilter)?;
        let Some(def) = schema.field_def(&filter.field) else {
            continue;
        };
        if filter.value.is_null() || def.kind == FieldKind::Timestamp {
            continue;
        }
        def.kind
            .encode(&def.name, &filter.value)
            .map_err(|e| StoreError::InvalidFilter(e.to_string()))?;
    }
    Ok(())
}

fn entity_fields<E: Entity>(entity: &E) -> StoreResult<Document> {
    match serde_json::to_value(entity)? {
        Value::Object(fields) => Ok(fields),
        _ => Err(invalid(
            E::COLLECTION,
            CodecError::InvalidRecord("entity must serialize to a JSON object".to_string()),
        )),
    }
}

fn record_to_entity<E: Entity>(record: &Record) -> StoreResult<E> {
    Ok(serde_json::from_value(Value::Object(record.to_document()))?)
}
