//! Components shared by the data access facade and the orchestrator.

use std::sync::{Arc, RwLock};

use crate::clock::Clock;
use crate::error::CodecError;
use crate::mirror::LocalMirror;
use crate::network::NetworkMonitor;
use crate::notice::{NoticeBus, SyncNotice};
use crate::operation::{NewOperation, OperationKind, PendingOperation};
use crate::queue::OperationQueue;
use crate::record::SyncState;
use crate::remote::RemoteStore;
use crate::schema::{CollectionSchema, SchemaRegistry};
use crate::settings::SyncSettings;

pub(crate) struct SyncContext {
    pub queue: OperationQueue,
    pub mirror: Arc<dyn LocalMirror>,
    pub remote: Arc<dyn RemoteStore>,
    pub monitor: NetworkMonitor,
    pub notices: NoticeBus,
    pub schemas: RwLock<SchemaRegistry>,
    pub clock: Arc<dyn Clock>,
    pub settings: SyncSettings,
}

impl SyncContext {
    pub fn schema(&self, collection: &str) -> Result<Arc<CollectionSchema>, CodecError> {
        self.schemas
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .resolve(collection)
    }

    /// Queues an operation and reports whatever it pushed out.
    pub async fn enqueue(&self, op: NewOperation) -> PendingOperation {
        let enqueued = self.queue.enqueue(op);
        if let Some(evicted) = enqueued.evicted {
            self.settle_lost(SyncNotice::OperationEvicted { operation: evicted })
                .await;
        }
        enqueued.operation
    }

    /// Publishes a notice for an operation that will never be replayed and
    /// flags its record, unless another queued operation still covers it.
    pub async fn settle_lost(&self, notice: SyncNotice) {
        let op = notice.operation().clone();
        self.notices.publish(notice);
        self.flag_lost(&op).await;
    }

    /// Marks the record of a lost operation as errored. Deletes have no row
    /// left to flag.
    pub async fn flag_lost(&self, op: &PendingOperation) {
        let clear = || !self.queue.has_pending_for(&op.collection, &op.target_id);
        if matches!(op.kind, OperationKind::Delete) || !clear() {
            return;
        }

        let schema = match self.schema(&op.collection) {
            Ok(schema) => schema,
            Err(e) => {
                tracing::warn!(collection = %op.collection, error = %e, "Unknown collection in lost operation");
                return;
            }
        };
        if let Err(e) = self
            .mirror
            .set_sync_state_if(&schema, &op.target_id, SyncState::Error, None, &clear)
            .await
        {
            tracing::warn!(
                collection = %op.collection,
                id = %op.target_id,
                error = %e,
                "Failed to mark record as errored"
            );
        }
    }
}
