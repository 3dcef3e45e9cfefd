//! User-facing notices about changes that will never reach the remote.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::operation::PendingOperation;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SyncNotice {
    /// Failed on every attempt up to the retry ceiling.
    OperationDropped {
        operation: PendingOperation,
        error: String,
    },
    /// Pushed out of a full queue.
    OperationEvicted { operation: PendingOperation },
}

impl SyncNotice {
    pub fn operation(&self) -> &PendingOperation {
        match self {
            SyncNotice::OperationDropped { operation, .. }
            | SyncNotice::OperationEvicted { operation } => operation,
        }
    }

    /// One line suitable for a toast or a log.
    pub fn message(&self) -> String {
        match self {
            SyncNotice::OperationDropped { operation, error } => format!(
                "Could not sync {} {}/{} after {} attempts: {}",
                operation.kind.name(),
                operation.collection,
                operation.target_id,
                operation.retry_count,
                error
            ),
            SyncNotice::OperationEvicted { operation } => format!(
                "Offline queue full; discarded {} {}/{}",
                operation.kind.name(),
                operation.collection,
                operation.target_id
            ),
        }
    }
}

/// Broadcasts notices and counts how many changes were lost.
pub struct NoticeBus {
    sender: broadcast::Sender<SyncNotice>,
    failed: AtomicU64,
}

impl NoticeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self {
            sender,
            failed: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncNotice> {
        self.sender.subscribe()
    }

    pub fn publish(&self, notice: SyncNotice) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        tracing::warn!(op_id = %notice.operation().id, "{}", notice.message());
        // Nobody listening is fine; the count still reaches the status.
        let _ = self.sender.send(notice);
    }

    /// Changes lost to eviction or retry exhaustion in this process.
    pub fn failed_changes(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Default for NoticeBus {
    fn default() -> Self {
        Self::new()
    }
}
