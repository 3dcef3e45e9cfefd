//! Background replay of the operation queue.
//!
//! A drain snapshots the queue and replays each operation in enqueue order.
//! Three triggers funnel into [`SyncOrchestrator::try_drain`]: reconnect
//! events, a periodic tick and explicit "sync now" requests. An atomic guard
//! lets only one drain run at a time; triggers that arrive meanwhile are
//! dropped, not queued.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::time::MissedTickBehavior;

use crate::context::SyncContext;
use crate::error::{RemoteError, RemoteResult, SyncError};
use crate::notice::SyncNotice;
use crate::operation::{OperationKind, PendingOperation};
use crate::queue::RetryOutcome;
use crate::record::SyncState;

/// Counts from one drain pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DrainReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub dropped: usize,
    /// Not attempted because an earlier operation on the same record failed.
    pub skipped: usize,
    /// The pass stopped early because the remote became unreachable.
    pub interrupted: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DrainReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            attempted: 0,
            succeeded: 0,
            failed: 0,
            dropped: 0,
            skipped: 0,
            interrupted: false,
            started_at,
            finished_at: started_at,
        }
    }
}

/// Snapshot for a sync indicator. Recomputed on every call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub pending_ops: usize,
    /// When the last uninterrupted drain finished.
    pub last_sync: Option<DateTime<Utc>>,
    pub is_online: bool,
    pub is_syncing: bool,
    /// Changes lost to eviction or the retry ceiling since startup.
    pub failed_changes: u64,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct SyncOrchestrator {
    ctx: Arc<SyncContext>,
    draining: AtomicBool,
    last_sync: Mutex<Option<DateTime<Utc>>>,
}

impl SyncOrchestrator {
    pub(crate) fn new(ctx: Arc<SyncContext>) -> Self {
        Self {
            ctx,
            draining: AtomicBool::new(false),
            last_sync: Mutex::new(None),
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn try_begin(&self) -> Option<DrainGuard<'_>> {
        self.draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| DrainGuard(&self.draining))
    }

    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            pending_ops: self.ctx.queue.len(),
            last_sync: *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()),
            is_online: self.ctx.monitor.is_reachable(),
            is_syncing: self.is_draining(),
            failed_changes: self.ctx.notices.failed_changes(),
        }
    }

    /// Runs one drain if the remote is reachable and no drain is running.
    ///
    /// Returns `None` when the trigger was dropped.
    pub async fn try_drain(&self) -> Option<DrainReport> {
        if !self.ctx.monitor.is_reachable() {
            tracing::debug!("Skipping drain: remote unreachable");
            return None;
        }
        let Some(_guard) = self.try_begin() else {
            tracing::debug!("Skipping drain: already draining");
            return None;
        };

        let report = self.drain().await;
        if !report.interrupted {
            *self.last_sync.lock().unwrap_or_else(|e| e.into_inner()) = Some(report.finished_at);
        }
        Some(report)
    }

    /// User-initiated sync. Fails fast when offline instead of queueing the
    /// request; `Ok(None)` means a drain was already running.
    pub async fn sync_now(&self) -> Result<Option<DrainReport>, SyncError> {
        if !self.ctx.monitor.is_reachable() {
            return Err(SyncError::Offline);
        }
        Ok(self.try_drain().await)
    }

    async fn drain(&self) -> DrainReport {
        let ctx = &self.ctx;
        let snapshot = ctx.queue.list_all();
        let mut report = DrainReport::new(ctx.clock.now());

        if snapshot.is_empty() {
            tracing::debug!("Operation queue empty");
            return report;
        }
        tracing::info!(pending = snapshot.len(), "Draining operation queue");

        let mut blocked: HashSet<(String, String)> = HashSet::new();
        for op in snapshot {
            if !ctx.queue.contains(&op.id) {
                // Evicted since the snapshot was taken.
                continue;
            }
            let target = (op.collection.clone(), op.target_id.clone());
            if blocked.contains(&target) {
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.replay(&op).await {
                Ok(()) => {
                    ctx.queue.remove(&op.id);
                    report.succeeded += 1;
                    tracing::debug!(op_id = %op.id, "Replayed {}", op);
                    self.confirm(&op).await;
                }
                Err(e) => {
                    report.failed += 1;
                    let message = e.to_string();
                    match ctx.queue.increment_retry(&op.id, &message) {
                        RetryOutcome::Kept { retry_count } => {
                            tracing::warn!(
                                op_id = %op.id,
                                retry_count,
                                error = %e,
                                "Replay failed, will retry {}",
                                op
                            );
                            blocked.insert(target);
                        }
                        RetryOutcome::Dropped(dropped) => {
                            report.dropped += 1;
                            ctx.settle_lost(SyncNotice::OperationDropped {
                                operation: dropped,
                                error: message,
                            })
                            .await;
                        }
                        RetryOutcome::Missing => {}
                    }

                    if e.is_transient() {
                        ctx.monitor.report_failure(&e);
                        report.interrupted = true;
                        break;
                    }
                }
            }
        }

        report.finished_at = ctx.clock.now();
        tracing::info!(
            attempted = report.attempted,
            succeeded = report.succeeded,
            failed = report.failed,
            dropped = report.dropped,
            skipped = report.skipped,
            interrupted = report.interrupted,
            "Drain finished"
        );
        report
    }

    /// Sends one operation to the remote, bounded by the request timeout.
    async fn replay(&self, op: &PendingOperation) -> RemoteResult<()> {
        let remote = &self.ctx.remote;
        let call = async {
            match &op.kind {
                OperationKind::Create(document) => {
                    remote.set(&op.collection, &op.target_id, document).await
                }
                OperationKind::Update(fields) => {
                    remote.patch(&op.collection, &op.target_id, fields).await
                }
                OperationKind::Delete => match remote.delete(&op.collection, &op.target_id).await {
                    Err(e) if e.is_not_found() => Ok(()),
                    other => other,
                },
            }
        };

        let timeout = self.ctx.settings.request_timeout;
        match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout(timeout)),
        }
    }

    /// Marks the record synced once nothing else is queued for it. The
    /// queue is checked again under the mirror's write lock, so a write
    /// buffered meanwhile keeps its pending flag.
    async fn confirm(&self, op: &PendingOperation) {
        let ctx = &self.ctx;
        let clear = || !ctx.queue.has_pending_for(&op.collection, &op.target_id);
        if matches!(op.kind, OperationKind::Delete) || !clear() {
            return;
        }

        let result = match ctx.schema(&op.collection) {
            Ok(schema) => ctx
                .mirror
                .set_sync_state_if(
                    &schema,
                    &op.target_id,
                    SyncState::Synced,
                    Some(ctx.clock.now()),
                    &clear,
                )
                .await
                .map(|_| ()),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::warn!(
                collection = %op.collection,
                id = %op.target_id,
                error = %e,
                "Replayed operation but failed to update local sync state"
            );
        }
    }

    /// Worker loop: drains on reconnect events and on every tick (which
    /// re-probes reachability first) until `shutdown` fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut reconnects = self.ctx.monitor.subscribe();
        let mut tick = tokio::time::interval(self.ctx.settings.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(interval = ?self.ctx.settings.interval, "Sync worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = reconnects.recv() => match event {
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        self.try_drain().await;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                _ = tick.tick() => {
                    let was_reachable = self.ctx.monitor.is_reachable();
                    // A false-to-true flip emits a reconnect event, which
                    // triggers the drain on the next iteration.
                    if self.ctx.monitor.refresh().await && was_reachable {
                        self.try_drain().await;
                    }
                }
            }
        }
        tracing::info!("Sync worker stopped");
    }
}
