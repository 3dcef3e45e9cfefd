//! Durable, bounded queue of pending operations.
//!
//! The whole queue is written through a [`QueueStore`] on every mutation.
//! Persistence failures are logged and swallowed: the in-memory queue keeps
//! working for the rest of the process.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::Clock;
use crate::error::{QueueError, QueueResult};
use crate::operation::{NewOperation, PendingOperation};

/// Where the queue is persisted between runs.
pub trait QueueStore: Send + Sync {
    fn load(&self) -> QueueResult<Vec<PendingOperation>>;
    fn save(&self, operations: &[PendingOperation]) -> QueueResult<()>;
}

/// Queue persisted as a JSON array in one file.
#[derive(Debug, Clone)]
pub struct FileQueueStore {
    path: PathBuf,
}

impl FileQueueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> QueueError {
        QueueError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl QueueStore for FileQueueStore {
    fn load(&self) -> QueueResult<Vec<PendingOperation>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error(e)),
        };

        match serde_json::from_str(&content) {
            Ok(operations) => Ok(operations),
            Err(e) => {
                let aside = self.path.with_extension("json.corrupt");
                tracing::error!(
                    path = %self.path.display(),
                    moved_to = %aside.display(),
                    error = %e,
                    "Queue file is corrupt, starting with an empty queue"
                );
                fs::rename(&self.path, &aside).map_err(|e| self.io_error(e))?;
                Ok(Vec::new())
            }
        }
    }

    fn save(&self, operations: &[PendingOperation]) -> QueueResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }

        let json = serde_json::to_vec_pretty(operations)?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        Ok(())
    }
}

/// Queue bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueLimits {
    /// Entries kept before the oldest is evicted.
    pub capacity: usize,
    /// Failed attempts after which an operation is dropped.
    pub max_retries: u32,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_retries: 3,
        }
    }
}

/// Result of [`OperationQueue::enqueue`].
#[derive(Debug, Clone)]
pub struct Enqueued {
    pub operation: PendingOperation,
    /// The oldest entry, if it had to make room.
    pub evicted: Option<PendingOperation>,
}

/// Result of [`OperationQueue::increment_retry`].
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// Still queued, with the new retry count.
    Kept { retry_count: u32 },
    /// Hit the retry ceiling and was removed.
    Dropped(PendingOperation),
    /// No operation with that id.
    Missing,
}

pub struct OperationQueue {
    entries: Mutex<VecDeque<PendingOperation>>,
    store: Arc<dyn QueueStore>,
    limits: QueueLimits,
    clock: Arc<dyn Clock>,
    evicted: AtomicU64,
    /// Trimmed while loading; handed out once by `take_restored_evictions`.
    restored_evictions: Mutex<Vec<PendingOperation>>,
}

impl OperationQueue {
    /// Loads whatever the store holds. A failed load starts an empty queue.
    pub fn open(store: Arc<dyn QueueStore>, limits: QueueLimits, clock: Arc<dyn Clock>) -> Self {
        let mut entries: VecDeque<PendingOperation> = match store.load() {
            Ok(operations) => operations.into(),
            Err(e) => {
                tracing::error!(error = %e, "Failed to load operation queue, starting empty");
                VecDeque::new()
            }
        };

        let capacity = limits.capacity.max(1);
        let mut trimmed = Vec::new();
        while entries.len() > capacity {
            if let Some(op) = entries.pop_front() {
                tracing::warn!(op_id = %op.id, "Persisted queue exceeds capacity, evicting {}", op);
                trimmed.push(op);
            }
        }

        if !entries.is_empty() {
            tracing::info!(pending = entries.len(), "Restored operation queue");
        }

        let trimmed_any = !trimmed.is_empty();
        let queue = Self {
            entries: Mutex::new(entries),
            store,
            limits: QueueLimits { capacity, ..limits },
            clock,
            evicted: AtomicU64::new(trimmed.len() as u64),
            restored_evictions: Mutex::new(trimmed),
        };
        if trimmed_any {
            // Save the trimmed queue so the evicted entries stay gone.
            queue.persist(&queue.lock());
        }
        queue
    }

    /// Operations dropped while loading because the persisted queue was
    /// over capacity. Later calls return nothing.
    pub fn take_restored_evictions(&self) -> Vec<PendingOperation> {
        std::mem::take(&mut *self.restored_evictions.lock().unwrap_or_else(|e| e.into_inner()))
    }

    pub fn limits(&self) -> QueueLimits {
        self.limits
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<PendingOperation>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Writes the queue while the caller still holds the lock, so saves land
    /// in mutation order.
    fn persist(&self, entries: &VecDeque<PendingOperation>) {
        let snapshot: Vec<PendingOperation> = entries.iter().cloned().collect();
        if let Err(e) = self.store.save(&snapshot) {
            tracing::error!(error = %e, "Failed to persist operation queue, continuing in memory");
        }
    }

    /// Appends an operation, evicting the oldest entry when full.
    pub fn enqueue(&self, op: NewOperation) -> Enqueued {
        let operation = PendingOperation::from_new(op, self.clock.now());
        let mut entries = self.lock();

        let evicted = if entries.len() >= self.limits.capacity {
            let oldest = entries.pop_front();
            if let Some(ref old) = oldest {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    op_id = %old.id,
                    collection = %old.collection,
                    id = %old.target_id,
                    capacity = self.limits.capacity,
                    "Operation queue full, evicting oldest operation"
                );
            }
            oldest
        } else {
            None
        };

        entries.push_back(operation.clone());
        self.persist(&entries);
        tracing::debug!(op_id = %operation.id, "Enqueued {}", operation);

        Enqueued { operation, evicted }
    }

    /// A copy of every pending operation in enqueue order.
    pub fn list_all(&self) -> Vec<PendingOperation> {
        self.lock().iter().cloned().collect()
    }

    /// Removes an operation. Returns false if it was already gone.
    pub fn remove(&self, id: &str) -> bool {
        let mut entries = self.lock();
        let Some(pos) = entries.iter().position(|op| op.id == id) else {
            return false;
        };
        entries.remove(pos);
        self.persist(&entries);
        true
    }

    /// Counts a failed attempt, dropping the operation at the retry ceiling.
    pub fn increment_retry(&self, id: &str, error: &str) -> RetryOutcome {
        let mut entries = self.lock();
        let Some(pos) = entries.iter().position(|op| op.id == id) else {
            return RetryOutcome::Missing;
        };

        let retry_count = {
            let op = &mut entries[pos];
            op.retry_count += 1;
            op.last_error = Some(error.to_string());
            op.retry_count
        };

        let outcome = if retry_count >= self.limits.max_retries {
            match entries.remove(pos) {
                Some(dropped) => {
                    tracing::warn!(
                        op_id = %dropped.id,
                        retry_count = dropped.retry_count,
                        error,
                        "Dropping {} after reaching the retry limit",
                        dropped
                    );
                    RetryOutcome::Dropped(dropped)
                }
                None => RetryOutcome::Missing,
            }
        } else {
            RetryOutcome::Kept { retry_count }
        };

        self.persist(&entries);
        outcome
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().iter().any(|op| op.id == id)
    }

    /// True if any queued operation targets `(collection, id)`.
    pub fn has_pending_for(&self, collection: &str, id: &str) -> bool {
        self.lock().iter().any(|op| op.targets(collection, id))
    }

    /// Operations evicted for capacity since the queue was opened.
    pub fn evicted_count(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::operation::OperationKind;
    use chrono::{TimeZone, Utc};
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap(),
        ))
    }

    fn open(path: &Path, limits: QueueLimits) -> OperationQueue {
        OperationQueue::open(Arc::new(FileQueueStore::new(path)), limits, clock())
    }

    fn create(id: &str) -> NewOperation {
        let mut doc = serde_json::Map::new();
        doc.insert("name".to_string(), Value::String(format!("log {id}")));
        NewOperation::create("workoutLogs", id, doc)
    }

    #[test]
    fn test_enqueue_persists_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");

        let queue = open(&path, QueueLimits::default());
        let enqueued = queue.enqueue(create("w1"));
        assert!(enqueued.evicted.is_none());
        assert_eq!(enqueued.operation.retry_count, 0);

        let reopened = open(&path, QueueLimits::default());
        let ops = reopened.list_all();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].id, enqueued.operation.id);
        assert_eq!(ops[0].target_id, "w1");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let limits = QueueLimits {
            capacity: 3,
            max_retries: 3,
        };

        let queue = open(&path, limits);
        for i in 0..3 {
            queue.enqueue(create(&format!("w{i}")));
        }
        let result = queue.enqueue(create("w3"));
        let evicted = result.evicted.unwrap();
        assert_eq!(evicted.target_id, "w0");
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted_count(), 1);

        let persisted: Vec<Value> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(persisted.len(), 3);
        assert_eq!(persisted[0]["targetId"], json!("w1"));
    }

    #[test]
    fn test_list_all_is_a_copy() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir.path().join("q.json"), QueueLimits::default());
        queue.enqueue(create("w1"));

        let mut snapshot = queue.list_all();
        snapshot[0].kind = OperationKind::Delete;
        snapshot.clear();

        let ops = queue.list_all();
        assert_eq!(ops.len(), 1);
        assert!(matches!(ops[0].kind, OperationKind::Create(_)));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir.path().join("q.json"), QueueLimits::default());
        let op = queue.enqueue(create("w1")).operation;

        assert!(queue.remove(&op.id));
        assert!(!queue.remove(&op.id));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_retry_ceiling_drops_after_exactly_n_failures() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir.path().join("q.json"), QueueLimits::default());
        let op = queue.enqueue(create("w1")).operation;

        assert_eq!(
            queue.increment_retry(&op.id, "boom"),
            RetryOutcome::Kept { retry_count: 1 }
        );
        assert_eq!(
            queue.increment_retry(&op.id, "boom"),
            RetryOutcome::Kept { retry_count: 2 }
        );
        assert_eq!(queue.list_all()[0].last_error.as_deref(), Some("boom"));

        match queue.increment_retry(&op.id, "still boom") {
            RetryOutcome::Dropped(dropped) => {
                assert_eq!(dropped.retry_count, 3);
                assert_eq!(dropped.last_error.as_deref(), Some("still boom"));
            }
            other => panic!("expected drop, got {other:?}"),
        }
        assert!(queue.is_empty());
        assert_eq!(queue.increment_retry(&op.id, "gone"), RetryOutcome::Missing);
    }

    #[test]
    fn test_has_pending_for() {
        let dir = TempDir::new().unwrap();
        let queue = open(&dir.path().join("q.json"), QueueLimits::default());
        queue.enqueue(NewOperation::delete("attendance", "a1"));

        assert!(queue.has_pending_for("attendance", "a1"));
        assert!(!queue.has_pending_for("workoutLogs", "a1"));
    }

    #[test]
    fn test_corrupt_file_is_moved_aside() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "[{ not json").unwrap();

        let queue = open(&path, QueueLimits::default());
        assert!(queue.is_empty());
        assert!(dir.path().join("queue.json.corrupt").exists());

        queue.enqueue(create("w1"));
        assert_eq!(open(&path, QueueLimits::default()).len(), 1);
    }

    #[test]
    fn test_persistence_failure_keeps_queue_in_memory() {
        let dir = TempDir::new().unwrap();
        // Parent of the queue path is a regular file, so every save fails.
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "").unwrap();
        let queue = open(&blocker.join("queue.json"), QueueLimits::default());

        let op = queue.enqueue(create("w1")).operation;
        queue.enqueue(create("w2"));
        assert_eq!(queue.len(), 2);
        assert!(queue.remove(&op.id));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_open_trims_oversized_queue() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("queue.json");
        let big = open(&path, QueueLimits::default());
        for i in 0..5 {
            big.enqueue(create(&format!("w{i}")));
        }

        let small = open(
            &path,
            QueueLimits {
                capacity: 2,
                max_retries: 3,
            },
        );
        let ids: Vec<String> = small.list_all().into_iter().map(|op| op.target_id).collect();
        assert_eq!(ids, vec!["w3", "w4"]);
        assert_eq!(small.evicted_count(), 3);

        let evicted: Vec<String> = small
            .take_restored_evictions()
            .into_iter()
            .map(|op| op.target_id)
            .collect();
        assert_eq!(evicted, vec!["w0", "w1", "w2"]);
        assert!(small.take_restored_evictions().is_empty());

        // The trimmed queue is what a later open sees
        let again = open(&path, QueueLimits::default());
        assert_eq!(again.len(), 2);
        assert!(again.take_restored_evictions().is_empty());
    }
}
