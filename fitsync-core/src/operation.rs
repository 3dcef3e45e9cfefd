//! Buffered mutations awaiting replay against the remote store.

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::record::Document;

/// What a pending operation does. Delete carries no payload.
///
/// Serialized as `{"type": "create", "payload": {...}}` so the persisted
/// queue reads the same as the record layout it describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "lowercase")]
pub enum OperationKind {
    /// Insert-or-replace the full document.
    Create(Document),
    /// Patch the listed fields (including the new `updatedAt`).
    Update(Document),
    Delete,
}

impl OperationKind {
    pub fn name(&self) -> &'static str {
        match self {
            OperationKind::Create(_) => "create",
            OperationKind::Update(_) => "update",
            OperationKind::Delete => "delete",
        }
    }
}

/// A mutation as handed to the queue, before it gets an id.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOperation {
    pub collection: String,
    pub target_id: String,
    pub kind: OperationKind,
}

impl NewOperation {
    pub fn create(collection: &str, target_id: &str, document: Document) -> Self {
        Self {
            collection: collection.to_string(),
            target_id: target_id.to_string(),
            kind: OperationKind::Create(document),
        }
    }

    pub fn update(collection: &str, target_id: &str, fields: Document) -> Self {
        Self {
            collection: collection.to_string(),
            target_id: target_id.to_string(),
            kind: OperationKind::Update(fields),
        }
    }

    pub fn delete(collection: &str, target_id: &str) -> Self {
        Self {
            collection: collection.to_string(),
            target_id: target_id.to_string(),
            kind: OperationKind::Delete,
        }
    }
}

/// One entry of the operation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub id: String,
    pub collection: String,
    pub target_id: String,
    #[serde(flatten)]
    pub kind: OperationKind,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl PendingOperation {
    pub fn from_new(op: NewOperation, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            id: generate_operation_id(enqueued_at),
            collection: op.collection,
            target_id: op.target_id,
            kind: op.kind,
            enqueued_at,
            retry_count: 0,
            last_error: None,
        }
    }

    /// True if this operation applies to `(collection, id)`.
    pub fn targets(&self, collection: &str, id: &str) -> bool {
        self.collection == collection && self.target_id == id
    }
}

impl fmt::Display for PendingOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}/{} ({})",
            self.kind.name(),
            self.collection,
            self.target_id,
            self.id
        )
    }
}

/// Millisecond timestamp plus a random suffix, so ids sort by enqueue time
/// and stay distinct within the same millisecond.
fn generate_operation_id(at: DateTime<Utc>) -> String {
    let suffix: u32 = rand::rng().random();
    format!("{:013}-{:08x}", at.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, 8, 0, 0).unwrap()
    }

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn test_persisted_layout() {
        let op = PendingOperation::from_new(
            NewOperation::create("workoutLogs", "w1", doc(json!({"name": "Leg Day"}))),
            at(),
        );
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], json!("create"));
        assert_eq!(value["targetId"], json!("w1"));
        assert_eq!(value["payload"]["name"], json!("Leg Day"));
        assert_eq!(value["retryCount"], json!(0));
        assert_eq!(value["lastError"], Value::Null);

        let back: PendingOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back, op);
    }

    #[test]
    fn test_delete_has_no_payload() {
        let op = PendingOperation::from_new(NewOperation::delete("attendance", "a1"), at());
        let value = serde_json::to_value(&op).unwrap();
        assert_eq!(value["type"], json!("delete"));
        assert!(value.get("payload").is_none());

        let back: PendingOperation = serde_json::from_value(value).unwrap();
        assert_eq!(back.kind, OperationKind::Delete);
    }

    #[test]
    fn test_ids_are_distinct_and_time_ordered() {
        let a = PendingOperation::from_new(NewOperation::delete("c", "1"), at());
        let b = PendingOperation::from_new(NewOperation::delete("c", "1"), at());
        let later = PendingOperation::from_new(
            NewOperation::delete("c", "1"),
            at() + chrono::Duration::seconds(1),
        );
        assert_ne!(a.id, b.id);
        assert!(later.id > a.id);
        assert!(a.targets("c", "1"));
        assert!(!a.targets("c", "2"));
    }
}
