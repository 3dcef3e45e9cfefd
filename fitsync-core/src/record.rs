//! Entity records and their per-record sync bookkeeping.
//!
//! A [`Record`] is what the local mirror stores: the domain fields plus
//! `createdAt`/`updatedAt` and the local-only `syncState`/`lastSyncedAt`.
//! The remote holds a [`Document`], which is the same thing minus the
//! local-only fields.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

/// A JSON object as stored remotely.
pub type Document = serde_json::Map<String, Value>;

pub const ID_KEY: &str = "id";
pub const CREATED_AT_KEY: &str = "createdAt";
pub const UPDATED_AT_KEY: &str = "updatedAt";
pub const SYNC_STATE_KEY: &str = "syncState";
pub const LAST_SYNCED_AT_KEY: &str = "lastSyncedAt";

/// Keys owned by the engine rather than by the domain payload.
pub const RESERVED_KEYS: [&str; 5] = [
    ID_KEY,
    CREATED_AT_KEY,
    UPDATED_AT_KEY,
    SYNC_STATE_KEY,
    LAST_SYNCED_AT_KEY,
];

/// Per-record sync status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    /// Confirmed by the remote; no pending operation references the record.
    Synced,
    /// At least one pending operation references the record.
    Pending,
    /// An operation for the record was dropped; it will not sync on its own.
    Error,
}

impl SyncState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::Synced => "synced",
            SyncState::Pending => "pending",
            SyncState::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "synced" => Ok(SyncState::Synced),
            "pending" => Ok(SyncState::Pending),
            "error" => Ok(SyncState::Error),
            _ => Err(format!(
                "Invalid sync state '{}'. Valid options: synced, pending, error",
                s
            )),
        }
    }
}

/// Formats a timestamp the way every store in the engine persists it.
///
/// Fixed precision keeps the text sortable.
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, CodecError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| CodecError::MalformedTimestamp {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// An entity as held by the local mirror.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(flatten)]
    pub fields: Document,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sync_state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
}

impl Record {
    /// A fresh, not yet synced record stamped at `now`.
    pub fn new(id: impl Into<String>, fields: Document, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            fields,
            created_at: now,
            updated_at: now,
            sync_state: SyncState::Pending,
            last_synced_at: None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        match field {
            ID_KEY => None,
            _ => self.fields.get(field),
        }
    }

    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.sync_state = SyncState::Synced;
        self.last_synced_at = Some(at);
    }

    /// Applies a partial update on top of the current fields.
    pub fn apply_patch(&mut self, patch: &Document, at: DateTime<Utc>) {
        for (key, value) in patch {
            if !RESERVED_KEYS.contains(&key.as_str()) {
                self.fields.insert(key.clone(), value.clone());
            }
        }
        self.updated_at = at;
    }

    /// The remote representation: domain fields plus id and timestamps.
    pub fn to_document(&self) -> Document {
        let mut doc = self.fields.clone();
        doc.insert(ID_KEY.to_string(), Value::String(self.id.clone()));
        doc.insert(
            CREATED_AT_KEY.to_string(),
            Value::String(format_timestamp(&self.created_at)),
        );
        doc.insert(
            UPDATED_AT_KEY.to_string(),
            Value::String(format_timestamp(&self.updated_at)),
        );
        doc
    }

    /// Builds a record from a remote document.
    ///
    /// Missing timestamps fall back to `now`. The result is marked synced at
    /// `now`, since it was just read from the authoritative store.
    pub fn from_document(mut doc: Document, now: DateTime<Utc>) -> Result<Self, CodecError> {
        let id = match doc.remove(ID_KEY) {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => {
                return Err(CodecError::InvalidRecord(
                    "document has no string id".to_string(),
                ))
            }
        };
        let created_at = take_timestamp(&mut doc, CREATED_AT_KEY)?.unwrap_or(now);
        let updated_at = take_timestamp(&mut doc, UPDATED_AT_KEY)?.unwrap_or(created_at);
        doc.remove(SYNC_STATE_KEY);
        doc.remove(LAST_SYNCED_AT_KEY);

        Ok(Self {
            id,
            fields: doc,
            created_at,
            updated_at,
            sync_state: SyncState::Synced,
            last_synced_at: Some(now),
        })
    }
}

fn take_timestamp(doc: &mut Document, key: &str) -> Result<Option<DateTime<Utc>>, CodecError> {
    match doc.remove(key) {
        Some(Value::String(s)) => parse_timestamp(key, &s).map(Some),
        Some(Value::Null) | None => Ok(None),
        Some(other) => Err(CodecError::MalformedTimestamp {
            field: key.to_string(),
            value: other.to_string(),
        }),
    }
}

/// Removes engine-owned keys from a caller payload.
///
/// Returns the caller-supplied id, if it was a non-empty string.
pub fn strip_reserved(doc: &mut Document) -> Option<String> {
    let id = match doc.remove(ID_KEY) {
        Some(Value::String(id)) if !id.trim().is_empty() => Some(id),
        _ => None,
    };
    for key in &RESERVED_KEYS[1..] {
        doc.remove(*key);
    }
    id
}
