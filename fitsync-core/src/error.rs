//! Error types for the sync engine.
//!
//! Each layer reports its own error enum. The facade and the orchestrator
//! decide which of these are swallowed (logged and degraded) and which reach
//! the caller.
//!
//! | Error          | Raised by            | Reaches the caller?                      |
//! |----------------|----------------------|------------------------------------------|
//! | `QueueError`   | queue persistence    | never, logged by the queue               |
//! | `CodecError`   | schema/codec         | on writes with malformed payloads        |
//! | `MirrorError`  | local mirror         | only when the remote also failed on reads |
//! | `RemoteError`  | remote store         | never for CRUD, degraded to buffering    |
//! | `StoreError`   | data access facade   | yes                                      |
//! | `SyncError`    | orchestrator         | yes, `sync_now` while offline            |

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors persisting or loading the operation queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O error reading or writing the queue file.
    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The persisted queue could not be (de)serialized.
    #[error("queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors encoding a record into mirror columns or decoding it back.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A declared field holds a value of the wrong JSON type.
    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: &'static str,
        found: String,
    },

    /// A table, column or filter name is not a plain identifier.
    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    /// A JSON column held text that is not valid JSON.
    #[error("malformed JSON in column '{column}': {source}")]
    MalformedJson {
        column: String,
        #[source]
        source: serde_json::Error,
    },

    /// A timestamp column or field could not be parsed.
    #[error("malformed timestamp in '{field}': {value}")]
    MalformedTimestamp { field: String, value: String },

    /// The record payload is not a JSON object or uses a reserved key badly.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

/// Errors from the local mirror store.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// SQLite error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] sqlx::Error),

    /// Encode/decode error for a mirrored row.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// Could not prepare the database location.
    #[error("I/O error for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from the remote authoritative store.
///
/// `NotFound` is kept apart from the transient variants so callers can tell
/// "this document does not exist" from "the store could not be asked".
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// The document does not exist remotely.
    #[error("{collection}/{id} not found on remote")]
    NotFound { collection: String, id: String },

    /// The remote could not be reached (connection refused, DNS, reset).
    #[error("remote unreachable: {0}")]
    Unreachable(String),

    /// The call did not complete within its deadline.
    #[error("remote call timed out after {0:?}")]
    Timeout(Duration),

    /// The remote failed internally (5xx).
    #[error("remote server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// The remote refused the request (4xx other than 404).
    #[error("remote rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote answered with a body we could not decode.
    #[error("could not decode remote response: {0}")]
    Decode(String),

    /// No remote is configured for this engine.
    #[error("sync not configured. Add server_url and api_key to config.")]
    NotConfigured,
}

impl RemoteError {
    /// True for failures that say nothing about the request itself and
    /// should be treated as "currently unreachable".
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteError::Unreachable(_)
                | RemoteError::Timeout(_)
                | RemoteError::Server { .. }
                | RemoteError::NotConfigured
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound { .. })
    }
}

/// Errors returned to callers of the data access facade.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The payload does not fit the collection's schema.
    #[error("invalid record for '{collection}': {source}")]
    InvalidRecord {
        collection: String,
        #[source]
        source: CodecError,
    },

    /// A filter names a field that cannot be queried.
    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    /// The record exists in neither store.
    #[error("{collection}/{id} not found")]
    NotFound { collection: String, id: String },

    /// The remote failed and the local mirror could not serve the read.
    #[error("data unavailable: remote failed ({remote}) and local mirror failed ({local})")]
    Unavailable {
        remote: String,
        #[source]
        local: MirrorError,
    },

    /// A typed entity could not be converted to or from a record.
    #[error("entity conversion failed: {0}")]
    Entity(#[from] serde_json::Error),
}

/// Errors from the sync orchestrator.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A manual sync was requested while the remote is unreachable.
    #[error("cannot sync: remote store is unreachable")]
    Offline,
}

pub type StoreResult<T> = Result<T, StoreError>;
pub type MirrorResult<T> = Result<T, MirrorError>;
pub type RemoteResult<T> = Result<T, RemoteError>;
pub type QueueResult<T> = Result<T, QueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RemoteError::Unreachable("refused".into()).is_transient());
        assert!(RemoteError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(RemoteError::Server {
            status: 503,
            message: "busy".into()
        }
        .is_transient());
        assert!(RemoteError::NotConfigured.is_transient());

        let not_found = RemoteError::NotFound {
            collection: "workoutLogs".into(),
            id: "w1".into(),
        };
        assert!(!not_found.is_transient());
        assert!(not_found.is_not_found());
        assert!(!RemoteError::Rejected {
            status: 422,
            message: "bad payload".into()
        }
        .is_transient());
    }

    #[test]
    fn test_store_error_messages() {
        let err = StoreError::NotFound {
            collection: "attendance".into(),
            id: "a1".into(),
        };
        assert_eq!(err.to_string(), "attendance/a1 not found");
        assert_eq!(
            SyncError::Offline.to_string(),
            "cannot sync: remote store is unreachable"
        );
    }
}
