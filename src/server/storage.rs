//! Server-side document storage.
//!
//! Each collection is kept as a single JSON object mapping id to document:
//! ```text
//! <DATA_DIR>/
//!   workoutLogs.json
//!   nutritionLogs.json
//!   attendance.json
//! ```
//!
//! Collections are loaded lazily and cached; every write rewrites the whole
//! collection file through a temp file and rename.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::PathBuf;

use serde_json::Value;
use tokio::sync::Mutex;

use fitsync_core::filter::{matches_all, Filter};
use fitsync_core::Document;

type Collection = BTreeMap<String, Document>;

/// Errors that can occur during server storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error reading or writing a collection file.
    IoError(PathBuf, io::Error),
    /// A collection file exists but is not a JSON object of documents.
    ParseError(PathBuf, String),
    /// Invalid collection name (e.g., contains path separators).
    InvalidCollection(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StorageError::ParseError(path, e) => {
                write!(f, "Failed to parse collection {}: {}", path.display(), e)
            }
            StorageError::InvalidCollection(name) => {
                write!(f, "Invalid collection name: {}", name)
            }
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

/// JSON document store backing the reference sync server.
#[derive(Debug)]
pub struct DocumentStore {
    data_dir: PathBuf,
    cache: Mutex<HashMap<String, Collection>>,
}

impl DocumentStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Rejects names that could escape the data directory.
    fn validate_collection(name: &str) -> Result<(), StorageError> {
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.contains("..")
            || name.starts_with('.')
        {
            return Err(StorageError::InvalidCollection(name.to_string()));
        }
        Ok(())
    }

    fn collection_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", name))
    }

    async fn read_collection(&self, name: &str) -> Result<Collection, StorageError> {
        let path = self.collection_path(name);
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::ParseError(path, e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Collection::new()),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    async fn write_collection(&self, name: &str, docs: &Collection) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.data_dir)
            .await
            .map_err(|e| StorageError::IoError(self.data_dir.clone(), e))?;

        let path = self.collection_path(name);
        let temp_path = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(docs)
            .map_err(|e| StorageError::ParseError(path.clone(), e.to_string()))?;

        tokio::fs::write(&temp_path, bytes)
            .await
            .map_err(|e| StorageError::IoError(temp_path.clone(), e))?;
        tokio::fs::rename(&temp_path, &path)
            .await
            .map_err(|e| StorageError::IoError(path, e))?;
        Ok(())
    }

    /// Runs `f` against a collection, persisting it when `f` reports a change.
    async fn with_collection<T>(
        &self,
        name: &str,
        f: impl FnOnce(&mut Collection) -> (T, bool),
    ) -> Result<T, StorageError> {
        Self::validate_collection(name)?;

        let mut cache = self.cache.lock().await;
        if !cache.contains_key(name) {
            let docs = self.read_collection(name).await?;
            cache.insert(name.to_string(), docs);
        }
        let docs = cache
            .get_mut(name)
            .ok_or_else(|| StorageError::InvalidCollection(name.to_string()))?;

        let (result, changed) = f(docs);
        if changed {
            self.write_collection(name, docs).await?;
        }
        Ok(result)
    }

    /// Inserts or replaces a document. The stored copy always carries its id.
    pub async fn put(
        &self,
        collection: &str,
        id: &str,
        mut document: Document,
    ) -> Result<(), StorageError> {
        document.insert("id".to_string(), Value::String(id.to_string()));
        self.with_collection(collection, |docs| {
            docs.insert(id.to_string(), document);
            ((), true)
        })
        .await
    }

    /// Merges fields into an existing document. Returns the merged document,
    /// or `None` if it does not exist.
    pub async fn patch(
        &self,
        collection: &str,
        id: &str,
        fields: Document,
    ) -> Result<Option<Document>, StorageError> {
        self.with_collection(collection, |docs| match docs.get_mut(id) {
            Some(doc) => {
                for (key, value) in fields {
                    if key != "id" {
                        doc.insert(key, value);
                    }
                }
                (Some(doc.clone()), true)
            }
            None => (None, false),
        })
        .await
    }

    /// Removes a document. Returns false if it did not exist.
    pub async fn delete(&self, collection: &str, id: &str) -> Result<bool, StorageError> {
        self.with_collection(collection, |docs| {
            let removed = docs.remove(id).is_some();
            (removed, removed)
        })
        .await
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StorageError> {
        self.with_collection(collection, |docs| (docs.get(id).cloned(), false))
            .await
    }

    /// Documents matching every filter, in id order.
    pub async fn query(
        &self,
        collection: &str,
        filters: &[Filter],
    ) -> Result<Vec<Document>, StorageError> {
        self.with_collection(collection, |docs| {
            let matching = docs
                .values()
                .filter(|doc| matches_all(filters, doc))
                .cloned()
                .collect();
            (matching, false)
        })
        .await
    }
}
