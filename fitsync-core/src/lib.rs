//! FitSync Core Library
//!
//! Offline-first synchronization engine: a durable operation queue, a
//! SQLite mirror of every entity, a network monitor and a background
//! orchestrator that replays buffered writes against the remote store.

pub mod clock;
mod context;
pub mod engine;
pub mod error;
pub mod filter;
pub mod mirror;
pub mod models;
pub mod network;
pub mod notice;
pub mod operation;
pub mod orchestrator;
pub mod queue;
pub mod record;
pub mod remote;
pub mod repository;
pub mod schema;
pub mod settings;

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{BackgroundSync, SyncEngine, SyncEngineBuilder};
pub use error::{
    CodecError, MirrorError, QueueError, RemoteError, StoreError, StoreResult, SyncError,
};
pub use filter::{Filter, FilterOp};
pub use mirror::{LocalMirror, SqliteMirror};
pub use models::{
    Attendance, Entity, ExerciseSet, FoodEntry, MealLog, MealType, Nutrient, WorkoutLog,
};
pub use network::NetworkMonitor;
pub use notice::SyncNotice;
pub use operation::{OperationKind, PendingOperation};
pub use orchestrator::{DrainReport, SyncOrchestrator, SyncStatus};
pub use queue::{FileQueueStore, OperationQueue, QueueStore};
pub use record::{Document, Record, SyncState};
pub use remote::{Disconnected, HttpRemoteStore, MemoryRemote, RemoteStore};
pub use repository::SyncRepository;
pub use schema::{CollectionSchema, FieldKind, SchemaRegistry};
pub use settings::SyncSettings;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
