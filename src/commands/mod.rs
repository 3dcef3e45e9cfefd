mod config_cmd;
mod log;
mod record;
mod sync_cmd;

pub use config_cmd::ConfigCommand;
pub use log::{CheckinCommand, MealCommand, WorkoutCommand};
pub use record::RecordCommand;
pub use sync_cmd::SyncCommand;

use clap::ValueEnum;
use std::sync::Arc;

use fitsync_core::{
    Disconnected, FileQueueStore, HttpRemoteStore, RemoteStore, SqliteMirror, SyncEngine,
};

use crate::config::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Builds the engine from config and probes the server once.
///
/// Without a configured server every write is buffered locally.
pub async fn open_engine(config: &Config) -> Result<SyncEngine, Box<dyn std::error::Error>> {
    let settings = config.sync.settings();
    let mirror = Arc::new(SqliteMirror::open(&config.database_path.value).await?);

    let remote: Arc<dyn RemoteStore> = match (&config.sync.server_url, &config.sync.api_key) {
        (Some(url), Some(key)) => Arc::new(HttpRemoteStore::new(
            url,
            key,
            settings.request_timeout,
            settings.probe_timeout,
        )?),
        _ => Arc::new(Disconnected),
    };

    let engine = SyncEngine::builder(
        mirror,
        remote,
        Arc::new(FileQueueStore::new(config.queue_path.value.clone())),
    )
    .settings(settings)
    .build();

    if config.sync.is_configured() {
        engine.refresh_reachability().await;
    }
    Ok(engine)
}

/// Replays changes buffered by earlier runs when the server is reachable.
pub async fn flush_pending(engine: &SyncEngine) {
    if engine.queue().is_empty() || !engine.status().is_online {
        return;
    }
    if let Some(report) = engine.orchestrator().try_drain().await {
        tracing::debug!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Flushed pending changes"
        );
    }
}
