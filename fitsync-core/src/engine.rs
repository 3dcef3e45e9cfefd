//! Composition root for one sync engine instance.
//!
//! A [`SyncEngine`] owns a queue, a mirror handle, a remote handle, a
//! network monitor and an orchestrator. Nothing is global, so several
//! engines can live side by side in one process.

use std::sync::{Arc, RwLock};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::context::SyncContext;
use crate::error::SyncError;
use crate::mirror::LocalMirror;
use crate::network::NetworkMonitor;
use crate::notice::{NoticeBus, SyncNotice};
use crate::operation::PendingOperation;
use crate::orchestrator::{DrainReport, SyncOrchestrator, SyncStatus};
use crate::queue::{OperationQueue, QueueStore};
use crate::remote::RemoteStore;
use crate::repository::SyncRepository;
use crate::schema::SchemaRegistry;
use crate::settings::SyncSettings;

pub struct SyncEngineBuilder {
    mirror: Arc<dyn LocalMirror>,
    remote: Arc<dyn RemoteStore>,
    queue_store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
    schemas: SchemaRegistry,
}

impl SyncEngineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn settings(mut self, settings: SyncSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replaces the built-in schemas.
    pub fn schemas(mut self, schemas: SchemaRegistry) -> Self {
        self.schemas = schemas;
        self
    }

    /// Loads the persisted queue and wires the components together.
    pub fn build(self) -> SyncEngine {
        let queue = OperationQueue::open(
            self.queue_store,
            self.settings.queue_limits(),
            Arc::clone(&self.clock),
        );
        let monitor = NetworkMonitor::new(Arc::clone(&self.remote), self.settings.probe_timeout);

        let ctx = Arc::new(SyncContext {
            queue,
            mirror: self.mirror,
            remote: self.remote,
            monitor,
            notices: NoticeBus::new(),
            schemas: RwLock::new(self.schemas),
            clock: self.clock,
            settings: self.settings,
        });

        settle_restored_evictions(&ctx);

        tracing::debug!(pending = ctx.queue.len(), "Sync engine ready");
        SyncEngine {
            repository: SyncRepository::new(Arc::clone(&ctx)),
            orchestrator: Arc::new(SyncOrchestrator::new(Arc::clone(&ctx))),
            ctx,
        }
    }
}

/// Reports operations the queue trimmed while loading. The notices and the
/// failed-change count are immediate; flagging the records needs the mirror
/// and runs on the current tokio runtime.
fn settle_restored_evictions(ctx: &Arc<SyncContext>) {
    let evicted = ctx.queue.take_restored_evictions();
    if evicted.is_empty() {
        return;
    }
    for op in &evicted {
        ctx.notices.publish(SyncNotice::OperationEvicted {
            operation: op.clone(),
        });
    }

    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            let ctx = Arc::clone(ctx);
            handle.spawn(async move {
                for op in &evicted {
                    ctx.flag_lost(op).await;
                }
            });
        }
        Err(_) => tracing::warn!(
            evicted = evicted.len(),
            "No tokio runtime, evicted records keep their pending flag"
        ),
    }
}

pub struct SyncEngine {
    ctx: Arc<SyncContext>,
    repository: SyncRepository,
    orchestrator: Arc<SyncOrchestrator>,
}

impl SyncEngine {
    pub fn builder(
        mirror: Arc<dyn LocalMirror>,
        remote: Arc<dyn RemoteStore>,
        queue_store: Arc<dyn QueueStore>,
    ) -> SyncEngineBuilder {
        SyncEngineBuilder {
            mirror,
            remote,
            queue_store,
            clock: Arc::new(SystemClock),
            settings: SyncSettings::default(),
            schemas: SchemaRegistry::with_defaults(),
        }
    }

    /// The data access facade. Cheap to clone.
    pub fn repository(&self) -> &SyncRepository {
        &self.repository
    }

    pub fn orchestrator(&self) -> &SyncOrchestrator {
        &self.orchestrator
    }

    pub fn monitor(&self) -> &NetworkMonitor {
        &self.ctx.monitor
    }

    pub fn queue(&self) -> &OperationQueue {
        &self.ctx.queue
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.ctx.settings
    }

    pub fn pending_operations(&self) -> Vec<PendingOperation> {
        self.ctx.queue.list_all()
    }

    pub fn status(&self) -> SyncStatus {
        self.orchestrator.status()
    }

    pub fn subscribe_notices(&self) -> broadcast::Receiver<SyncNotice> {
        self.ctx.notices.subscribe()
    }

    /// Probes the remote and returns whether it is reachable.
    pub async fn refresh_reachability(&self) -> bool {
        self.ctx.monitor.refresh().await
    }

    pub async fn set_link_state(&self, connected: bool) -> bool {
        self.ctx.monitor.set_link_state(connected).await
    }

    pub async fn sync_now(&self) -> Result<Option<DrainReport>, SyncError> {
        self.orchestrator.sync_now().await
    }

    /// Starts the background worker on the current tokio runtime.
    pub fn spawn_background(&self) -> BackgroundSync {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let orchestrator = Arc::clone(&self.orchestrator);
        let worker = tokio::spawn(async move { orchestrator.run(shutdown_rx).await });

        BackgroundSync {
            shutdown,
            worker,
            link: None,
        }
    }

    /// Like [`spawn_background`](Self::spawn_background), also following a
    /// platform connectivity signal.
    pub fn spawn_background_with_link(&self, link: watch::Receiver<bool>) -> BackgroundSync {
        let mut background = self.spawn_background();
        let ctx = Arc::clone(&self.ctx);
        background.link = Some(tokio::spawn(async move {
            ctx.monitor.follow_link(link).await;
        }));
        background
    }
}

/// Handle to a running background worker. Dropping it also stops the
/// worker, at its next wakeup.
pub struct BackgroundSync {
    shutdown: watch::Sender<bool>,
    worker: JoinHandle<()>,
    link: Option<JoinHandle<()>>,
}

impl BackgroundSync {
    pub fn is_running(&self) -> bool {
        !self.worker.is_finished()
    }

    /// Stops the worker and waits for an in-progress drain to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Some(link) = self.link {
            link.abort();
        }
        if let Err(e) = self.worker.await {
            tracing::error!(error = %e, "Sync worker panicked");
        }
    }
}
