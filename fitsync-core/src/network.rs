//! Reachability of the remote store.
//!
//! Reachable means the platform link is up *and* the remote answered a
//! probe. Every false-to-true flip is broadcast as a [`Reconnected`] event;
//! true-to-false flips need no action and are only logged.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};

use crate::error::RemoteError;
use crate::remote::RemoteStore;

/// Emitted when reachability flips from false to true.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconnected;

pub struct NetworkMonitor {
    remote: Arc<dyn RemoteStore>,
    probe_timeout: Duration,
    link_up: AtomicBool,
    reachable: watch::Sender<bool>,
    reconnected: broadcast::Sender<Reconnected>,
}

impl NetworkMonitor {
    /// Starts out unreachable until the first [`refresh`](Self::refresh).
    pub fn new(remote: Arc<dyn RemoteStore>, probe_timeout: Duration) -> Self {
        let (reachable, _) = watch::channel(false);
        let (reconnected, _) = broadcast::channel(16);
        Self {
            remote,
            probe_timeout,
            link_up: AtomicBool::new(true),
            reachable,
            reconnected,
        }
    }

    pub fn is_reachable(&self) -> bool {
        *self.reachable.borrow()
    }

    /// Edge-triggered reconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<Reconnected> {
        self.reconnected.subscribe()
    }

    /// Level-triggered reachability, for status indicators.
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.reachable.subscribe()
    }

    fn set_reachable(&self, reachable: bool, reason: &str) {
        let flipped = self.reachable.send_if_modified(|current| {
            if *current == reachable {
                false
            } else {
                *current = reachable;
                true
            }
        });

        if !flipped {
            return;
        }
        if reachable {
            tracing::info!("Remote store reachable");
            // No receivers just means no orchestrator is running.
            let _ = self.reconnected.send(Reconnected);
        } else {
            tracing::info!(reason, "Remote store unreachable");
        }
    }

    /// Re-evaluates reachability: link state first, then a bounded probe.
    pub async fn refresh(&self) -> bool {
        if !self.link_up.load(Ordering::SeqCst) {
            self.set_reachable(false, "link down");
            return false;
        }

        match tokio::time::timeout(self.probe_timeout, self.remote.probe()).await {
            Ok(Ok(())) => {
                self.set_reachable(true, "probe succeeded");
                true
            }
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "Reachability probe failed");
                self.set_reachable(false, "probe failed");
                false
            }
            Err(_) => {
                tracing::debug!(timeout = ?self.probe_timeout, "Reachability probe timed out");
                self.set_reachable(false, "probe timed out");
                false
            }
        }
    }

    /// Records the platform connectivity signal. Going down is immediate;
    /// coming up still needs a probe before the remote counts as reachable.
    pub async fn set_link_state(&self, connected: bool) -> bool {
        self.link_up.store(connected, Ordering::SeqCst);
        if connected {
            self.refresh().await
        } else {
            self.set_reachable(false, "link down");
            false
        }
    }

    /// Marks the remote unreachable after a transient failure. Other errors
    /// say nothing about connectivity and are ignored.
    pub fn report_failure(&self, error: &RemoteError) {
        if error.is_transient() {
            self.set_reachable(false, "remote call failed");
        }
    }

    /// Follows a platform connectivity signal until its sender is dropped.
    pub async fn follow_link(&self, mut link: watch::Receiver<bool>) {
        let initial = *link.borrow_and_update();
        self.set_link_state(initial).await;

        while link.changed().await.is_ok() {
            let connected = *link.borrow_and_update();
            tracing::debug!(connected, "Link state changed");
            self.set_link_state(connected).await;
        }
    }
}
