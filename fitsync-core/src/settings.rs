//! Tunables for one engine instance.

use std::time::Duration;

use crate::queue::QueueLimits;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Period of the background drain tick.
    pub interval: Duration,
    /// Bound on each remote call made while draining.
    pub request_timeout: Duration,
    /// Bound on the reachability probe.
    pub probe_timeout: Duration,
    pub max_queue_size: usize,
    pub max_retries: u32,
}

impl SyncSettings {
    pub fn queue_limits(&self) -> QueueLimits {
        QueueLimits {
            capacity: self.max_queue_size,
            max_retries: self.max_retries,
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            request_timeout: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(5),
            max_queue_size: 100,
            max_retries: 3,
        }
    }
}
