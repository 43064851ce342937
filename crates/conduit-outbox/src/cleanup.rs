//! Retention cleanup worker: purges `Published` entries past a configured
//! age on an interval timer.
//!
//! Grounded on `fc-router/src/warning.rs`'s `cleanup()` pattern — a
//! `tokio::time::interval` loop owned by a small struct, stoppable via
//! `tokio::select!` against a cancellation signal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::OutboxStore;

#[derive(Debug, Clone)]
pub struct OutboxCleanupConfig {
    pub interval: Duration,
    pub retention: Duration,
}

impl Default for OutboxCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

pub struct OutboxCleanupWorker<S: OutboxStore> {
    store: Arc<S>,
    config: OutboxCleanupConfig,
}

impl<S: OutboxStore + 'static> OutboxCleanupWorker<S> {
    pub fn new(store: Arc<S>, config: OutboxCleanupConfig) -> Self {
        Self { store, config }
    }

    pub async fn sweep(&self) -> conduit_common::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.retention).unwrap_or_default();
        self.store.delete_published_before(cutoff).await
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(n) if n > 0 => debug!(deleted = n, "swept published outbox entries"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "outbox cleanup sweep failed"),
                    }
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}
