//! Retention cleanup worker for processed inbox rows, mirroring
//! `conduit-outbox`'s cleanup worker.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::InboxStore;

#[derive(Debug, Clone)]
pub struct InboxCleanupConfig {
    pub interval: Duration,
    pub retention: Duration,
}

impl Default for InboxCleanupConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

pub struct InboxCleanupWorker<S: InboxStore> {
    store: Arc<S>,
    config: InboxCleanupConfig,
}

impl<S: InboxStore + 'static> InboxCleanupWorker<S> {
    pub fn new(store: Arc<S>, config: InboxCleanupConfig) -> Self {
        Self { store, config }
    }

    pub async fn sweep(&self) -> conduit_common::Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.config.retention).unwrap_or_default();
        self.store.cleanup(cutoff).await
    }

    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.sweep().await {
                        Ok(n) if n > 0 => debug!(deleted = n, "swept processed inbox entries"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "inbox cleanup sweep failed"),
                    }
                }
            }
        }
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryInboxStore;
    use crate::store::BeginOutcome;

    #[tokio::test]
    async fn sweep_deletes_processed_rows_past_retention() {
        let store = Arc::new(InMemoryInboxStore::new());
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        let entry = match outcome {
            BeginOutcome::Started(e) => e,
            _ => unreachable!(),
        };
        store.mark_processed("consumer-a", "msg-1", entry.version).await.unwrap();

        let worker = InboxCleanupWorker::new(
            store.clone(),
            InboxCleanupConfig {
                interval: Duration::from_secs(60),
                retention: Duration::from_secs(0),
            },
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
        let deleted = worker.sweep().await.unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get("consumer-a", "msg-1").await.unwrap().is_none());
    }
}
