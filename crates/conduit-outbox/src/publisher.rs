//! Outbox publisher worker: a poll loop that claims due entries and hands
//! them to a sender, retrying with backoff on failure.
//!
//! Grounded on `fc-outbox/src/lib.rs`'s `OutboxProcessor::start()`/
//! `process_batch()` shape — a `tokio::time::sleep`-driven poll loop guarded
//! by a leader-election flag. The leader-election gate itself is dropped
//! here (single-process and multi-process HA are both out of core scope per
//! §4.I's Non-goals); what remains is the claim-dispatch-ack cycle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use conduit_common::{Envelope, HeaderValue, PublishOptions, Result, HEADER_ATTEMPTS};

use crate::store::{OutboxEntry, OutboxStore};

/// The publish half of a transport adapter, as seen by the outbox worker. A
/// thin seam so this crate does not need a direct dependency on
/// `conduit-transport`.
#[async_trait]
pub trait OutboxSender: Send + Sync {
    async fn send(&self, envelope: Envelope, options: PublishOptions, cancel: CancellationToken) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct OutboxPublisherConfig {
    pub poll_interval: Duration,
    pub batch_size: u32,
    pub lease_duration: Duration,
    pub worker_id: String,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for OutboxPublisherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            batch_size: 50,
            lease_duration: Duration::from_secs(30),
            worker_id: uuid::Uuid::new_v4().to_string(),
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(60),
        }
    }
}

fn backoff_for(config: &OutboxPublisherConfig, attempts: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempts.min(16));
    config
        .initial_backoff
        .saturating_mul(factor)
        .min(config.max_backoff)
}

fn to_envelope(entry: &OutboxEntry) -> Envelope {
    let mut envelope = Envelope::new(&entry.message_type, entry.payload.clone());
    for (key, value) in &entry.headers {
        envelope = envelope.with_header(key, value.clone());
    }
    envelope = envelope.with_header(HEADER_ATTEMPTS, HeaderValue::Int(entry.attempts as i64));
    envelope
}

pub struct OutboxPublisherWorker<S: OutboxStore, T: OutboxSender> {
    store: Arc<S>,
    sender: Arc<T>,
    config: OutboxPublisherConfig,
    running: AtomicBool,
}

impl<S: OutboxStore + 'static, T: OutboxSender + 'static> OutboxPublisherWorker<S, T> {
    pub fn new(store: Arc<S>, sender: Arc<T>, config: OutboxPublisherConfig) -> Self {
        Self {
            store,
            sender,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Claims and publishes a single batch. Returns the number of entries
    /// that were handed to the sender, success or failure.
    pub async fn process_batch(&self) -> Result<usize> {
        let claimed = self
            .store
            .claim_batch(self.config.batch_size, &self.config.worker_id, self.config.lease_duration)
            .await?;
        let n = claimed.len();
        for entry in claimed {
            self.dispatch_one(entry).await;
        }
        Ok(n)
    }

    async fn dispatch_one(&self, entry: OutboxEntry) {
        let envelope = to_envelope(&entry);
        let cancel = CancellationToken::new();
        match self.sender.send(envelope, PublishOptions::default(), cancel).await {
            Ok(()) => {
                if let Err(err) = self.store.mark_published(&entry.id, entry.version).await {
                    warn!(id = %entry.id, error = %err, "failed to mark outbox entry published");
                }
            }
            Err(err) => {
                let attempts = entry.attempts + 1;
                if attempts >= self.config.max_attempts {
                    error!(id = %entry.id, attempts, "outbox entry exceeded max attempts, leaving in Pending for manual review");
                }
                let next_attempt_at = Utc::now()
                    + chrono::Duration::from_std(backoff_for(&self.config, entry.attempts)).unwrap_or_default();
                if let Err(mark_err) = self
                    .store
                    .mark_failed(&entry.id, entry.version, err.to_string(), next_attempt_at)
                    .await
                {
                    warn!(id = %entry.id, error = %mark_err, "failed to record outbox send failure");
                }
            }
        }
    }

    /// Runs the poll loop until `cancel` fires. Also periodically reclaims
    /// expired leases so a crashed worker's in-flight entries become
    /// claimable again.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        self.running.store(true, Ordering::Release);
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = self.store.reclaim_expired_leases(Utc::now()).await {
                        warn!(error = %err, "failed to reclaim expired outbox leases");
                    }
                    match self.process_batch().await {
                        Ok(n) if n > 0 => debug!(claimed = n, "outbox batch published"),
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "outbox claim_batch failed"),
                    }
                }
            }
        }
        self.running.store(false, Ordering::Release);
    }

    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(cancel))
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryOutboxStore;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicU32;

    struct RecordingSender {
        sent: AtomicU32,
        fail_first_n: u32,
    }

    #[async_trait]
    impl OutboxSender for RecordingSender {
        async fn send(&self, _envelope: Envelope, _options: PublishOptions, _cancel: CancellationToken) -> Result<()> {
            let count = self.sent.fetch_add(1, Ordering::SeqCst);
            if count < self.fail_first_n {
                return Err(conduit_common::ConduitError::TransportError("simulated failure".into()));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn successful_send_marks_published() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store
            .enqueue(OutboxEntry::new("1", "Order", b"p".to_vec(), HashMap::new(), None))
            .await
            .unwrap();
        let sender = Arc::new(RecordingSender {
            sent: AtomicU32::new(0),
            fail_first_n: 0,
        });
        let worker = OutboxPublisherWorker::new(store.clone(), sender, OutboxPublisherConfig::default());

        let n = worker.process_batch().await.unwrap();
        assert_eq!(n, 1);
        let entry = store.get("1").await.unwrap().unwrap();
        assert_eq!(entry.status, crate::store::OutboxStatus::Published);
    }

    #[tokio::test]
    async fn failed_send_returns_entry_to_pending_with_backoff() {
        let store = Arc::new(InMemoryOutboxStore::new());
        store
            .enqueue(OutboxEntry::new("1", "Order", b"p".to_vec(), HashMap::new(), None))
            .await
            .unwrap();
        let sender = Arc::new(RecordingSender {
            sent: AtomicU32::new(0),
            fail_first_n: 1,
        });
        let worker = OutboxPublisherWorker::new(store.clone(), sender, OutboxPublisherConfig::default());

        worker.process_batch().await.unwrap();
        let entry = store.get("1").await.unwrap().unwrap();
        assert_eq!(entry.status, crate::store::OutboxStatus::Pending);
        assert_eq!(entry.attempts, 1);
        assert!(entry.next_attempt_at > Utc::now());
    }
}
