//! `InboxEntry` and the `InboxStore` idempotency contract.
//!
//! Grounded on the same `fc-outbox/src/repository.rs` claim/ack shape as
//! `conduit-outbox`, generalized to the consumer-side primary key of
//! `(consumer_name, message_id)` per §4.J, plus `fc-stream/src/checkpoint.rs`'s
//! `CheckpointStore` trait for the "has this key already been seen" idiom.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use async_trait::async_trait;
use conduit_common::{ConduitError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboxStatus {
    Processing,
    Processed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    pub consumer_name: String,
    pub message_id: String,
    pub status: InboxStatus,
    pub processing_started_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub version: u64,
}

impl InboxEntry {
    fn new(consumer_name: impl Into<String>, message_id: impl Into<String>) -> Self {
        Self {
            consumer_name: consumer_name.into(),
            message_id: message_id.into(),
            status: InboxStatus::Processing,
            processing_started_at: Utc::now(),
            processed_at: None,
            attempts: 1,
            last_error: None,
            version: 0,
        }
    }
}

/// Outcome of attempting to begin processing a message.
#[derive(Debug, Clone)]
pub enum BeginOutcome {
    /// No prior record, or the prior `Processing` lease expired: the caller
    /// owns this delivery and should invoke the user handler.
    Started(InboxEntry),
    /// Already processed successfully: the caller should ack and skip the
    /// handler (idempotent redelivery).
    AlreadyProcessed,
    /// Another worker currently holds an unexpired processing lease: the
    /// caller should leave the message unacked for standard broker retry.
    InFlight,
}

/// Persistence contract for consumer-side idempotency. The primary key is
/// `(consumer_name, message_id)` — the same message id processed by two
/// different named consumers is tracked independently, per §4.J.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Atomically records the start of processing. If no row exists, or the
    /// existing `Processing` row's lease has elapsed, creates/claims it and
    /// returns `Started`. If already `Processed`, returns `AlreadyProcessed`
    /// without mutating. If `Processing` with a live lease, returns `InFlight`.
    async fn try_begin(
        &self,
        consumer_name: &str,
        message_id: &str,
        lease_duration: Duration,
    ) -> Result<BeginOutcome>;

    async fn mark_processed(&self, consumer_name: &str, message_id: &str, expected_version: u64) -> Result<()>;

    async fn mark_failed(
        &self,
        consumer_name: &str,
        message_id: &str,
        expected_version: u64,
        error: String,
    ) -> Result<()>;

    /// Deletes `Processed` rows older than `cutoff`.
    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, consumer_name: &str, message_id: &str) -> Result<Option<InboxEntry>>;

    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn new_entry(consumer_name: &str, message_id: &str) -> InboxEntry {
    InboxEntry::new(consumer_name, message_id)
}

pub(crate) fn version_conflict(consumer_name: &str, message_id: &str) -> ConduitError {
    ConduitError::TransportError(format!(
        "inbox_version_conflict: ({consumer_name}, {message_id}) was mutated concurrently"
    ))
}
