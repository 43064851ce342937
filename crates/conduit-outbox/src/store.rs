//! `OutboxEntry` and the `OutboxStore` persistence contract.
//!
//! Grounded on `fc-outbox/src/repository.rs`'s `OutboxRepository` trait
//! shape (fetch-pending / mark-in-progress / mark-with-status) and
//! `fc-common`'s `OutboxItem`/`OutboxStatus` data shape, generalized to the
//! single-item-type, lease-based model of §4.I (no EVENT/DISPATCH_JOB split
//! — that distinction is transport-adapter policy, out of core scope).

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use conduit_common::{ConduitError, HeaderValue, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    InFlight,
    Published,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: String,
    pub message_type: String,
    pub payload: Vec<u8>,
    pub headers: HashMap<String, HeaderValue>,
    /// Best-effort per-aggregate ordering key. `None` means no ordering
    /// constraint beyond arrival order.
    pub group_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    /// Set when `status == InFlight`; identifies the publisher task that
    /// holds the lease. No other claimant may transition this entry while
    /// the lease has not expired.
    pub lease_owner: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl OutboxEntry {
    pub fn new(
        id: impl Into<String>,
        message_type: impl Into<String>,
        payload: Vec<u8>,
        headers: HashMap<String, HeaderValue>,
        group_key: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            message_type: message_type.into(),
            payload,
            headers,
            group_key,
            created_at: now,
            status: OutboxStatus::Pending,
            attempts: 0,
            next_attempt_at: now,
            last_error: None,
            lease_owner: None,
            lease_expires_at: None,
            version: 0,
        }
    }
}

/// Persistence contract for the publisher-side outbox. Implementations
/// must provide per-row optimistic concurrency: callers pass the version
/// they last observed and the store rejects stale writes with
/// `ConduitError::TransportError` carrying an "outbox_version_conflict"
/// tag, per §5's "external stores offer per-row `version`" assumption.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    async fn enqueue(&self, entry: OutboxEntry) -> Result<()>;

    /// Atomically claims up to `batch_size` `Pending` entries whose
    /// `next_attempt_at` has elapsed, transitioning them to `InFlight` with
    /// the given lease owner and expiry, and bumping `version`. Entries
    /// belonging to a group that already has an `InFlight` member are
    /// skipped, preserving per-group FIFO.
    async fn claim_batch(
        &self,
        batch_size: u32,
        lease_owner: &str,
        lease_duration: Duration,
    ) -> Result<Vec<OutboxEntry>>;

    async fn mark_published(&self, id: &str, expected_version: u64) -> Result<()>;

    /// Increments `attempts`, records `last_error`, and returns the entry
    /// to `Pending` with `next_attempt_at` set by the caller (the publisher
    /// worker computes the backoff).
    async fn mark_failed(
        &self,
        id: &str,
        expected_version: u64,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Finds `InFlight` entries whose lease has expired (crash recovery)
    /// and resets them to `Pending` so another worker can claim them.
    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<u64>;

    /// Deletes `Published` entries older than `cutoff`.
    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    async fn get(&self, id: &str) -> Result<Option<OutboxEntry>>;

    async fn init_schema(&self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn version_conflict(id: &str) -> ConduitError {
    ConduitError::TransportError(format!("outbox_version_conflict: entry {id} was mutated concurrently"))
}
