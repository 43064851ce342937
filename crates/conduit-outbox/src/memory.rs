//! In-memory `OutboxStore`, for tests and single-process deployments where
//! durability across restarts is not required.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use conduit_common::Result;

use crate::store::{version_conflict, OutboxEntry, OutboxStatus, OutboxStore};

#[derive(Default)]
pub struct InMemoryOutboxStore {
    entries: DashMap<String, OutboxEntry>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn enqueue(&self, entry: OutboxEntry) -> Result<()> {
        self.entries.insert(entry.id.clone(), entry);
        Ok(())
    }

    async fn claim_batch(
        &self,
        batch_size: u32,
        lease_owner: &str,
        lease_duration: Duration,
    ) -> Result<Vec<OutboxEntry>> {
        let now = Utc::now();
        let mut candidates: Vec<OutboxEntry> = self
            .entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Pending && e.next_attempt_at <= now)
            .map(|e| e.value().clone())
            .collect();
        candidates.sort_by_key(|e| e.created_at);

        let mut claimed = Vec::new();
        let mut groups_taken: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if claimed.len() >= batch_size as usize {
                break;
            }
            if let Some(group) = &candidate.group_key {
                if groups_taken.contains(group) {
                    continue;
                }
            }

            let mut slot = match self.entries.get_mut(&candidate.id) {
                Some(slot) => slot,
                None => continue,
            };
            if slot.status != OutboxStatus::Pending || slot.version != candidate.version {
                continue;
            }
            slot.status = OutboxStatus::InFlight;
            slot.lease_owner = Some(lease_owner.to_string());
            slot.lease_expires_at = Some(now + chrono::Duration::from_std(lease_duration).unwrap_or_default());
            slot.version += 1;

            if let Some(group) = &slot.group_key {
                groups_taken.insert(group.clone());
            }
            claimed.push(slot.clone());
        }

        Ok(claimed)
    }

    async fn mark_published(&self, id: &str, expected_version: u64) -> Result<()> {
        let mut entry = self.entries.get_mut(id).ok_or_else(|| version_conflict(id))?;
        if entry.version != expected_version {
            return Err(version_conflict(id));
        }
        entry.status = OutboxStatus::Published;
        entry.lease_owner = None;
        entry.lease_expires_at = None;
        entry.version += 1;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &str,
        expected_version: u64,
        error: String,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut entry = self.entries.get_mut(id).ok_or_else(|| version_conflict(id))?;
        if entry.version != expected_version {
            return Err(version_conflict(id));
        }
        entry.attempts += 1;
        entry.last_error = Some(error);
        entry.next_attempt_at = next_attempt_at;
        entry.status = OutboxStatus::Pending;
        entry.lease_owner = None;
        entry.lease_expires_at = None;
        entry.version += 1;
        Ok(())
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut reclaimed = 0u64;
        for mut entry in self.entries.iter_mut() {
            if entry.status == OutboxStatus::InFlight {
                if let Some(expires_at) = entry.lease_expires_at {
                    if expires_at <= now {
                        entry.status = OutboxStatus::Pending;
                        entry.lease_owner = None;
                        entry.lease_expires_at = None;
                        entry.version += 1;
                        reclaimed += 1;
                    }
                }
            }
        }
        Ok(reclaimed)
    }

    async fn delete_published_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let to_delete: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.status == OutboxStatus::Published && e.created_at < cutoff)
            .map(|e| e.key().clone())
            .collect();
        let count = to_delete.len() as u64;
        for id in to_delete {
            self.entries.remove(&id);
        }
        Ok(count)
    }

    async fn get(&self, id: &str) -> Result<Option<OutboxEntry>> {
        Ok(self.entries.get(id).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn entry(id: &str, group: Option<&str>) -> OutboxEntry {
        OutboxEntry::new(id, "Order", b"payload".to_vec(), HashMap::new(), group.map(String::from))
    }

    #[tokio::test]
    async fn claim_then_publish_round_trip() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(entry("1", None)).await.unwrap();

        let claimed = store.claim_batch(10, "worker-a", Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].status, OutboxStatus::InFlight);

        store.mark_published("1", claimed[0].version).await.unwrap();
        let published = store.get("1").await.unwrap().unwrap();
        assert_eq!(published.status, OutboxStatus::Published);
    }

    #[tokio::test]
    async fn in_flight_entry_is_not_claimed_twice() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(entry("1", None)).await.unwrap();
        let first = store.claim_batch(10, "worker-a", Duration::from_secs(30)).await.unwrap();
        assert_eq!(first.len(), 1);
        let second = store.claim_batch(10, "worker-b", Duration::from_secs(30)).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn same_group_entries_claim_one_at_a_time() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(entry("1", Some("agg-1"))).await.unwrap();
        store.enqueue(entry("2", Some("agg-1"))).await.unwrap();

        let claimed = store.claim_batch(10, "worker-a", Duration::from_secs(30)).await.unwrap();
        assert_eq!(claimed.len(), 1, "only one member of the group should be in flight at once");
    }

    #[tokio::test]
    async fn expired_lease_is_reclaimed() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(entry("1", None)).await.unwrap();
        store.claim_batch(10, "worker-a", Duration::from_millis(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        let reclaimed = store.reclaim_expired_leases(Utc::now()).await.unwrap();
        assert_eq!(reclaimed, 1);
        let entry = store.get("1").await.unwrap().unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
    }

    #[tokio::test]
    async fn stale_version_is_rejected() {
        let store = InMemoryOutboxStore::new();
        store.enqueue(entry("1", None)).await.unwrap();
        let claimed = store.claim_batch(10, "worker-a", Duration::from_secs(30)).await.unwrap();
        let stale_version = claimed[0].version.saturating_sub(1);
        assert!(store.mark_published("1", stale_version).await.is_err());
    }
}
