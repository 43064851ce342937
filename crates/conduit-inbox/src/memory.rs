//! In-memory `InboxStore`, for tests and single-process deployments.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use conduit_common::Result;

use crate::store::{new_entry, version_conflict, BeginOutcome, InboxEntry, InboxStatus, InboxStore};

#[derive(Default)]
pub struct InMemoryInboxStore {
    entries: DashMap<(String, String), InboxEntry>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn try_begin(
        &self,
        consumer_name: &str,
        message_id: &str,
        lease_duration: Duration,
    ) -> Result<BeginOutcome> {
        let key = (consumer_name.to_string(), message_id.to_string());
        let now = Utc::now();

        match self.entries.get_mut(&key) {
            None => {
                let entry = new_entry(consumer_name, message_id);
                self.entries.insert(key, entry.clone());
                Ok(BeginOutcome::Started(entry))
            }
            Some(mut slot) => match slot.status {
                InboxStatus::Processed => Ok(BeginOutcome::AlreadyProcessed),
                InboxStatus::Processing => {
                    let lease_elapsed = now - slot.processing_started_at
                        >= chrono::Duration::from_std(lease_duration).unwrap_or_default();
                    if lease_elapsed {
                        slot.processing_started_at = now;
                        slot.attempts += 1;
                        slot.version += 1;
                        Ok(BeginOutcome::Started(slot.clone()))
                    } else {
                        Ok(BeginOutcome::InFlight)
                    }
                }
                InboxStatus::Failed => {
                    slot.status = InboxStatus::Processing;
                    slot.processing_started_at = now;
                    slot.attempts += 1;
                    slot.version += 1;
                    Ok(BeginOutcome::Started(slot.clone()))
                }
            },
        }
    }

    async fn mark_processed(&self, consumer_name: &str, message_id: &str, expected_version: u64) -> Result<()> {
        let key = (consumer_name.to_string(), message_id.to_string());
        let mut entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| version_conflict(consumer_name, message_id))?;
        if entry.version != expected_version {
            return Err(version_conflict(consumer_name, message_id));
        }
        entry.status = InboxStatus::Processed;
        entry.processed_at = Some(Utc::now());
        entry.version += 1;
        Ok(())
    }

    async fn mark_failed(
        &self,
        consumer_name: &str,
        message_id: &str,
        expected_version: u64,
        error: String,
    ) -> Result<()> {
        let key = (consumer_name.to_string(), message_id.to_string());
        let mut entry = self
            .entries
            .get_mut(&key)
            .ok_or_else(|| version_conflict(consumer_name, message_id))?;
        if entry.version != expected_version {
            return Err(version_conflict(consumer_name, message_id));
        }
        entry.status = InboxStatus::Failed;
        entry.last_error = Some(error);
        entry.version += 1;
        Ok(())
    }

    async fn cleanup(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let to_delete: Vec<(String, String)> = self
            .entries
            .iter()
            .filter(|e| e.status == InboxStatus::Processed && e.processed_at.map(|t| t < cutoff).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect();
        let count = to_delete.len() as u64;
        for key in to_delete {
            self.entries.remove(&key);
        }
        Ok(count)
    }

    async fn get(&self, consumer_name: &str, message_id: &str) -> Result<Option<InboxEntry>> {
        let key = (consumer_name.to_string(), message_id.to_string());
        Ok(self.entries.get(&key).map(|e| e.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_delivery_starts_processing() {
        let store = InMemoryInboxStore::new();
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(_)));
    }

    #[tokio::test]
    async fn redelivery_while_in_flight_is_rejected() {
        let store = InMemoryInboxStore::new();
        store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::InFlight));
    }

    #[tokio::test]
    async fn redelivery_after_processed_is_skipped() {
        let store = InMemoryInboxStore::new();
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        let entry = match outcome {
            BeginOutcome::Started(e) => e,
            _ => unreachable!(),
        };
        store.mark_processed("consumer-a", "msg-1", entry.version).await.unwrap();

        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::AlreadyProcessed));
    }

    #[tokio::test]
    async fn expired_processing_lease_is_reclaimed() {
        let store = InMemoryInboxStore::new();
        store.try_begin("consumer-a", "msg-1", Duration::from_millis(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_millis(1)).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(_)));
    }

    #[tokio::test]
    async fn different_consumers_track_same_message_id_independently() {
        let store = InMemoryInboxStore::new();
        let a = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        let b = store.try_begin("consumer-b", "msg-1", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(a, BeginOutcome::Started(_)));
        assert!(matches!(b, BeginOutcome::Started(_)));
    }

    #[tokio::test]
    async fn failed_entry_can_be_retried() {
        let store = InMemoryInboxStore::new();
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        let entry = match outcome {
            BeginOutcome::Started(e) => e,
            _ => unreachable!(),
        };
        store
            .mark_failed("consumer-a", "msg-1", entry.version, "boom".into())
            .await
            .unwrap();
        let outcome = store.try_begin("consumer-a", "msg-1", Duration::from_secs(30)).await.unwrap();
        assert!(matches!(outcome, BeginOutcome::Started(_)));
    }
}
