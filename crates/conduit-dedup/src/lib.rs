//! Deduplicator: a sliding-window fingerprint cache with a hard-capped size.
//!
//! Grounded on `fc-router/src/pool.rs`'s `DashMap`-backed concurrent cache
//! idiom. `TryAdd` is implemented with `DashMap::entry` so the
//! check-then-insert is atomic under concurrent callers — no separate lock
//! is needed around the read-then-write.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tracing::debug;

use conduit_common::Envelope;

/// Which fingerprint a message is deduplicated on.
#[derive(Clone)]
pub enum DedupStrategy {
    /// Stable hash of the payload bytes.
    ContentHash,
    /// The envelope's `message_id`.
    MessageId,
    /// Caller-supplied extraction function.
    Custom(Arc<dyn Fn(&Envelope) -> String + Send + Sync>),
}

impl std::fmt::Debug for DedupStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DedupStrategy::ContentHash => write!(f, "ContentHash"),
            DedupStrategy::MessageId => write!(f, "MessageId"),
            DedupStrategy::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub window: Duration,
    pub max_cache_size: usize,
    pub strategy: DedupStrategy,
}

impl DedupConfig {
    /// Validates the `1 min <= window <= 24 h` and `1 <= max_cache_size <=
    /// 1_000_000` bounds from §4.G. Construction does not enforce these —
    /// callers (the builder) are expected to call this once at composition
    /// time.
    pub fn validate(&self) -> Result<(), String> {
        if self.window < Duration::from_secs(60) {
            return Err("dedup window must be at least 1 minute".into());
        }
        if self.window > Duration::from_secs(24 * 3600) {
            return Err("dedup window must be at most 24 hours".into());
        }
        if self.max_cache_size == 0 || self.max_cache_size > 1_000_000 {
            return Err("dedup max_cache_size must be between 1 and 1,000,000".into());
        }
        Ok(())
    }
}

fn content_hash(payload: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload);
    hex::encode(hasher.finalize())
}

/// Computes the fingerprint for an envelope under the configured strategy.
pub fn fingerprint_of(strategy: &DedupStrategy, envelope: &Envelope) -> String {
    match strategy {
        DedupStrategy::ContentHash => content_hash(&envelope.payload),
        DedupStrategy::MessageId => envelope.message_id.clone(),
        DedupStrategy::Custom(f) => f(envelope),
    }
}

/// Sliding-window fingerprint cache. Entries older than `window` are
/// treated as expired (and therefore not duplicates) even if they have not
/// yet been swept; `sweep` performs the actual removal so the cache does
/// not grow purely on expired entries between sweeps.
pub struct Deduplicator {
    config: DedupConfig,
    entries: DashMap<String, i64>,
    insertion_order: Mutex<VecDeque<String>>,
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

impl Deduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            insertion_order: Mutex::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Atomically checks-and-inserts a fingerprint. Returns `(is_duplicate,
    /// first_seen_at_millis)`. A fingerprint whose prior sighting has aged
    /// out of the window is treated as fresh, not a duplicate.
    pub fn try_add(&self, fingerprint: &str, now: i64) -> (bool, i64) {
        let window_millis = self.config.window.as_millis() as i64;
        let mut is_duplicate = false;
        let mut first_seen = now;

        self.entries
            .entry(fingerprint.to_string())
            .and_modify(|seen_at| {
                if now - *seen_at < window_millis {
                    is_duplicate = true;
                    first_seen = *seen_at;
                } else {
                    *seen_at = now;
                }
            })
            .or_insert(now);

        if !is_duplicate {
            self.insertion_order.lock().unwrap().push_back(fingerprint.to_string());
            self.evict_over_capacity();
        }

        (is_duplicate, first_seen)
    }

    /// Convenience wrapper that computes the fingerprint from the envelope
    /// under the configured strategy and calls `try_add` with the wall
    /// clock.
    pub fn check_envelope(&self, envelope: &Envelope) -> (bool, i64) {
        let fingerprint = fingerprint_of(&self.config.strategy, envelope);
        self.try_add(&fingerprint, now_millis())
    }

    fn evict_over_capacity(&self) {
        let mut order = self.insertion_order.lock().unwrap();
        while self.entries.len() > self.config.max_cache_size {
            let Some(oldest) = order.pop_front() else { break };
            self.entries.remove(&oldest);
        }
    }

    /// Removes entries older than the configured window. Intended to be
    /// driven by a periodic sweeper task; also safe to call inline.
    pub fn sweep(&self) {
        self.sweep_at(now_millis());
    }

    fn sweep_at(&self, now: i64) {
        let window_millis = self.config.window.as_millis() as i64;
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|e| now - *e.value() >= window_millis)
            .map(|e| e.key().clone())
            .collect();
        let removed = expired.len();
        for key in expired {
            self.entries.remove(&key);
        }
        if removed > 0 {
            debug!(removed, "dedup sweep removed expired fingerprints");
        }
    }

    /// Spawns a background sweeper at half the window's duration (bounded
    /// to at least one second), so expired entries don't linger past their
    /// window for long stretches between accesses.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let dedup = self.clone();
        let interval = (self.config.window / 2).max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                dedup.sweep();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(window_secs: u64, max_cache_size: usize) -> DedupConfig {
        DedupConfig {
            window: Duration::from_secs(window_secs),
            max_cache_size,
            strategy: DedupStrategy::ContentHash,
        }
    }

    #[test]
    fn duplicate_within_window_is_flagged() {
        let dedup = Deduplicator::new(config(300, 1000));
        let (dup1, _) = dedup.try_add("fp-1", 1_000);
        assert!(!dup1);
        let (dup2, first_seen) = dedup.try_add("fp-1", 1_500);
        assert!(dup2);
        assert_eq!(first_seen, 1_000);
    }

    #[test]
    fn same_fingerprint_after_window_counts_as_fresh() {
        let dedup = Deduplicator::new(config(1, 1000));
        let (dup1, _) = dedup.try_add("fp-1", 0);
        assert!(!dup1);
        let (dup2, _) = dedup.try_add("fp-1", 2_000);
        assert!(!dup2);
    }

    #[test]
    fn fifo_eviction_at_capacity() {
        let dedup = Deduplicator::new(config(300, 2));
        dedup.try_add("a", 0);
        dedup.try_add("b", 1);
        dedup.try_add("c", 2);
        assert_eq!(dedup.len(), 2);
        let (dup_a, _) = dedup.try_add("a", 3);
        assert!(!dup_a, "a should have been evicted to make room for c");
    }

    #[test]
    fn sweep_removes_expired_entries() {
        let dedup = Deduplicator::new(config(1, 1000));
        dedup.try_add("fp-1", 0);
        assert_eq!(dedup.len(), 1);
        dedup.sweep_at(2_000);
        assert_eq!(dedup.len(), 0);
    }

    #[test]
    fn config_validation_bounds() {
        assert!(config(59, 10).validate().is_err());
        assert!(config(60, 10).validate().is_ok());
        assert!(config(24 * 3600, 10).validate().is_ok());
        assert!(config(24 * 3600 + 1, 10).validate().is_err());
        assert!(config(300, 0).validate().is_err());
        assert!(config(300, 1_000_001).validate().is_err());
    }
}
