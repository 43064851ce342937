//! Bulkhead: concurrency + queue-depth isolation, ship-compartment style.
//!
//! Two semaphores model the two limits from §4.D: a concurrency semaphore
//! bounds active operations, a queue semaphore bounds operations waiting
//! for a concurrency slot. `tokio::sync::Semaphore` grants permits in FIFO
//! order, which gives the waiter-fairness the specification requires
//! without a hand-rolled queue.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

use conduit_common::ConduitError;

#[derive(Debug, Clone)]
pub struct BulkheadConfig {
    pub max_concurrent: u32,
    pub max_queued: u32,
    pub acquisition_timeout: Duration,
}

pub struct BulkheadMetrics {
    pub active: AtomicU32,
    pub queued: AtomicU32,
    pub rejected: AtomicU32,
    pub executed: AtomicU32,
}

impl Default for BulkheadMetrics {
    fn default() -> Self {
        Self {
            active: AtomicU32::new(0),
            queued: AtomicU32::new(0),
            rejected: AtomicU32::new(0),
            executed: AtomicU32::new(0),
        }
    }
}

pub struct Bulkhead {
    concurrency: Arc<Semaphore>,
    queue: Arc<Semaphore>,
    config: BulkheadConfig,
    metrics: BulkheadMetrics,
    disposed: std::sync::atomic::AtomicBool,
    dispose_signal: Notify,
}

/// Held for the lifetime of one admitted operation; dropping it releases
/// the concurrency slot for the next waiter.
pub struct BulkheadPermit<'a> {
    _permit: OwnedSemaphorePermit,
    bulkhead: &'a Bulkhead,
}

impl Drop for BulkheadPermit<'_> {
    fn drop(&mut self) {
        self.bulkhead.metrics.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Self {
        Self {
            concurrency: Arc::new(Semaphore::new(config.max_concurrent as usize)),
            queue: Arc::new(Semaphore::new(config.max_queued as usize)),
            config,
            metrics: BulkheadMetrics::default(),
            disposed: std::sync::atomic::AtomicBool::new(false),
            dispose_signal: Notify::new(),
        }
    }

    pub fn active(&self) -> u32 {
        self.metrics.active.load(Ordering::Acquire)
    }

    pub fn queued(&self) -> u32 {
        self.metrics.queued.load(Ordering::Acquire)
    }

    pub fn rejected(&self) -> u32 {
        self.metrics.rejected.load(Ordering::Acquire)
    }

    pub fn executed(&self) -> u32 {
        self.metrics.executed.load(Ordering::Acquire)
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.dispose_signal.notify_waiters();
    }

    /// Acquires a permit, queueing if every concurrency slot is taken, and
    /// rejecting if the queue is also full or disposal fires mid-wait.
    pub async fn acquire(&self) -> Result<BulkheadPermit<'_>, ConduitError> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(ConduitError::BulkheadRejected {
                active: self.active(),
                queued: self.queued(),
            });
        }

        if let Ok(permit) = self.concurrency.clone().try_acquire_owned() {
            self.metrics.active.fetch_add(1, Ordering::AcqRel);
            self.metrics.executed.fetch_add(1, Ordering::AcqRel);
            return Ok(BulkheadPermit {
                _permit: permit,
                bulkhead: self,
            });
        }

        let Ok(_queue_slot) = self.queue.clone().try_acquire_owned() else {
            self.metrics.rejected.fetch_add(1, Ordering::AcqRel);
            return Err(ConduitError::BulkheadRejected {
                active: self.active(),
                queued: self.queued(),
            });
        };
        self.metrics.queued.fetch_add(1, Ordering::AcqRel);

        let concurrency = self.concurrency.clone();
        let result = tokio::select! {
            permit = async { concurrency.acquire_owned().await } => {
                permit.map_err(|_| ConduitError::BulkheadRejected { active: self.active(), queued: self.queued() })
            }
            _ = tokio::time::sleep(self.config.acquisition_timeout) => {
                Err(ConduitError::BulkheadRejected { active: self.active(), queued: self.queued() })
            }
            _ = self.dispose_signal.notified() => {
                Err(ConduitError::BulkheadRejected { active: self.active(), queued: self.queued() })
            }
        };

        self.metrics.queued.fetch_sub(1, Ordering::AcqRel);
        drop(_queue_slot);

        match result {
            Ok(permit) => {
                self.metrics.active.fetch_add(1, Ordering::AcqRel);
                self.metrics.executed.fetch_add(1, Ordering::AcqRel);
                Ok(BulkheadPermit {
                    _permit: permit,
                    bulkhead: self,
                })
            }
            Err(err) => {
                self.metrics.rejected.fetch_add(1, Ordering::AcqRel);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(max_concurrent: u32, max_queued: u32, timeout_ms: u64) -> BulkheadConfig {
        BulkheadConfig {
            max_concurrent,
            max_queued,
            acquisition_timeout: Duration::from_millis(timeout_ms),
        }
    }

    #[tokio::test]
    async fn rejects_when_full_with_no_queue() {
        let bulkhead = Bulkhead::new(config(1, 0, 100));
        let permit = bulkhead.acquire().await.unwrap();
        assert_eq!(bulkhead.active(), 1);

        let err = bulkhead.acquire().await.unwrap_err();
        match err {
            ConduitError::BulkheadRejected { active, queued } => {
                assert_eq!(active, 1);
                assert_eq!(queued, 0);
            }
            _ => panic!("expected BulkheadRejected"),
        }
        drop(permit);
    }

    #[tokio::test]
    async fn exactly_c_plus_q_admitted_next_rejected() {
        let bulkhead = Arc::new(Bulkhead::new(config(2, 1, 2_000)));
        let p1 = bulkhead.acquire().await.unwrap();
        let p2 = bulkhead.acquire().await.unwrap();

        let b = bulkhead.clone();
        let queued_waiter = tokio::spawn(async move { b.acquire().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(bulkhead.queued(), 1);

        let rejected = bulkhead.acquire().await;
        assert!(matches!(rejected, Err(ConduitError::BulkheadRejected { .. })));

        drop(p1);
        let p3 = queued_waiter.await.unwrap().unwrap();
        drop(p2);
        drop(p3);
    }

    #[tokio::test]
    async fn queued_waiter_times_out() {
        let bulkhead = Bulkhead::new(config(1, 1, 30));
        let _permit = bulkhead.acquire().await.unwrap();
        let result = bulkhead.acquire().await;
        assert!(matches!(result, Err(ConduitError::BulkheadRejected { .. })));
    }
}
