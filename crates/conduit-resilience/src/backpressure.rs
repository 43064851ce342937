//! Backpressure monitor: samples latency and queue depth, raises a
//! throttling signal with hysteresis so it doesn't flap at the boundary.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackpressureConfig {
    pub latency_threshold: Duration,
    pub recovery_latency_threshold: Duration,
    pub queue_depth_threshold: u64,
    pub recovery_queue_depth_threshold: u64,
    pub sample_interval: Duration,
}

impl BackpressureConfig {
    /// Panics (at construction, not at runtime) if recovery thresholds are
    /// not strictly below activation thresholds, per §4.F's invariant.
    pub fn validate(&self) -> Result<(), String> {
        if self.recovery_latency_threshold >= self.latency_threshold {
            return Err("recovery_latency_threshold must be < latency_threshold".into());
        }
        if self.recovery_queue_depth_threshold >= self.queue_depth_threshold {
            return Err("recovery_queue_depth_threshold must be < queue_depth_threshold".into());
        }
        Ok(())
    }
}

pub trait BackpressureEventSink: Send + Sync {
    fn on_activated(&self);
    fn on_deactivated(&self);
}

pub struct NoopBackpressureEventSink;

impl BackpressureEventSink for NoopBackpressureEventSink {
    fn on_activated(&self) {}
    fn on_deactivated(&self) {}
}

/// Shared, cheaply-cloned sampling state. `record_sample` is called by
/// callers observing real latency/depth; a background task calls `tick`
/// at `sample_interval` to evaluate thresholds.
pub struct BackpressureMonitor {
    config: BackpressureConfig,
    latest_latency_ms: AtomicU64,
    latest_queue_depth: AtomicU64,
    throttling: AtomicBool,
    /// Consecutive `tick()` calls in a row that found both metrics under
    /// their recovery threshold. Deactivation requires this to span a full
    /// observation interval (two consecutive ticks), not a single sample,
    /// so one transient dip doesn't flip `IsThrottling` off.
    recovered_streak: AtomicU64,
    sink: Arc<dyn BackpressureEventSink>,
}

impl BackpressureMonitor {
    pub fn new(config: BackpressureConfig) -> Self {
        Self::with_sink(config, Arc::new(NoopBackpressureEventSink))
    }

    pub fn with_sink(config: BackpressureConfig, sink: Arc<dyn BackpressureEventSink>) -> Self {
        Self {
            config,
            latest_latency_ms: AtomicU64::new(0),
            latest_queue_depth: AtomicU64::new(0),
            throttling: AtomicBool::new(false),
            recovered_streak: AtomicU64::new(0),
            sink,
        }
    }

    pub fn record_sample(&self, latency: Duration, queue_depth: u64) {
        self.latest_latency_ms.store(latency.as_millis() as u64, Ordering::Release);
        self.latest_queue_depth.store(queue_depth, Ordering::Release);
    }

    pub fn is_throttling(&self) -> bool {
        self.throttling.load(Ordering::Acquire)
    }

    /// Evaluates the current sample against the configured thresholds,
    /// flipping `IsThrottling` when the hysteresis conditions are met.
    /// Deactivation additionally requires both metrics to have stayed under
    /// their recovery threshold for a full observation interval — two
    /// consecutive ticks, not a single transient dip — to avoid flapping.
    /// Returns the new state.
    pub fn tick(&self) -> bool {
        let latency_ms = self.latest_latency_ms.load(Ordering::Acquire);
        let queue_depth = self.latest_queue_depth.load(Ordering::Acquire);
        let currently_throttling = self.throttling.load(Ordering::Acquire);

        let over_activation = Duration::from_millis(latency_ms) > self.config.latency_threshold
            || queue_depth > self.config.queue_depth_threshold;
        let under_recovery = Duration::from_millis(latency_ms) < self.config.recovery_latency_threshold
            && queue_depth < self.config.recovery_queue_depth_threshold;

        let recovered_streak = if under_recovery {
            self.recovered_streak.fetch_add(1, Ordering::AcqRel) + 1
        } else {
            self.recovered_streak.store(0, Ordering::Release);
            0
        };

        if !currently_throttling && over_activation {
            self.throttling.store(true, Ordering::Release);
            self.recovered_streak.store(0, Ordering::Release);
            self.sink.on_activated();
            true
        } else if currently_throttling && under_recovery && recovered_streak >= 2 {
            self.throttling.store(false, Ordering::Release);
            self.recovered_streak.store(0, Ordering::Release);
            self.sink.on_deactivated();
            false
        } else {
            currently_throttling
        }
    }

    /// Spawns a background sampler calling `tick` at `sample_interval`.
    /// The returned handle's `JoinHandle` can be aborted to stop sampling.
    pub fn spawn_sampler(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(monitor.config.sample_interval);
            loop {
                interval.tick().await;
                monitor.tick();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BackpressureConfig {
        BackpressureConfig {
            latency_threshold: Duration::from_millis(500),
            recovery_latency_threshold: Duration::from_millis(200),
            queue_depth_threshold: 1000,
            recovery_queue_depth_threshold: 400,
            sample_interval: Duration::from_millis(50),
        }
    }

    #[test]
    fn config_rejects_inverted_thresholds() {
        let mut bad = config();
        bad.recovery_latency_threshold = bad.latency_threshold;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn activates_above_threshold_recovers_after_a_full_interval_below_recovery() {
        let monitor = BackpressureMonitor::new(config());
        assert!(!monitor.is_throttling());

        monitor.record_sample(Duration::from_millis(600), 0);
        assert!(monitor.tick());
        assert!(monitor.is_throttling());

        // Between activation and recovery thresholds: stays throttling (hysteresis).
        monitor.record_sample(Duration::from_millis(300), 0);
        monitor.tick();
        assert!(monitor.is_throttling());

        // First tick under recovery: still throttling, the dip hasn't
        // spanned a full observation interval yet.
        monitor.record_sample(Duration::from_millis(100), 0);
        assert!(monitor.tick());
        assert!(monitor.is_throttling());

        // Second consecutive tick under recovery: the condition has now
        // held for a full interval, so it deactivates.
        assert!(!monitor.tick());
        assert!(!monitor.is_throttling());
    }

    #[test]
    fn a_single_transient_dip_below_recovery_does_not_deactivate() {
        let monitor = BackpressureMonitor::new(config());
        monitor.record_sample(Duration::from_millis(600), 0);
        assert!(monitor.tick());

        monitor.record_sample(Duration::from_millis(100), 0);
        assert!(monitor.tick());
        assert!(monitor.is_throttling());

        // Latency spikes back up before a second consecutive recovered
        // tick lands: the streak resets and throttling must not clear.
        monitor.record_sample(Duration::from_millis(600), 0);
        assert!(monitor.tick());
        assert!(monitor.is_throttling());

        monitor.record_sample(Duration::from_millis(100), 0);
        monitor.tick();
        assert!(monitor.is_throttling());
        assert!(!monitor.tick());
        assert!(!monitor.is_throttling());
    }
}
