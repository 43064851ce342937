//! Event sink implementations that translate resilience and saga lifecycle
//! events into metrics, plus the poison-message sink consumed by
//! `conduit-core`.

use std::sync::Arc;

use conduit_resilience::{BackpressureEventSink, CircuitEventSink, CircuitState};
use conduit_saga::{SagaData, SagaEventSink};
use tracing::warn;

use crate::metrics::MetricsCollector;

pub struct MetricsCircuitEventSink {
    metrics: Arc<dyn MetricsCollector>,
}

impl MetricsCircuitEventSink {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl CircuitEventSink for MetricsCircuitEventSink {
    fn on_state_changed(&self, endpoint: &str, previous: CircuitState, new: CircuitState, reason: &str) {
        self.metrics.increment_counter("conduit.circuit.state_changes_total", 1);
        self.metrics.set_gauge(
            "conduit.circuit.state",
            match new {
                CircuitState::Closed => 0.0,
                CircuitState::Open => 1.0,
                CircuitState::HalfOpen => 0.5,
            },
        );
        tracing::info!(endpoint, ?previous, ?new, reason, "circuit breaker state changed");
    }

    fn on_rejected(&self, endpoint: &str, current: CircuitState) {
        self.metrics.increment_counter("conduit.circuit.rejected_total", 1);
        tracing::debug!(endpoint, ?current, "circuit breaker rejected call");
    }
}

pub struct MetricsBackpressureEventSink {
    metrics: Arc<dyn MetricsCollector>,
}

impl MetricsBackpressureEventSink {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl BackpressureEventSink for MetricsBackpressureEventSink {
    fn on_activated(&self) {
        self.metrics.increment_counter("conduit.backpressure.activations_total", 1);
        self.metrics.set_gauge("conduit.backpressure.throttling", 1.0);
        warn!("backpressure activated");
    }

    fn on_deactivated(&self) {
        self.metrics.set_gauge("conduit.backpressure.throttling", 0.0);
        tracing::info!("backpressure recovered");
    }
}

pub struct MetricsSagaEventSink {
    metrics: Arc<dyn MetricsCollector>,
}

impl MetricsSagaEventSink {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl SagaEventSink for MetricsSagaEventSink {
    fn on_completed(&self, saga: &SagaData) {
        self.metrics.increment_counter("conduit.saga.completed_total", 1);
        self.metrics.record_histogram("conduit.saga.steps_executed", saga.execution_order.len() as f64);
    }

    fn on_failed(&self, saga: &SagaData, failed_step: &str, reason: &str) {
        self.metrics.increment_counter("conduit.saga.failed_total", 1);
        tracing::warn!(saga_id = %saga.saga_id, failed_step, reason, "saga step failed");
    }

    fn on_compensated(&self, saga: &SagaData, compensation_succeeded: bool) {
        self.metrics.increment_counter("conduit.saga.compensated_total", 1);
        if !compensation_succeeded {
            self.metrics.increment_counter("conduit.saga.compensation_incomplete_total", 1);
        }
        tracing::info!(saga_id = %saga.saga_id, compensation_succeeded, "saga compensation finished");
    }
}

/// Fired when the broker core gives up on a message and routes it to the
/// poison path, per §4.L. Lives here (rather than in `conduit-core`) so a
/// process can observe poisoning without importing the whole broker.
pub trait PoisonEventSink: Send + Sync {
    fn on_poisoned(&self, message_type: &str, message_id: &str, attempts: u32, reason: &str);
}

pub struct MetricsPoisonEventSink {
    metrics: Arc<dyn MetricsCollector>,
}

impl MetricsPoisonEventSink {
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl PoisonEventSink for MetricsPoisonEventSink {
    fn on_poisoned(&self, message_type: &str, message_id: &str, attempts: u32, reason: &str) {
        self.metrics.increment_counter("conduit.poison.messages_total", 1);
        tracing::error!(message_type, message_id, attempts, reason, "message routed to poison path");
    }
}

pub struct NoopPoisonEventSink;

impl PoisonEventSink for NoopPoisonEventSink {
    fn on_poisoned(&self, _message_type: &str, _message_id: &str, _attempts: u32, _reason: &str) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RecordingMetricsCollector;
    use serde_json::json;

    fn saga() -> SagaData {
        SagaData::new("saga-1", None, json!({}))
    }

    #[test]
    fn circuit_sink_counts_rejections() {
        let metrics = Arc::new(RecordingMetricsCollector::default());
        let sink = MetricsCircuitEventSink::new(metrics.clone());
        sink.on_rejected("orders", CircuitState::Open);
        assert_eq!(*metrics.counters.get("conduit.circuit.rejected_total").unwrap(), 1);
    }

    #[test]
    fn saga_sink_counts_completion() {
        let metrics = Arc::new(RecordingMetricsCollector::default());
        let sink = MetricsSagaEventSink::new(metrics.clone());
        sink.on_completed(&saga());
        assert_eq!(*metrics.counters.get("conduit.saga.completed_total").unwrap(), 1);
    }

    #[test]
    fn poison_sink_counts_and_does_not_panic() {
        let metrics = Arc::new(RecordingMetricsCollector::default());
        let sink = MetricsPoisonEventSink::new(metrics.clone());
        sink.on_poisoned("Order", "msg-1", 5, "handler kept throwing");
        assert_eq!(*metrics.counters.get("conduit.poison.messages_total").unwrap(), 1);
    }
}
