//! Metrics facade and lifecycle event sinks shared across the resilience
//! mesh, the saga coordinator, and the broker core, per §0.4.

pub mod metrics;
pub mod sinks;

pub use metrics::{FacadeMetricsCollector, MetricsCollector, RecordingMetricsCollector};
pub use sinks::{
    MetricsBackpressureEventSink, MetricsCircuitEventSink, MetricsPoisonEventSink, MetricsSagaEventSink,
    NoopPoisonEventSink, PoisonEventSink,
};
