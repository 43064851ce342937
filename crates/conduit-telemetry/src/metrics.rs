//! `MetricsCollector`: a thin facade over the `metrics` crate so core crates
//! never depend on a concrete exporter.
//!
//! Grounded on `fc-scheduler/src/poller.rs`/`dispatcher.rs`'s direct
//! `::metrics::counter!`/`gauge!` macro calls; this crate wraps the same
//! macros behind a trait object so callers can swap in a no-op or recording
//! collector for tests without linking an exporter.

pub trait MetricsCollector: Send + Sync {
    fn increment_counter(&self, name: &'static str, value: u64);
    fn set_gauge(&self, name: &'static str, value: f64);
    fn record_histogram(&self, name: &'static str, value: f64);
}

/// Default collector: forwards straight to the `metrics` facade. Whatever
/// exporter the host process installs (Prometheus, statsd, ...) receives
/// these calls; this crate never links one itself.
pub struct FacadeMetricsCollector;

impl MetricsCollector for FacadeMetricsCollector {
    fn increment_counter(&self, name: &'static str, value: u64) {
        ::metrics::counter!(name).increment(value);
    }

    fn set_gauge(&self, name: &'static str, value: f64) {
        ::metrics::gauge!(name).set(value);
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        ::metrics::histogram!(name).record(value);
    }
}

/// A collector that records every call in memory, for assertions in tests
/// that don't want to stand up a real exporter.
#[derive(Default)]
pub struct RecordingMetricsCollector {
    pub counters: dashmap::DashMap<&'static str, u64>,
    pub gauges: dashmap::DashMap<&'static str, f64>,
    pub histograms: dashmap::DashMap<&'static str, Vec<f64>>,
}

impl MetricsCollector for RecordingMetricsCollector {
    fn increment_counter(&self, name: &'static str, value: u64) {
        *self.counters.entry(name).or_insert(0) += value;
    }

    fn set_gauge(&self, name: &'static str, value: f64) {
        self.gauges.insert(name, value);
    }

    fn record_histogram(&self, name: &'static str, value: f64) {
        self.histograms.entry(name).or_default().push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_collector_tallies_counters() {
        let collector = RecordingMetricsCollector::default();
        collector.increment_counter("conduit.circuit.rejected_total", 1);
        collector.increment_counter("conduit.circuit.rejected_total", 2);
        assert_eq!(*collector.counters.get("conduit.circuit.rejected_total").unwrap(), 3);
    }

    #[test]
    fn recording_collector_overwrites_gauges() {
        let collector = RecordingMetricsCollector::default();
        collector.set_gauge("conduit.bulkhead.active", 4.0);
        collector.set_gauge("conduit.bulkhead.active", 5.0);
        assert_eq!(*collector.gauges.get("conduit.bulkhead.active").unwrap(), 5.0);
    }
}
