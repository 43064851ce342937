//! Builder / Profile Composer (§4.O): assembles a `Broker` from
//! `conduit_config::AppConfig` plus the caller-supplied collaborators a
//! config file cannot express on its own (a transport, a type registry, a
//! store backend, event sinks).
//!
//! Grounded on `fc-router/src/lifecycle.rs`'s composition root shape, where
//! one struct collects every configured subsystem before handing back a
//! single façade.

use std::sync::Arc;
use std::time::Duration;

use conduit_common::{CompressionAlgorithm, Envelope, TypeRegistry};
use conduit_compression::Compressor;
use conduit_config::{AppConfig, CompressionAlgorithmConfig, DedupStrategy as ConfigDedupStrategy};
use conduit_dedup::{DedupConfig, DedupStrategy, Deduplicator};
use conduit_inbox::InboxStore;
use conduit_outbox::OutboxStore;
use conduit_resilience::{
    BackpressureConfig, BackpressureEventSink, BackpressureMonitor, Bulkhead, BulkheadConfig, CircuitBreakerConfig,
    CircuitEventSink, NoopBackpressureEventSink, NoopCircuitEventSink, RateLimiter, RateLimiterConfig,
};
use conduit_saga::{SagaCoordinator, SagaEventSink, SagaRunOptions, SagaStep};
use conduit_telemetry::{FacadeMetricsCollector, MetricsCollector, NoopPoisonEventSink, PoisonEventSink};
use conduit_transport::TransportAdapter;
use conduit_validation::{SchemaValidator, Validator};
use tracing::warn;

use crate::broker::Broker;
use crate::poison::PoisonHandler;

/// Collects every optional collaborator a `Broker` needs beyond what
/// `AppConfig` can express, then assembles `Broker::build` in one pass.
pub struct BrokerBuilder {
    config: AppConfig,
    transport: Option<Arc<dyn TransportAdapter>>,
    registry: TypeRegistry,
    validator: Option<Arc<dyn Validator>>,
    schema_validator: Option<Arc<dyn SchemaValidator>>,
    outbox: Option<Arc<dyn OutboxStore>>,
    inbox: Option<Arc<dyn InboxStore>>,
    circuit_sink: Option<Arc<dyn CircuitEventSink>>,
    circuit_ignored_predicate: Option<Arc<dyn Fn(&conduit_common::ConduitError) -> bool + Send + Sync>>,
    backpressure_sink: Option<Arc<dyn BackpressureEventSink>>,
    poison_sink: Option<Arc<dyn PoisonEventSink>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    custom_dedup_strategy: Option<Arc<dyn Fn(&Envelope) -> String + Send + Sync>>,
    drain_grace: Duration,
    inbox_lease_duration: Option<Duration>,
}

impl BrokerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: None,
            registry: TypeRegistry::new(),
            validator: None,
            schema_validator: None,
            outbox: None,
            inbox: None,
            circuit_sink: None,
            circuit_ignored_predicate: None,
            backpressure_sink: None,
            poison_sink: None,
            metrics: None,
            custom_dedup_strategy: None,
            drain_grace: Duration::from_secs(10),
            inbox_lease_duration: None,
        }
    }

    pub fn with_transport(mut self, transport: Arc<dyn TransportAdapter>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn with_schema_validator(mut self, validator: Arc<dyn SchemaValidator>) -> Self {
        self.schema_validator = Some(validator);
        self
    }

    pub fn with_outbox(mut self, outbox: Arc<dyn OutboxStore>) -> Self {
        self.outbox = Some(outbox);
        self
    }

    pub fn with_inbox(mut self, inbox: Arc<dyn InboxStore>) -> Self {
        self.inbox = Some(inbox);
        self
    }

    pub fn with_circuit_sink(mut self, sink: Arc<dyn CircuitEventSink>) -> Self {
        self.circuit_sink = Some(sink);
        self
    }

    /// Failures matching this predicate do not count toward the circuit's
    /// failure window (spec's `IgnoredExceptionTypes`/`ExceptionPredicate`).
    /// A call still counts as a failure to the caller; only the breaker's
    /// own bookkeeping treats it as a non-event, unless slow-call tracking
    /// is also enabled and the call was slow.
    pub fn with_circuit_ignored_predicate(
        mut self,
        predicate: Arc<dyn Fn(&conduit_common::ConduitError) -> bool + Send + Sync>,
    ) -> Self {
        self.circuit_ignored_predicate = Some(predicate);
        self
    }

    pub fn with_backpressure_sink(mut self, sink: Arc<dyn BackpressureEventSink>) -> Self {
        self.backpressure_sink = Some(sink);
        self
    }

    pub fn with_poison_sink(mut self, sink: Arc<dyn PoisonEventSink>) -> Self {
        self.poison_sink = Some(sink);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Required when `dedup.strategy = "custom"`; ignored otherwise.
    pub fn with_custom_dedup_strategy(mut self, f: Arc<dyn Fn(&Envelope) -> String + Send + Sync>) -> Self {
        self.custom_dedup_strategy = Some(f);
        self
    }

    pub fn with_drain_grace(mut self, grace: Duration) -> Self {
        self.drain_grace = grace;
        self
    }

    /// `InboxConfig` carries no lease duration of its own; override the
    /// broker's default here if the deployment needs a non-default lease.
    pub fn with_inbox_lease_duration(mut self, lease_duration: Duration) -> Self {
        self.inbox_lease_duration = Some(lease_duration);
        self
    }

    pub fn build(self) -> Result<Broker, String> {
        let transport = self.transport.ok_or_else(|| "a transport adapter is required".to_string())?;
        let broker_cfg = &self.config.broker;

        let mut broker = Broker::new(
            transport.clone(),
            self.registry,
            broker_cfg.default_routing_key_pattern.clone(),
            broker_cfg.publish_timeout(),
            broker_cfg.handler_timeout(),
        );

        if self.config.compression.enabled {
            let algorithm = match self.config.compression.algorithm {
                CompressionAlgorithmConfig::GZip => CompressionAlgorithm::GZip,
                CompressionAlgorithmConfig::Deflate => CompressionAlgorithm::Deflate,
                CompressionAlgorithmConfig::Brotli => CompressionAlgorithm::Brotli,
            };
            broker.compressor = Some(Arc::new(Compressor::new(
                algorithm,
                self.config.compression.level,
                self.config.compression.minimum_size_bytes,
            )));
        }

        broker.validator = self.validator;
        broker.schema_validator = self.schema_validator;

        if self.config.circuit.enabled {
            broker.circuit_config = Some(CircuitBreakerConfig {
                failure_threshold: self.config.circuit.failure_threshold,
                reset_timeout: Duration::from_secs(self.config.circuit.timeout_secs),
                slow_call_duration: Duration::from_millis(self.config.circuit.slow_call_duration_ms),
                track_slow_calls: self.config.circuit.track_slow_calls,
                half_open_success_threshold: self.config.circuit.half_open_success_threshold,
                window_size: self.config.circuit.window_size,
            });
            broker.circuit_sink = self.circuit_sink.unwrap_or_else(|| Arc::new(NoopCircuitEventSink));
            broker.circuit_ignored_predicate = self.circuit_ignored_predicate;
        }

        if self.config.bulkhead.enabled {
            broker.bulkhead = Some(Arc::new(Bulkhead::new(BulkheadConfig {
                max_concurrent: self.config.bulkhead.max_concurrent_operations,
                max_queued: self.config.bulkhead.max_queued_operations,
                acquisition_timeout: Duration::from_millis(self.config.bulkhead.acquisition_timeout_ms),
            })));
        }

        if self.config.rate.enabled {
            broker.rate_limiter = Some(Arc::new(RateLimiter::new(RateLimiterConfig {
                capacity: self.config.rate.capacity,
                refill_rate: self.config.rate.refill_rate,
            })));
        }

        if self.config.backpressure.enabled {
            let backpressure_config = BackpressureConfig {
                latency_threshold: Duration::from_millis(self.config.backpressure.latency_threshold_ms),
                recovery_latency_threshold: Duration::from_millis(
                    self.config.backpressure.recovery_latency_threshold_ms,
                ),
                queue_depth_threshold: self.config.backpressure.queue_depth_threshold,
                recovery_queue_depth_threshold: self.config.backpressure.recovery_queue_depth_threshold,
                sample_interval: Duration::from_millis(self.config.backpressure.sample_interval_ms),
            };
            backpressure_config.validate()?;
            let sink = self.backpressure_sink.unwrap_or_else(|| Arc::new(NoopBackpressureEventSink));
            let monitor = Arc::new(BackpressureMonitor::with_sink(backpressure_config, sink));
            monitor.spawn_sampler();
            broker.backpressure = Some(monitor);
        }

        if self.config.dedup.enabled {
            let strategy = match self.config.dedup.strategy {
                ConfigDedupStrategy::ContentHash => DedupStrategy::ContentHash,
                ConfigDedupStrategy::MessageId => DedupStrategy::MessageId,
                ConfigDedupStrategy::Custom => match self.custom_dedup_strategy {
                    Some(f) => DedupStrategy::Custom(f),
                    None => {
                        warn!("dedup.strategy is 'custom' but no custom strategy was supplied, falling back to content hash");
                        DedupStrategy::ContentHash
                    }
                },
            };
            let dedup_config = DedupConfig {
                window: Duration::from_secs(self.config.dedup.window_secs),
                max_cache_size: self.config.dedup.max_cache_size,
                strategy,
            };
            dedup_config.validate()?;
            let deduplicator = Arc::new(Deduplicator::new(dedup_config));
            deduplicator.spawn_sweeper();
            broker.deduplicator = Some(deduplicator);
        }

        if self.config.outbox.enabled {
            broker.outbox = self.outbox;
        }

        if self.config.inbox.enabled {
            broker.inbox = self.inbox;
            broker.consumer_name = self.config.inbox.consumer_name.clone();
        }
        if let Some(lease_duration) = self.inbox_lease_duration {
            broker.inbox_lease_duration = lease_duration;
        }

        broker.retry = self.config.retry.clone();
        broker.drain_grace = self.drain_grace;
        broker.metrics = self.metrics.unwrap_or_else(|| Arc::new(FacadeMetricsCollector));

        let poison_sink = self.poison_sink.unwrap_or_else(|| Arc::new(NoopPoisonEventSink));
        broker.poison = Some(Arc::new(PoisonHandler::new(transport, poison_sink)));

        Ok(broker)
    }

    /// Translates `SagaConfig` into a ready-to-run coordinator for the
    /// given steps. Independent of `Broker` — a saga may coordinate calls
    /// that never touch the message broker at all.
    pub fn build_saga_coordinator(&self, steps: Vec<SagaStep>, sink: Arc<dyn SagaEventSink>) -> SagaCoordinator {
        let saga_cfg = &self.config.saga;
        let options = SagaRunOptions {
            auto_retry_failed_steps: saga_cfg.auto_retry_failed_steps,
            max_retry_attempts: saga_cfg.max_retry_attempts,
            retry_delay: Duration::from_millis(saga_cfg.retry_delay_ms),
            use_exponential_backoff: saga_cfg.use_exponential_backoff,
            continue_compensation_on_error: saga_cfg.continue_compensation_on_error,
            step_timeout: saga_cfg.step_timeout_secs.map(Duration::from_secs),
            compensation_timeout: saga_cfg.compensation_timeout_secs.map(Duration::from_secs),
            overall_timeout: saga_cfg.default_timeout_secs.map(Duration::from_secs),
            auto_persist: saga_cfg.auto_persist,
            require_idempotent_resume: false,
        };
        SagaCoordinator::new(steps, options).with_sink(sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_transport::InMemoryTransport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn build_requires_a_transport() {
        let err = BrokerBuilder::new(AppConfig::default()).build().unwrap_err();
        assert!(err.contains("transport"));
    }

    #[test]
    fn build_wires_resilience_components_from_enabled_config() {
        let mut config = AppConfig::default();
        config.circuit.enabled = true;
        config.bulkhead.enabled = true;
        config.rate.enabled = true;
        config.dedup.enabled = true;

        let broker = BrokerBuilder::new(config)
            .with_transport(Arc::new(InMemoryTransport::new()))
            .build()
            .unwrap();

        assert_eq!(broker.circuit_config.as_ref().unwrap().window_size, config_default_window_size());
        assert!(broker.bulkhead.is_some());
        assert!(broker.rate_limiter.is_some());
        assert!(broker.deduplicator.is_some());
        assert!(broker.poison.is_some());
    }

    fn config_default_window_size() -> u32 {
        conduit_config::CircuitConfig::default().window_size
    }

    #[test]
    fn build_threads_the_circuit_ignored_predicate_through_to_the_broker() {
        let mut config = AppConfig::default();
        config.circuit.enabled = true;

        let predicate: Arc<dyn Fn(&conduit_common::ConduitError) -> bool + Send + Sync> =
            Arc::new(|_| true);
        let broker = BrokerBuilder::new(config)
            .with_transport(Arc::new(InMemoryTransport::new()))
            .with_circuit_ignored_predicate(predicate)
            .build()
            .unwrap();

        assert!(broker.circuit_ignored_predicate.is_some());
    }

    #[test]
    fn dedup_custom_strategy_falls_back_without_a_registered_closure() {
        let mut config = AppConfig::default();
        config.dedup.enabled = true;
        config.dedup.strategy = ConfigDedupStrategy::Custom;

        let broker = BrokerBuilder::new(config)
            .with_transport(Arc::new(InMemoryTransport::new()))
            .build()
            .unwrap();

        assert!(broker.deduplicator.is_some());
    }

    #[tokio::test]
    async fn build_saga_coordinator_translates_retry_settings() {
        let mut config = AppConfig::default();
        config.saga.auto_retry_failed_steps = true;
        config.saga.max_retry_attempts = 5;

        let builder = BrokerBuilder::new(config).with_transport(Arc::new(InMemoryTransport::new()));

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let execute: conduit_saga::StepOperation = Arc::new(move |_ctx| {
            let calls = calls_clone.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        });
        let compensate: conduit_saga::StepOperation = Arc::new(|_ctx| Box::pin(async move { Ok(()) }));
        let step = SagaStep::new("reserve", execute, compensate);

        let coordinator = builder.build_saga_coordinator(vec![step], Arc::new(conduit_saga::NoopSagaEventSink));
        let saga = conduit_saga::SagaData::new("saga-1", None, serde_json::json!({}));
        let context: conduit_saga::SagaContext = Arc::new(tokio::sync::RwLock::new(serde_json::json!({})));

        let result = coordinator.run(saga, context, &std::collections::HashSet::new()).await.unwrap();
        assert_eq!(result.state, conduit_saga::SagaState::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
