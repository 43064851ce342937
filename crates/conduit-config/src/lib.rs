//! Layered configuration: a TOML file merged with environment overrides.
//!
//! Every group here corresponds to one row-group of the authoritative
//! option table: `broker`, `compression`, `retry`, `circuit`, `bulkhead`,
//! `rate`, `backpressure`, `dedup`, `outbox`, `inbox`, `saga`.

mod loader;

pub use loader::{ConfigError, ConfigLoader};

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    ContentHash,
    MessageId,
    Custom,
}

impl Default for DedupStrategy {
    fn default() -> Self {
        DedupStrategy::ContentHash
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithmConfig {
    GZip,
    Deflate,
    Brotli,
}

impl Default for CompressionAlgorithmConfig {
    fn default() -> Self {
        CompressionAlgorithmConfig::GZip
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BrokerConfig {
    pub transport_type: String,
    pub default_exchange: Option<String>,
    pub default_stream: Option<String>,
    pub default_routing_key_pattern: String,
    pub auto_publish_results: bool,
    pub publish_timeout_secs: u64,
    pub handler_timeout_secs: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            transport_type: "in-memory".to_string(),
            default_exchange: None,
            default_stream: None,
            default_routing_key_pattern: "{MessageType}".to_string(),
            auto_publish_results: false,
            publish_timeout_secs: 30,
            handler_timeout_secs: 30,
        }
    }
}

impl BrokerConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }

    pub fn handler_timeout(&self) -> Duration {
        Duration::from_secs(self.handler_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub algorithm: CompressionAlgorithmConfig,
    pub level: u32,
    pub minimum_size_bytes: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithmConfig::GZip,
            level: 6,
            minimum_size_bytes: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_exponential_backoff: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
            use_exponential_backoff: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitConfig {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub timeout_secs: u64,
    pub slow_call_duration_ms: u64,
    pub track_slow_calls: bool,
    pub half_open_success_threshold: u32,
    pub window_size: u32,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            timeout_secs: 30,
            slow_call_duration_ms: 2_000,
            track_slow_calls: false,
            half_open_success_threshold: 2,
            window_size: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BulkheadConfig {
    pub enabled: bool,
    pub max_concurrent_operations: u32,
    pub max_queued_operations: u32,
    pub acquisition_timeout_ms: u64,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_operations: 32,
            max_queued_operations: 64,
            acquisition_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RateConfig {
    pub enabled: bool,
    pub capacity: f64,
    pub refill_rate: f64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            capacity: 100.0,
            refill_rate: 50.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackpressureConfig {
    pub enabled: bool,
    pub latency_threshold_ms: u64,
    pub recovery_latency_threshold_ms: u64,
    pub queue_depth_threshold: u64,
    pub recovery_queue_depth_threshold: u64,
    pub sample_interval_ms: u64,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            latency_threshold_ms: 500,
            recovery_latency_threshold_ms: 200,
            queue_depth_threshold: 1_000,
            recovery_queue_depth_threshold: 400,
            sample_interval_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DedupConfig {
    pub enabled: bool,
    pub window_secs: u64,
    pub max_cache_size: usize,
    pub strategy: DedupStrategy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            window_secs: 300,
            max_cache_size: 100_000,
            strategy: DedupStrategy::ContentHash,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutboxConfig {
    pub enabled: bool,
    pub polling_interval_ms: u64,
    pub batch_size: u32,
    pub retention_period_secs: u64,
    pub lease_duration_secs: u64,
}

impl Default for OutboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            polling_interval_ms: 500,
            batch_size: 50,
            retention_period_secs: 7 * 24 * 3600,
            lease_duration_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct InboxConfig {
    pub enabled: bool,
    pub retention_period_secs: u64,
    pub cleanup_interval_secs: u64,
    pub consumer_name: String,
}

impl Default for InboxConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            retention_period_secs: 7 * 24 * 3600,
            cleanup_interval_secs: 3600,
            consumer_name: "default-consumer".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SagaConfig {
    pub enabled: bool,
    pub default_timeout_secs: Option<u64>,
    pub auto_persist: bool,
    pub persistence_interval_ms: u64,
    pub auto_retry_failed_steps: bool,
    pub max_retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub use_exponential_backoff: bool,
    pub auto_compensate_on_failure: bool,
    pub continue_compensation_on_error: bool,
    pub step_timeout_secs: Option<u64>,
    pub compensation_timeout_secs: Option<u64>,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            default_timeout_secs: None,
            auto_persist: false,
            persistence_interval_ms: 1_000,
            auto_retry_failed_steps: false,
            max_retry_attempts: 3,
            retry_delay_ms: 200,
            use_exponential_backoff: true,
            auto_compensate_on_failure: true,
            continue_compensation_on_error: true,
            step_timeout_secs: None,
            compensation_timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub broker: BrokerConfig,
    pub compression: CompressionConfig,
    pub retry: RetryConfig,
    pub circuit: CircuitConfig,
    pub bulkhead: BulkheadConfig,
    pub rate: RateConfig,
    pub backpressure: BackpressureConfig,
    pub dedup: DedupConfig,
    pub outbox: OutboxConfig,
    pub inbox: InboxConfig,
    pub saga: SagaConfig,
}
