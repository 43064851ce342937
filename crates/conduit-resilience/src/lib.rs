//! The resilience mesh: circuit breaker, bulkhead, rate limiter, and
//! backpressure monitor. Each primitive is independently usable; the
//! broker core composes all four around transport calls.

pub mod backpressure;
pub mod bulkhead;
pub mod circuit;
pub mod rate_limiter;

pub use backpressure::{BackpressureConfig, BackpressureEventSink, BackpressureMonitor, NoopBackpressureEventSink};
pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadMetrics, BulkheadPermit};
pub use circuit::{CircuitBreaker, CircuitBreakerConfig, CircuitEventSink, CircuitState, NoopCircuitEventSink};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
