//! Circuit breaker: a per-endpoint failure-rate / slow-call state machine.
//!
//! Hand-rolled rather than built on an off-the-shelf crate — ignored-
//! exception classification combined with slow-call tracking (a slow call
//! counts as a failure even when the underlying error is on the ignore
//! list) isn't expressible through a generic retry/breaker crate's policy
//! surface.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::info;

use conduit_common::ConduitError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub slow_call_duration: Duration,
    pub track_slow_calls: bool,
    pub half_open_success_threshold: u32,
    /// Number of most recent counted outcomes (in the `Closed` state) the
    /// breaker remembers. A success ages the oldest outcome out of the
    /// window rather than resetting the failure count to zero, so a single
    /// success between runs of failures does not mask the failures that
    /// came before it.
    pub window_size: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            slow_call_duration: Duration::from_secs(2),
            track_slow_calls: false,
            half_open_success_threshold: 2,
            window_size: 20,
        }
    }
}

/// Receives circuit breaker lifecycle events synchronously on the calling
/// task. Implementations are responsible for their own offloading.
pub trait CircuitEventSink: Send + Sync {
    fn on_state_changed(&self, endpoint: &str, previous: CircuitState, new: CircuitState, reason: &str);
    fn on_rejected(&self, endpoint: &str, current: CircuitState);
}

pub struct NoopCircuitEventSink;

impl CircuitEventSink for NoopCircuitEventSink {
    fn on_state_changed(&self, _endpoint: &str, _previous: CircuitState, _new: CircuitState, _reason: &str) {}
    fn on_rejected(&self, _endpoint: &str, _current: CircuitState) {}
}

struct CircuitInner {
    state: CircuitState,
    /// Most recent counted outcomes while `Closed`, oldest first; `true` is
    /// a counted failure. Bounded to `CircuitBreakerConfig::window_size`.
    window: VecDeque<bool>,
    window_failures: u32,
    half_open_successes: u32,
    opened_at: Option<Instant>,
}

impl CircuitInner {
    /// Records an outcome in the rolling window, evicting the oldest entry
    /// once the window is full, and returns the window's current failure
    /// count.
    fn record(&mut self, window_size: u32, failed: bool) -> u32 {
        self.window.push_back(failed);
        if failed {
            self.window_failures += 1;
        }
        if self.window.len() as u32 > window_size.max(1) {
            if let Some(evicted) = self.window.pop_front() {
                if evicted {
                    self.window_failures = self.window_failures.saturating_sub(1);
                }
            }
        }
        self.window_failures
    }

    fn reset_window(&mut self) {
        self.window.clear();
        self.window_failures = 0;
    }
}

/// A single endpoint's circuit. The broker core keeps one of these per
/// logical destination (routing key, exchange, or whatever a transport
/// calls "endpoint").
pub struct CircuitBreaker {
    endpoint: String,
    config: CircuitBreakerConfig,
    inner: Mutex<CircuitInner>,
    sink: Arc<dyn CircuitEventSink>,
    is_ignored: Option<Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>>,
}

/// An admitted call's bookkeeping handle.
pub struct CircuitPermit {
    start: Instant,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            endpoint: endpoint.into(),
            config,
            inner: Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                window: VecDeque::new(),
                window_failures: 0,
                half_open_successes: 0,
                opened_at: None,
            }),
            sink: Arc::new(NoopCircuitEventSink),
            is_ignored: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn CircuitEventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_ignored_predicate(
        mut self,
        predicate: Arc<dyn Fn(&ConduitError) -> bool + Send + Sync>,
    ) -> Self {
        self.is_ignored = Some(predicate);
        self
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Admits a call, or rejects it with `CircuitOpen` when the circuit is
    /// open and the reset timeout has not elapsed.
    pub fn acquire(&self) -> Result<CircuitPermit, ConduitError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(CircuitPermit { start: Instant::now() }),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or_else(Instant::now);
                let elapsed = opened_at.elapsed();
                if elapsed >= self.config.reset_timeout {
                    let previous = inner.state;
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    drop(inner);
                    self.sink.on_state_changed(&self.endpoint, previous, CircuitState::HalfOpen, "reset timeout elapsed");
                    info!(endpoint = %self.endpoint, "circuit half-open probe admitted");
                    Ok(CircuitPermit { start: Instant::now() })
                } else {
                    let retry_after = self.config.reset_timeout - elapsed;
                    self.sink.on_rejected(&self.endpoint, CircuitState::Open);
                    Err(ConduitError::CircuitOpen {
                        endpoint: self.endpoint.clone(),
                        opened_at_secs: elapsed.as_secs(),
                        retry_after_secs: retry_after.as_secs(),
                    })
                }
            }
        }
    }

    /// Runs `f` under the circuit, classifying the result and updating the
    /// state machine. `f` is expected to perform its own timing-sensitive
    /// work; duration is measured here so slow-call tracking is consistent
    /// regardless of what `f` does internally.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, ConduitError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, ConduitError>>,
    {
        let permit = self.acquire()?;
        let result = f().await;
        let elapsed = permit.start.elapsed();
        match result {
            Ok(value) => {
                self.on_success(elapsed);
                Ok(value)
            }
            Err(err) => {
                let ignored = self.is_ignored.as_ref().map(|p| p(&err)).unwrap_or(false);
                self.on_failure(elapsed, ignored);
                Err(err)
            }
        }
    }

    fn on_success(&self, elapsed: Duration) {
        let slow = self.config.track_slow_calls && elapsed >= self.config.slow_call_duration;
        if slow {
            self.on_failure(elapsed, false);
            return;
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                // A success ages the window forward rather than resetting
                // it: an old run of failures still counts until it scrolls
                // out, per the rolling-window model.
                inner.record(self.config.window_size, false);
            }
            CircuitState::HalfOpen => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    let previous = inner.state;
                    inner.state = CircuitState::Closed;
                    inner.reset_window();
                    inner.half_open_successes = 0;
                    inner.opened_at = None;
                    drop(inner);
                    self.sink.on_state_changed(&self.endpoint, previous, CircuitState::Closed, "half-open success threshold reached");
                    info!(endpoint = %self.endpoint, "circuit closed after half-open recovery");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, elapsed: Duration, ignored: bool) {
        let slow = self.config.track_slow_calls && elapsed >= self.config.slow_call_duration;
        let counted = slow || !ignored;
        if !counted {
            return;
        }

        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                let window_failures = inner.record(self.config.window_size, true);
                if window_failures >= self.config.failure_threshold {
                    let previous = inner.state;
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.reset_window();
                    drop(inner);
                    self.sink.on_state_changed(
                        &self.endpoint,
                        previous,
                        CircuitState::Open,
                        "failure count reached threshold",
                    );
                    info!(endpoint = %self.endpoint, "circuit opened");
                }
            }
            CircuitState::HalfOpen => {
                let previous = inner.state;
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                inner.half_open_successes = 0;
                inner.reset_window();
                drop(inner);
                self.sink.on_state_changed(&self.endpoint, previous, CircuitState::Open, "half-open probe failed");
                info!(endpoint = %self.endpoint, "circuit reopened after failed half-open probe");
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "orders",
            CircuitBreakerConfig {
                failure_threshold: threshold,
                reset_timeout: Duration::from_millis(50),
                slow_call_duration: Duration::from_secs(5),
                track_slow_calls: false,
                half_open_success_threshold: 1,
                window_size: 20,
            },
        )
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), ConduitError> {
        cb.call(|| async { Err::<(), _>(ConduitError::TransportError("boom".into())) }).await
    }

    #[tokio::test]
    async fn opens_after_exactly_n_failures() {
        let cb = breaker(2);
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_while_open_then_half_opens_after_timeout() {
        let cb = breaker(1);
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);

        let rejected = cb.call(|| async { Ok::<(), ConduitError>(()) }).await;
        assert!(matches!(rejected, Err(ConduitError::CircuitOpen { .. })));

        tokio::time::sleep(Duration::from_millis(60)).await;
        let ok = cb.call(|| async { Ok::<(), ConduitError>(()) }).await;
        assert!(ok.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn ignored_exceptions_do_not_count() {
        let cb = breaker(2).with_ignored_predicate(Arc::new(|_| true));
        for _ in 0..10 {
            let _ = cb.call(|| async { Err::<(), _>(ConduitError::TransportError("ignored".into())) }).await;
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn a_success_ages_the_window_instead_of_resetting_it() {
        let cb = breaker(5);
        for _ in 0..4 {
            assert!(fail(&cb).await.is_err());
        }
        assert_eq!(cb.state(), CircuitState::Closed);

        // One success between runs of failures must not zero the count; a
        // sliding window only ages the failures out once evicted, not on
        // the next success.
        assert!(cb.call(|| async { Ok::<(), ConduitError>(()) }).await.is_ok());
        assert_eq!(cb.state(), CircuitState::Closed);

        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_immediately() {
        let cb = breaker(1);
        assert!(fail(&cb).await.is_err());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
    }
}
