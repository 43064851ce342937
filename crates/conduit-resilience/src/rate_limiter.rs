//! Fractional token bucket rate limiter.
//!
//! Not built on `governor`: that crate models whole-token buckets and has
//! no blocking-acquire-with-cancellation primitive in the shape §4.E's
//! blocking variant needs, so this is a small hand-rolled bucket instead.

use std::time::{Duration, Instant};

use parking_lot::Mutex;

use conduit_common::ConduitError;

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    pub capacity: f64,
    pub refill_rate: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        let tokens = config.capacity;
        Self {
            config,
            state: Mutex::new(BucketState {
                tokens,
                last_refill: Instant::now(),
            }),
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill = now;
    }

    fn time_to_next_token(&self, state: &BucketState) -> Duration {
        if self.config.refill_rate <= 0.0 {
            return Duration::MAX;
        }
        let deficit = 1.0 - state.tokens;
        if deficit <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(deficit / self.config.refill_rate)
        }
    }

    /// Non-blocking variant: fails immediately if no token is available.
    pub fn try_acquire(&self) -> Result<(), ConduitError> {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let retry_after_ms = self.time_to_next_token(&state).as_millis() as u64;
            Err(ConduitError::RateLimitExceeded { retry_after_ms })
        }
    }

    /// Blocks (asynchronously) until a token is available.
    pub async fn acquire(&self) -> Result<(), ConduitError> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    None
                } else {
                    Some(self.time_to_next_token(&state))
                }
            };
            match wait {
                None => return Ok(()),
                Some(duration) => tokio::time::sleep(duration.max(Duration::from_millis(1))).await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_blocking_fails_when_empty() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1.0,
            refill_rate: 0.001,
        });
        assert!(limiter.try_acquire().is_ok());
        let err = limiter.try_acquire().unwrap_err();
        assert!(matches!(err, ConduitError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn blocking_acquire_waits_for_refill() {
        let limiter = RateLimiter::new(RateLimiterConfig {
            capacity: 1.0,
            refill_rate: 20.0,
        });
        limiter.try_acquire().unwrap();
        let start = Instant::now();
        limiter.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }
}
