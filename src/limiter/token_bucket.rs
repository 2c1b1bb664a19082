// src/limiter/token_bucket.rs
//! Token bucket with continuous refill
//!
//! Tokens refill continuously based on elapsed time rather than in fixed
//! windows. Acquiring sleeps for exactly the deficit and can be
//! interrupted by a cancellation token.

use crate::limiter::Cancelled;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Longest single sleep; acquire re-checks the bucket after it
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// Token bucket for rate limiting
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum tokens in the bucket (burst)
    capacity: f64,

    /// Refill rate
    tokens_per_sec: f64,

    state: Mutex<BucketState>,
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    ///
    /// # Arguments
    /// * `capacity` - Maximum tokens the bucket can hold (at least 1)
    /// * `tokens_per_sec` - Refill rate, must be positive
    pub fn new(capacity: u32, tokens_per_sec: f64) -> Self {
        let capacity = f64::from(capacity.max(1));
        Self {
            capacity,
            tokens_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, or report how long until one is available
    pub fn try_consume(&self) -> Result<(), Duration> {
        let mut state = self.state.lock();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - state.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.tokens_per_sec)
                .unwrap_or(MAX_WAIT);
            Err(wait.min(MAX_WAIT))
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.tokens_per_sec).min(self.capacity);
        state.last_refill = now;
    }

    /// Block until a token is taken or `cancel` fires
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        loop {
            if cancel.is_cancelled() {
                return Err(Cancelled);
            }

            match self.try_consume() {
                Ok(()) => return Ok(()),
                Err(wait) => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(Cancelled),
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    /// Current token count (after refill)
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_refill() {
        let bucket = TokenBucket::new(3, 10.0);

        assert!(bucket.try_consume().is_ok());
        assert!(bucket.try_consume().is_ok());
        assert!(bucket.try_consume().is_ok());

        let wait = bucket.try_consume().unwrap_err();
        assert!(wait <= Duration::from_millis(100));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(bucket.try_consume().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_is_capped() {
        let bucket = TokenBucket::new(2, 100.0);
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(bucket.available_tokens() <= 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_throughput_bound() {
        // rate R = 10/s, burst B = 2, N = 7 acquires: at least (N - B) / R = 0.5s
        let bucket = TokenBucket::new(2, 10.0);
        let cancel = CancellationToken::new();
        let start = Instant::now();

        for _ in 0..7 {
            bucket.acquire(&cancel).await.unwrap();
        }

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_millis(600), "elapsed {:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_waits_are_bounded() {
        let bucket = TokenBucket::new(1, 1e-20);
        assert!(bucket.try_consume().is_ok());
        assert_eq!(bucket.try_consume().unwrap_err(), MAX_WAIT);

        let bucket = TokenBucket::new(1, f64::MIN_POSITIVE);
        assert!(bucket.try_consume().is_ok());
        assert_eq!(bucket.try_consume().unwrap_err(), MAX_WAIT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_reports_cancellation() {
        let bucket = std::sync::Arc::new(TokenBucket::new(1, 1.0 / 3600.0));
        let cancel = CancellationToken::new();
        bucket.acquire(&cancel).await.unwrap();

        let waiter = {
            let bucket = bucket.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { bucket.acquire(&cancel).await })
        };

        tokio::time::advance(Duration::from_secs(1)).await;
        cancel.cancel();
        assert_eq!(waiter.await.unwrap(), Err(Cancelled));
    }
}
