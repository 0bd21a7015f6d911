//! Refresh throttling.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{self, Instant};

/// Token bucket guarding admin-API usage from one instance's refresh loop.
///
/// Steady state is one permit per `period` with a burst of one, and `acquire`
/// yields until a permit is available rather than failing. Scheduled and
/// forced refreshes share the same bucket, so the limiter doubles as the only
/// backoff in the refresh loop.
#[derive(Debug)]
pub(crate) struct RefreshRateLimiter {
    bucket: Mutex<Bucket>,
    period: Duration,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

impl RefreshRateLimiter {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: 1.0,
                last_refill: Instant::now(),
            }),
            period,
        }
    }

    /// Takes one permit, sleeping until the bucket has refilled enough.
    pub(crate) async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill);
                bucket.tokens =
                    (bucket.tokens + elapsed.as_secs_f64() / self.period.as_secs_f64()).min(1.0);
                bucket.last_refill = now;

                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) * self.period.as_secs_f64())
            };
            time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_acquire_is_immediate() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_acquire_waits_a_full_period() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(60));
        let start = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permit_refills_after_period() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(60));
        limiter.acquire().await;
        time::sleep(Duration::from_secs(61)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_does_not_accumulate_burst() {
        let limiter = RefreshRateLimiter::new(Duration::from_secs(60));
        limiter.acquire().await;
        // A long quiet stretch must not buy more than one immediate permit.
        time::sleep(Duration::from_secs(600)).await;

        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() < Duration::from_secs(1));
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_secs(59));
    }
}
