//! Global token-bucket rate limiter, burst equal to the rate.

use std::sync::Mutex;
use std::sync::MutexGuard;
use std::time::Instant;

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

fn lock(bucket: &Mutex<Bucket>) -> MutexGuard<'_, Bucket> {
    match bucket.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl RateLimiter {
    /// `rate` is requests per second; the bucket starts full.
    pub fn new(rate: f64) -> Self {
        let rate = rate.max(f64::MIN_POSITIVE);
        Self {
            rate,
            burst: rate.max(1.0),
            bucket: Mutex::new(Bucket {
                tokens: rate.max(1.0),
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take one token, or report how many whole seconds (≥ 1) until one
    /// becomes available.
    pub fn try_acquire(&self) -> Result<(), u64> {
        let mut bucket = lock(&self.bucket);
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = (deficit / self.rate).ceil().max(1.0);
            Err(wait as u64)
        }
    }
}
