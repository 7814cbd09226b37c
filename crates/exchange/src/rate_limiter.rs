use hlkit_core::config::RestSettings;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::debug;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Weighted token bucket shared by every REST request of one client.
#[derive(Debug)]
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl RateLimiter {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
            capacity: capacity as f64,
            refill_per_sec: refill_per_sec.max(f64::MIN_POSITIVE),
        }
    }

    pub fn from_settings(settings: &RestSettings) -> Self {
        Self::new(settings.rate_limit_capacity, settings.rate_limit_refill_per_sec)
    }

    /// Waits until `weight` tokens are available and takes them.
    pub async fn acquire(&self, weight: u32) {
        let needed = (weight as f64).min(self.capacity);

        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                self.refill(&mut bucket);

                if bucket.tokens >= needed {
                    bucket.tokens -= needed;
                    debug!("Rate limiter: {} consumed, {:.1} remaining", needed, bucket.tokens);
                    return;
                }
                Duration::from_secs_f64((needed - bucket.tokens) / self.refill_per_sec)
            };

            debug!("Rate limiter: waiting {:?} for weight {}", wait, weight);
            sleep(wait).await;
        }
    }

    pub async fn try_acquire(&self, weight: u32) -> bool {
        let needed = (weight as f64).min(self.capacity);
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);

        if bucket.tokens >= needed {
            bucket.tokens -= needed;
            true
        } else {
            false
        }
    }

    pub async fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().await;
        self.refill(&mut bucket);
        bucket.tokens
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
            bucket.last_refill = now;
        }
    }
}
