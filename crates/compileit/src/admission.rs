use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Rate used when the configured one is zero.
const FALLBACK_PER_MINUTE: u32 = 30;
/// Buckets idle longer than this are evicted.
pub(crate) const BUCKET_TTL: Duration = Duration::from_secs(10 * 60);
/// How often the sweeper looks for idle buckets.
pub(crate) const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Per-identity token bucket limiter.
///
/// Tokens refill continuously at `per_minute / 60` per second up to `burst`.
/// Evicted identities simply start over with a fresh bucket.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    /// Tokens per second.
    rate: f64,
    burst: f64,
    ttl: Duration,
}

impl RateLimiter {
    pub fn new(per_minute: u32, burst: u32) -> Self {
        let per_minute = if per_minute == 0 {
            FALLBACK_PER_MINUTE
        } else {
            per_minute
        };
        let burst = if burst == 0 { per_minute } else { burst };
        Self {
            buckets: Mutex::new(HashMap::new()),
            rate: f64::from(per_minute) / 60.0,
            burst: f64::from(burst),
            ttl: BUCKET_TTL,
        }
    }

    /// Consume one token for `identity`; `false` means reject.
    pub fn allow(&self, identity: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(bucket) = buckets.get_mut(identity) else {
            buckets.insert(
                identity.to_owned(),
                Bucket {
                    tokens: self.burst - 1.0,
                    last_refill: now,
                },
            );
            return true;
        };

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        if !elapsed.is_zero() {
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
            bucket.last_refill = now;
        }

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Drop buckets that have not been touched within the TTL.
    pub fn sweep(&self) -> usize {
        let Some(cutoff) = Instant::now().checked_sub(self.ttl) else {
            return 0;
        };
        let mut buckets = self.buckets.lock().unwrap_or_else(PoisonError::into_inner);
        let before = buckets.len();
        buckets.retain(|_, bucket| bucket.last_refill >= cutoff);
        before - buckets.len()
    }

    pub fn tracked(&self) -> usize {
        self.buckets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Run [`sweep`](Self::sweep) every [`SWEEP_INTERVAL`] until aborted.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let evicted = self.sweep();
                if evicted > 0 {
                    debug!(evicted, remaining = self.tracked(), "evicted idle rate-limit buckets");
                }
            }
        })
    }
}
