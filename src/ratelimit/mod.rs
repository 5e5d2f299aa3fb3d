//! Per-key token-bucket rate limiting.
//!
//! Buckets live in a [`DashMap`]; its shard locks guard the map structure and
//! are held only long enough to look up or insert a bucket handle. Token
//! arithmetic happens under the bucket's own mutex, taken after the shard
//! guard is released, so unrelated keys never wait on each other.

pub mod middleware;

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use crate::clock::Clock;

const MIN_RATE: f64 = 1.0;
const MIN_BURST: f64 = 1.0;

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Tokens added per second.
    pub rate: f64,
    /// Bucket capacity.
    pub burst: f64,
    /// Buckets idle for longer than this are evicted.
    pub idle_ttl: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            rate: 10.0,
            burst: 20.0,
            idle_ttl: Duration::from_secs(600),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
    last_seen: Instant,
}

impl Bucket {
    fn full(burst: f64, now: Instant) -> Self {
        Self {
            tokens: burst,
            last_refill: now,
            last_seen: now,
        }
    }

    fn is_full_at(&self, rate: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens + elapsed * rate >= burst
    }

    fn try_take(&mut self, rate: f64, burst: f64, now: Instant) -> bool {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * rate).min(burst);
        self.last_refill = now;
        self.last_seen = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

#[derive(Debug)]
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    idle_ttl: Duration,
    sweep_every: Duration,
    buckets: DashMap<String, Arc<Mutex<Bucket>>>,
    last_sweep: Mutex<Instant>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Non-positive (or NaN) rate and burst are raised to 1 so a bad config
    /// still yields a working limiter.
    pub fn new(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        let rate = clamp_min(config.rate, MIN_RATE);
        let burst = clamp_min(config.burst, MIN_BURST);
        let now = clock.now();

        Self {
            rate,
            burst,
            idle_ttl: config.idle_ttl,
            sweep_every: config.idle_ttl / 2,
            buckets: DashMap::new(),
            last_sweep: Mutex::new(now),
            clock,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn burst(&self) -> f64 {
        self.burst
    }

    /// Admits or denies one request for `key`. Never blocks on other keys.
    pub fn allow(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.maybe_sweep(now);

        let bucket = self.bucket_for(key, now);
        let mut bucket = bucket.lock();
        bucket.try_take(self.rate, self.burst, now)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Evicts idle buckets immediately, regardless of the sweep cadence.
    pub fn sweep_idle(&self) -> usize {
        let now = self.clock.now();
        *self.last_sweep.lock() = now;
        self.evict_idle(now)
    }

    fn bucket_for(&self, key: &str, now: Instant) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.get(key) {
            return bucket.value().clone();
        }
        // the shard guard drops at the end of this statement
        self.buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(Bucket::full(self.burst, now))))
            .value()
            .clone()
    }

    fn maybe_sweep(&self, now: Instant) {
        {
            let mut last_sweep = self.last_sweep.lock();
            if now.saturating_duration_since(*last_sweep) < self.sweep_every {
                return;
            }
            *last_sweep = now;
        }
        let evicted = self.evict_idle(now);
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.buckets.len(), "evicted idle rate limit buckets");
        }
    }

    /// A bucket is dropped only once it is idle past the TTL and would have
    /// refilled to `burst` anyway, so re-creating it full grants nothing.
    fn evict_idle(&self, now: Instant) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| match bucket.try_lock() {
            Some(bucket) => {
                now.saturating_duration_since(bucket.last_seen) < self.idle_ttl
                    || !bucket.is_full_at(self.rate, self.burst, now)
            }
            // someone is refilling it right now, so it is not idle
            None => true,
        });
        before.saturating_sub(self.buckets.len())
    }
}

fn clamp_min(value: f64, min: f64) -> f64 {
    if value.is_nan() || value < min { min } else { value }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::{RateLimitConfig, RateLimiter};
    use crate::clock::ManualClock;

    fn limiter(rate: f64, burst: f64, ttl_secs: u64) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::new(
            RateLimitConfig {
                rate,
                burst,
                idle_ttl: Duration::from_secs(ttl_secs),
            },
            Arc::new(clock.clone()),
        );
        (limiter, clock)
    }

    #[test]
    fn burst_is_admitted_then_denied() {
        let (limiter, _clock) = limiter(1.0, 3.0, 600);

        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));
    }

    #[test]
    fn tokens_refill_with_elapsed_time() {
        let (limiter, clock) = limiter(2.0, 2.0, 600);
        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));

        clock.advance(Duration::from_millis(500));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn refill_never_exceeds_burst() {
        let (limiter, clock) = limiter(100.0, 2.0, 6000);
        assert!(limiter.allow("k"));

        clock.advance(Duration::from_secs(3600));

        assert!(limiter.allow("k"));
        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
    }

    #[test]
    fn keys_do_not_share_tokens() {
        let (limiter, _clock) = limiter(1.0, 1.0, 600);

        assert!(limiter.allow("a"));
        assert!(!limiter.allow("a"));
        assert!(limiter.allow("b"));
    }

    #[test]
    fn admitted_calls_bounded_by_burst_plus_rate_times_window() {
        let (limiter, clock) = limiter(5.0, 4.0, 600);
        let window = Duration::from_secs(3);
        let step = Duration::from_millis(10);

        let mut admitted = 0;
        let mut elapsed = Duration::ZERO;
        while elapsed < window {
            for _ in 0..3 {
                if limiter.allow("flood") {
                    admitted += 1;
                }
            }
            clock.advance(step);
            elapsed += step;
        }

        let bound = (4.0 + 5.0 * window.as_secs_f64()).ceil() as usize;
        assert!(admitted <= bound, "admitted {admitted} > bound {bound}");
        assert!(admitted >= bound - 2);
    }

    #[test]
    fn non_positive_config_is_clamped_to_one() {
        let (limiter, clock) = limiter(0.0, -5.0, 600);
        assert_eq!(limiter.rate(), 1.0);
        assert_eq!(limiter.burst(), 1.0);

        assert!(limiter.allow("k"));
        assert!(!limiter.allow("k"));
        clock.advance(Duration::from_secs(1));
        assert!(limiter.allow("k"));
    }

    #[test]
    fn idle_buckets_are_evicted_lazily() {
        let (limiter, clock) = limiter(1.0, 1.0, 10);
        for i in 0..100 {
            limiter.allow(&format!("client-{i}"));
        }
        assert_eq!(limiter.len(), 100);

        clock.advance(Duration::from_secs(11));
        limiter.allow("fresh");

        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn ttl_shorter_than_refill_time_grants_no_extra_tokens() {
        let (limiter, clock) = limiter(1.0, 5.0, 2);
        let mut admitted = (0..10).filter(|_| limiter.allow("k")).count();

        clock.advance(Duration::from_millis(2100));
        admitted += (0..10).filter(|_| limiter.allow("k")).count();

        let bound = (5.0_f64 + 1.0 * 2.1).ceil() as usize;
        assert!(admitted <= bound, "admitted {admitted} > bound {bound}");
        assert_eq!(admitted, 7);
    }

    #[test]
    fn drained_bucket_outlives_ttl_until_refilled() {
        let (limiter, clock) = limiter(1.0, 5.0, 2);
        for _ in 0..5 {
            limiter.allow("k");
        }

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.sweep_idle(), 0);

        clock.advance(Duration::from_secs(3));
        assert_eq!(limiter.sweep_idle(), 1);
    }

    #[test]
    fn active_bucket_survives_sweep() {
        let (limiter, clock) = limiter(1.0, 1.0, 10);
        limiter.allow("idle");
        clock.advance(Duration::from_secs(6));
        limiter.allow("active");
        clock.advance(Duration::from_secs(6));

        assert_eq!(limiter.sweep_idle(), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[test]
    fn concurrent_callers_on_one_key_never_overdraw() {
        let (limiter, _clock) = limiter(1.0, 50.0, 600);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = limiter.clone();
                std::thread::spawn(move || (0..20).filter(|_| limiter.allow("shared")).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(admitted, 50);
    }
}
