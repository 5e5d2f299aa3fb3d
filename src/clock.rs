//! Injectable time source.
//!
//! The rate limiter reads the monotonic clock, the assignment engine reads
//! wall-clock time for deadlines, and the retrying gateway sleeps through it.
//! Tests swap in [`ManualClock`] so all three are deterministic.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

pub trait Clock: Send + Sync + Debug {
    /// Monotonic time, used for elapsed-time arithmetic.
    fn now(&self) -> Instant;

    /// Wall-clock time, used for persisted timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Clock whose time only moves when told to.
///
/// `sleep` advances the clock by the requested duration and resolves
/// immediately. Every requested sleep is recorded so backoff schedules can
/// be asserted on.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualState>>,
}

#[derive(Debug)]
struct ManualState {
    base_instant: Instant,
    base_utc: DateTime<Utc>,
    elapsed: Duration,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::starting_at(Utc::now())
    }

    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualState {
                base_instant: Instant::now(),
                base_utc: start,
                elapsed: Duration::ZERO,
                sleeps: Vec::new(),
            })),
        }
    }

    pub fn advance(&self, duration: Duration) {
        self.inner.lock().elapsed += duration;
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.inner.lock().sleeps.clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let state = self.inner.lock();
        state.base_instant + state.elapsed
    }

    fn now_utc(&self) -> DateTime<Utc> {
        let state = self.inner.lock();
        let elapsed = chrono::Duration::from_std(state.elapsed).unwrap_or(chrono::Duration::zero());
        state.base_utc + elapsed
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        {
            let mut state = self.inner.lock();
            state.elapsed += duration;
            state.sleeps.push(duration);
        }
        Box::pin(std::future::ready(()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};

    use super::{Clock, ManualClock};

    #[test]
    fn manual_clock_moves_both_time_sources_together() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        let before = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now() - before, Duration::from_secs(90));
        assert_eq!(clock.now_utc(), start + chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn manual_sleep_records_and_advances() {
        let clock = ManualClock::new();
        let before = clock.now();

        clock.sleep(Duration::from_millis(250)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(500)]
        );
        assert_eq!(clock.now() - before, Duration::from_millis(750));
    }
}
