//! Outbound call pacing for rate-limited sources.
//!
//! Each caller reserves the next free call slot under a short lock, releases
//! the lock, then sleeps until its slot. Sequential callers see exactly the
//! "wait until `min_interval` has elapsed since the previous call" contract;
//! concurrent callers sharing one pacer get distinct, spaced slots.

use crate::clock::Clock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Minimum spacing for sources with a strict five-calls-per-minute quota.
pub const QUOTA_SOURCE_INTERVAL: Duration = Duration::from_secs(15);

/// Minimum spacing for every other remote source.
pub const DEFAULT_SOURCE_INTERVAL: Duration = Duration::from_secs(1);

/// Default pacing interval for a source name.
pub fn default_min_interval(source_name: &str) -> Duration {
    if source_name.starts_with("av-") {
        QUOTA_SOURCE_INTERVAL
    } else {
        DEFAULT_SOURCE_INTERVAL
    }
}

/// Tracks the last outbound call and makes the next caller wait.
pub struct Pacer {
    clock: Arc<dyn Clock>,
    last_call: Mutex<Option<Instant>>,
    rng: Mutex<StdRng>,
}

impl Pacer {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_rng(clock, StdRng::from_entropy())
    }

    /// Deterministic jitter for tests.
    pub fn with_seed(clock: Arc<dyn Clock>, seed: u64) -> Self {
        Self::with_rng(clock, StdRng::seed_from_u64(seed))
    }

    fn with_rng(clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        Self {
            clock,
            last_call: Mutex::new(None),
            rng: Mutex::new(rng),
        }
    }

    /// Block until at least `min_interval` has passed since the previous
    /// `acquire` returned, then record this call.
    ///
    /// When a wait is needed it is `(min_interval - elapsed)` plus a uniform
    /// draw from `[0, jitter_fraction * min_interval]`. Returns the time waited.
    pub fn acquire(&self, min_interval: Duration, jitter_fraction: f64) -> Duration {
        let now = self.clock.now();
        let slot = {
            let mut last = self.last_call.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = match *last {
                Some(prev) => {
                    let ready = prev + min_interval;
                    if now >= ready {
                        now
                    } else {
                        ready + self.jitter(min_interval, jitter_fraction)
                    }
                }
                None => now,
            };
            *last = Some(slot);
            slot
        };

        let wait = slot.saturating_duration_since(now);
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "pacing outbound call");
            self.clock.sleep(wait);
        }
        wait
    }

    /// Uniform draw from `[0, factor * base]`.
    pub fn random_up_to(&self, base: Duration, factor: f64) -> Duration {
        let max = base.as_secs_f64() * factor;
        if max <= 0.0 || !max.is_finite() {
            return Duration::ZERO;
        }
        let secs = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(0.0..=max);
        Duration::from_secs_f64(secs)
    }

    fn jitter(&self, min_interval: Duration, jitter_fraction: f64) -> Duration {
        self.random_up_to(min_interval, jitter_fraction)
    }

    /// When the most recent call slot was granted.
    pub fn last_call(&self) -> Option<Instant> {
        *self.last_call.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::NaiveDate;

    fn clock() -> Arc<ManualClock> {
        Arc::new(ManualClock::at_date(NaiveDate::from_ymd_opt(2024, 5, 2).unwrap()))
    }

    #[test]
    fn first_call_never_waits() {
        let clock = clock();
        let pacer = Pacer::with_seed(clock.clone(), 7);
        assert_eq!(pacer.acquire(Duration::from_secs(1), 0.5), Duration::ZERO);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn consecutive_calls_are_spaced_by_min_interval() {
        let clock = clock();
        let pacer = Pacer::with_seed(clock.clone(), 7);
        let start = clock.now();

        pacer.acquire(Duration::from_secs(1), 0.0);
        let first = clock.now();
        pacer.acquire(Duration::from_secs(1), 0.0);
        let second = clock.now();

        assert!(second - first >= Duration::from_secs(1));
        assert_eq!(first, start);
    }

    #[test]
    fn call_after_interval_returns_immediately() {
        let clock = clock();
        let pacer = Pacer::with_seed(clock.clone(), 7);

        pacer.acquire(Duration::from_secs(1), 0.0);
        pacer.acquire(Duration::from_secs(1), 0.0);
        clock.advance(Duration::from_millis(1500));

        let before = clock.now();
        assert_eq!(pacer.acquire(Duration::from_secs(1), 0.0), Duration::ZERO);
        assert_eq!(clock.now(), before);
        assert_eq!(pacer.last_call(), Some(before));
    }

    #[test]
    fn partial_wait_covers_only_the_remainder() {
        let clock = clock();
        let pacer = Pacer::with_seed(clock.clone(), 7);

        pacer.acquire(Duration::from_secs(10), 0.0);
        clock.advance(Duration::from_secs(4));
        assert_eq!(
            pacer.acquire(Duration::from_secs(10), 0.0),
            Duration::from_secs(6)
        );
    }

    #[test]
    fn jitter_stays_within_fraction() {
        let clock = clock();
        let pacer = Pacer::with_seed(clock.clone(), 42);
        pacer.acquire(Duration::from_secs(2), 0.5);

        for _ in 0..50 {
            let waited = pacer.acquire(Duration::from_secs(2), 0.5);
            assert!(waited >= Duration::from_secs(2));
            assert!(waited <= Duration::from_secs(3));
        }
    }

    #[test]
    fn concurrent_callers_get_distinct_slots() {
        let clock = clock();
        let pacer = Arc::new(Pacer::with_seed(clock.clone(), 1));
        let start = clock.now();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pacer = Arc::clone(&pacer);
                std::thread::spawn(move || {
                    pacer.acquire(Duration::from_secs(1), 0.0);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Every slot is at least one interval after the previous one.
        let last = pacer.last_call().unwrap();
        assert!(last - start >= Duration::from_secs(3));
    }

    #[test]
    fn quota_sources_get_the_longer_interval() {
        assert_eq!(default_min_interval("av-daily-adjusted"), QUOTA_SOURCE_INTERVAL);
        assert_eq!(default_min_interval("yahoo"), DEFAULT_SOURCE_INTERVAL);
    }
}
