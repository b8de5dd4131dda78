//! Time sources for the rate limiter
//!
//! The window itself is kept by `governor`, which only needs to read time.
//! [`PacingClock`] adds the ability to wait, so a fake clock can make the
//! wait instantaneous.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use governor::clock::{Clock as GovernorClock, DefaultClock, FakeRelativeClock};

pub trait PacingClock: GovernorClock + Send + Sync + 'static {
    fn sleep(&self, duration: Duration);
}

#[derive(Debug, Default, Clone)]
pub struct SystemClock(DefaultClock);

impl GovernorClock for SystemClock {
    type Instant = <DefaultClock as GovernorClock>::Instant;

    fn now(&self) -> Self::Instant {
        self.0.now()
    }
}

impl PacingClock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Clock that only moves when told to; `sleep` advances it instantly
///
/// Clones share the same time.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    inner: FakeRelativeClock,
    elapsed: Arc<Mutex<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        self.inner.advance(duration);
        *elapsed += duration;
    }

    /// Time elapsed since the clock was created
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl GovernorClock for ManualClock {
    type Instant = <FakeRelativeClock as GovernorClock>::Instant;

    fn now(&self) -> Self::Instant {
        self.inner.now()
    }
}

impl PacingClock for ManualClock {
    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_sleep_advances() {
        let clock = ManualClock::new();
        let start = clock.now();
        clock.sleep(Duration::from_secs(3));
        assert!(clock.now() > start);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let shared = clock.clone();
        clock.advance(Duration::from_millis(250));
        assert_eq!(shared.elapsed(), Duration::from_millis(250));
        assert_eq!(shared.now(), clock.now());
    }
}
