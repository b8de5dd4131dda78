//! Process-wide admission gate for metadata requests
//!
//! One [`RateLimiter`] is shared by every provider. A request may only go
//! out while its [`RatePermit`] is alive; permits are exclusive and are
//! issued at least `window` apart. The window is a one-cell `governor`
//! quota.

use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Duration;

use governor::clock::Clock as GovernorClock;
use governor::middleware::NoOpMiddleware;
use governor::state::{InMemoryState, NotKeyed};
use governor::Quota;
use theiaconfig::Config;
use tracing::{trace, warn};

use crate::clock::{PacingClock, SystemClock};

type DirectLimiter<C> = governor::RateLimiter<
    NotKeyed,
    InMemoryState,
    C,
    NoOpMiddleware<<C as GovernorClock>::Instant>,
>;

/// The quota and the clock it is measured on
trait Window: Send + Sync {
    /// `Err` holds how long to wait before asking again
    fn check(&self) -> Result<(), Duration>;
    fn sleep(&self, duration: Duration);
}

struct GovernedWindow<C: PacingClock> {
    limiter: DirectLimiter<C>,
    clock: C,
}

impl<C: PacingClock> Window for GovernedWindow<C> {
    fn check(&self) -> Result<(), Duration> {
        self.limiter
            .check()
            .map_err(|not_until| not_until.wait_time_from(self.clock.now()))
    }

    fn sleep(&self, duration: Duration) {
        self.clock.sleep(duration);
    }
}

pub struct RateLimiter {
    window: Duration,
    quota: Option<Box<dyn Window>>,
    in_flight: Mutex<()>,
}

impl RateLimiter {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(window, SystemClock::default())
    }

    /// A zero window only keeps requests exclusive
    pub fn with_clock<C: PacingClock>(window: Duration, clock: C) -> Self {
        let quota = Quota::with_period(window).map(|quota| {
            Box::new(GovernedWindow {
                limiter: governor::RateLimiter::direct_with_clock(quota, &clock),
                clock,
            }) as Box<dyn Window>
        });
        Self {
            window,
            quota,
            in_flight: Mutex::new(()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(Duration::from_millis(config.get_lookup_window_millis()))
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn recover<'a>(&'a self, poisoned: PoisonError<MutexGuard<'a, ()>>) -> MutexGuard<'a, ()> {
        warn!("Rate limiter gate poisoned, resetting");
        self.in_flight.clear_poison();
        poisoned.into_inner()
    }

    /// Waits for the previous permit to be dropped, then for the window
    pub fn acquire(&self) -> RatePermit<'_> {
        let guard = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| self.recover(poisoned));
        if let Some(quota) = &self.quota {
            while let Err(wait) = quota.check() {
                trace!(wait_ms = wait.as_millis() as u64, "Waiting for rate window");
                quota.sleep(wait);
            }
        }
        RatePermit { _guard: guard }
    }

    /// A permit only if one can be issued right now
    pub fn try_acquire(&self) -> Option<RatePermit<'_>> {
        let guard = match self.in_flight.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => self.recover(poisoned),
            Err(TryLockError::WouldBlock) => return None,
        };
        if let Some(quota) = &self.quota {
            quota.check().ok()?;
        }
        Some(RatePermit { _guard: guard })
    }
}

/// Exclusive right to send one request; released on drop
pub struct RatePermit<'a> {
    _guard: MutexGuard<'a, ()>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::{Arc, mpsc};
    use std::thread;

    fn limiter(window_ms: u64) -> (Arc<RateLimiter>, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(Duration::from_millis(window_ms), clock.clone());
        (Arc::new(limiter), clock)
    }

    #[test]
    fn test_permits_are_spaced_by_window() {
        let (limiter, clock) = limiter(1000);
        let mut issued = Vec::new();
        for _ in 0..4 {
            let _permit = limiter.acquire();
            issued.push(clock.elapsed());
        }
        assert_eq!(issued[0], Duration::ZERO);
        for pair in issued.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
        // N permits take at least (N - 1) windows
        assert!(clock.elapsed() >= Duration::from_millis(3000));
    }

    #[test]
    fn test_no_wait_once_window_elapsed() {
        let (limiter, clock) = limiter(1000);
        drop(limiter.acquire());
        clock.advance(Duration::from_secs(5));
        drop(limiter.acquire());
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_zero_window_never_waits() {
        let (limiter, clock) = limiter(0);
        for _ in 0..3 {
            drop(limiter.acquire());
        }
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_permit_is_exclusive() {
        let (limiter, clock) = limiter(10);
        let permit = limiter.acquire();
        clock.advance(Duration::from_secs(1));
        assert!(limiter.try_acquire().is_none());

        let (tx, rx) = mpsc::channel();
        let other = Arc::clone(&limiter);
        let handle = thread::spawn(move || {
            let _permit = other.acquire();
            tx.send(()).unwrap();
        });

        // cannot have been issued while the first permit lives
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
        drop(permit);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn test_try_acquire_respects_window() {
        let (limiter, clock) = limiter(1000);
        drop(limiter.try_acquire().unwrap());
        assert!(limiter.try_acquire().is_none());
        clock.advance(Duration::from_millis(1000));
        assert!(limiter.try_acquire().is_some());
    }

    #[test]
    fn test_poisoned_gate_is_reset() {
        let (limiter, _clock) = limiter(0);
        let holder = Arc::clone(&limiter);
        let _ = thread::spawn(move || {
            let _permit = holder.acquire();
            panic!("holder died");
        })
        .join();

        assert!(limiter.in_flight.is_poisoned());
        drop(limiter.acquire());
        assert!(!limiter.in_flight.is_poisoned());
    }
}
