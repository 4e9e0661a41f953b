use chrono::NaiveDateTime;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// Wall-clock abstraction for schedule matching and grid-aligned sleeps.
///
/// - now(): local wall-clock time
/// - sleep(): sleeps for the provided duration (implementations may simulate)
/// - until(): helper computing the non-negative wait until `deadline`
pub trait Clock {
    fn now(&self) -> NaiveDateTime;
    fn sleep(&self, d: Duration);

    /// Time remaining until `deadline`, saturating at 0 when it already passed.
    fn until(&self, deadline: NaiveDateTime) -> Duration {
        (deadline - self.now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Real local time backed by `chrono::Local`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl SystemClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    #[inline]
    fn now(&self) -> NaiveDateTime {
        chrono::Local::now().naive_local()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

/// Deterministic clock whose time only moves when told to.
///
/// sleep(d) advances the shared time by d without actually sleeping, so loops
/// driven by it run as fast as the CPU allows. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<NaiveDateTime>>,
}

impl ManualClock {
    pub fn starting_at(start: NaiveDateTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by the given duration.
    pub fn advance(&self, d: Duration) {
        let delta = chrono::TimeDelta::from_std(d).unwrap_or(chrono::TimeDelta::MAX);
        if let Ok(mut now) = self.now.lock() {
            *now = now.checked_add_signed(delta).unwrap_or(*now);
        }
    }

    /// Jump to an absolute time (may move backwards).
    pub fn set(&self, t: NaiveDateTime) {
        if let Ok(mut now) = self.now.lock() {
            *now = t;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> NaiveDateTime {
        match self.now.lock() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t0() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 4, 18)
            .and_then(|d| d.and_hms_opt(7, 59, 58))
            .unwrap()
    }

    #[test]
    fn manual_clock_sleep_advances_shared_time() {
        let clock = ManualClock::starting_at(t0());
        let other = clock.clone();
        clock.sleep(Duration::from_millis(2500));
        assert_eq!(other.now(), t0() + chrono::TimeDelta::milliseconds(2500));
    }

    #[test]
    fn until_saturates_for_past_deadlines() {
        let clock = ManualClock::starting_at(t0());
        let past = t0() - chrono::TimeDelta::seconds(3);
        assert_eq!(clock.until(past), Duration::ZERO);
        let future = t0() + chrono::TimeDelta::seconds(3);
        assert_eq!(clock.until(future), Duration::from_secs(3));
    }
}
