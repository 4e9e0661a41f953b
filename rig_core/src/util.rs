//! Common time helpers for rig_core.

use chrono::{NaiveDateTime, TimeDelta, Timelike};
use rig_traits::Clock;
use std::time::Duration;

use crate::shutdown::CancelToken;

/// Number of nanoseconds in one second.
pub const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Longest uninterrupted sleep inside a loop; bounds cancellation latency.
pub const CANCEL_POLL: Duration = Duration::from_secs(1);

/// Convert a std duration to a chrono delta, saturating on overflow.
#[inline]
pub fn to_delta(d: Duration) -> TimeDelta {
    TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)
}

/// Sub-second part of `t` in nanoseconds, clamped below one second
/// (chrono represents a leap second as nanos >= 1e9).
#[inline]
fn subsec_nanos(t: NaiveDateTime) -> u64 {
    u64::from(t.nanosecond()).min(NANOS_PER_SEC - 1)
}

/// Time left until the next whole wall-clock second.
#[inline]
pub fn until_next_second(now: NaiveDateTime) -> Duration {
    Duration::from_nanos(NANOS_PER_SEC - subsec_nanos(now))
}

/// Delay before the first telemetry sample.
///
/// The natural delay reaches the next `period`-aligned boundary (counted from
/// midnight). It is then shifted by `offset`: subtracted when the natural
/// delay is longer than the offset, added otherwise, so samples land
/// `period - offset` past each boundary instead of exactly on it.
pub fn initial_delay(now: NaiveDateTime, period: Duration, offset: Duration) -> Duration {
    let period_s = period.as_secs().max(1);
    let into_s = u64::from(now.num_seconds_from_midnight()) % period_s;
    let natural_ns = (period_s - into_s) * NANOS_PER_SEC - subsec_nanos(now);
    let natural = Duration::from_nanos(natural_ns);
    if natural > offset {
        natural - offset
    } else {
        natural + offset
    }
}

/// Sleep until `deadline` in slices of at most [`CANCEL_POLL`].
///
/// Returns `true` when cancellation was observed before the deadline.
pub fn sleep_until(clock: &dyn Clock, token: &CancelToken, deadline: NaiveDateTime) -> bool {
    loop {
        let left = clock.until(deadline);
        if left.is_zero() {
            return false;
        }
        if token.is_cancelled() {
            return true;
        }
        clock.sleep(left.min(CANCEL_POLL));
    }
}

/// Cancellation-aware relative sleep; see [`sleep_until`].
pub fn sleep_for(clock: &dyn Clock, token: &CancelToken, d: Duration) -> bool {
    let deadline = clock.now() + to_delta(d);
    sleep_until(clock, token, deadline)
}

/// `YYYY-MM-DD HH:MM:SS.ff` (hundredths of a second).
pub fn format_timestamp(t: NaiveDateTime) -> String {
    let centis = subsec_nanos(t) / 10_000_000;
    format!("{}.{:02}", t.format("%Y-%m-%d %H:%M:%S"), centis)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 4, 18)
            .and_then(|d| d.and_hms_milli_opt(h, m, s, ms))
            .unwrap()
    }

    #[test]
    fn next_second_from_fraction() {
        assert_eq!(until_next_second(at(8, 0, 0, 250)), Duration::from_millis(750));
        assert_eq!(until_next_second(at(8, 0, 0, 0)), Duration::from_secs(1));
    }

    #[test]
    fn initial_delay_subtracts_offset_when_natural_is_long() {
        // natural = 10 - 3.2 = 6.8 > 5 -> 1.8 (first sample at :05)
        let d = initial_delay(at(8, 0, 3, 200), Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(d, Duration::from_millis(1800));
    }

    #[test]
    fn initial_delay_adds_offset_when_natural_is_short() {
        // natural = 10 - 7.0 = 3.0 <= 5 -> 8.0 (first sample at :15)
        let d = initial_delay(at(8, 0, 7, 0), Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(d, Duration::from_secs(8));
    }

    #[test]
    fn initial_delay_lands_on_offset_grid() {
        for ms in (0..60_000).step_by(730) {
            let now = at(9, 59, ms / 1000, ms % 1000);
            let first = now
                + to_delta(initial_delay(
                    now,
                    Duration::from_secs(10),
                    Duration::from_secs(5),
                ));
            assert_eq!(first.second() % 10, 5, "from {now}");
            assert_eq!(first.nanosecond(), 0);
        }
    }

    #[test]
    fn timestamp_has_hundredths() {
        assert_eq!(format_timestamp(at(8, 5, 9, 127)), "2025-04-18 08:05:09.12");
    }
}
