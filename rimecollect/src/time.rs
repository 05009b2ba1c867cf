//! Millisecond time types and one-shot protocol timers.
//!
//! The connection never reads a clock on its own. Every handler receives
//! `now` explicitly, so the same code runs under a real clock or the
//! simulator's virtual one.

use core::ops::{Add, Mul, Sub};

/// Point in time, milliseconds since an arbitrary epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Timestamp = Timestamp(0);
    pub const MAX: Timestamp = Timestamp(u64::MAX);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Timestamp(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Timestamp(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn saturating_add(self, duration: Duration) -> Self {
        Timestamp(self.0.saturating_add(duration.0))
    }

    /// Time elapsed since `earlier`, zero if `earlier` is in the future.
    #[inline]
    pub const fn saturating_sub(self, earlier: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(earlier.0))
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    #[inline]
    fn add(self, rhs: Duration) -> Timestamp {
        self.saturating_add(rhs)
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    #[inline]
    fn sub(self, rhs: Timestamp) -> Duration {
        self.saturating_sub(rhs)
    }
}

/// Time span in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Duration(u64);

impl Duration {
    pub const ZERO: Duration = Duration(0);

    #[inline]
    pub const fn from_millis(ms: u64) -> Self {
        Duration(ms)
    }

    #[inline]
    pub const fn from_secs(secs: u64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn as_millis(self) -> u64 {
        self.0
    }

    #[inline]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1000
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn saturating_mul(self, n: u64) -> Self {
        Duration(self.0.saturating_mul(n))
    }

    /// Left shift of the underlying millisecond count, saturating.
    #[inline]
    pub const fn saturating_shl(self, shift: u32) -> Self {
        match self.0.checked_shl(shift) {
            Some(v) if v >> shift == self.0 => Duration(v),
            _ => Duration(u64::MAX),
        }
    }

    #[inline]
    pub const fn half(self) -> Self {
        Duration(self.0 / 2)
    }
}

impl Add for Duration {
    type Output = Duration;

    #[inline]
    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl Mul<u64> for Duration {
    type Output = Duration;

    #[inline]
    fn mul(self, rhs: u64) -> Duration {
        self.saturating_mul(rhs)
    }
}

/// One-shot timer: an optional deadline.
///
/// Expiry is polled from `handle_timer`; a fired timer must be stopped or
/// re-armed by its handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Timer {
    deadline: Option<Timestamp>,
}

impl Timer {
    pub const fn stopped() -> Self {
        Timer { deadline: None }
    }

    pub fn set(&mut self, now: Timestamp, after: Duration) {
        self.deadline = Some(now + after);
    }

    pub fn stop(&mut self) {
        self.deadline = None;
    }

    pub fn is_running(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Timestamp> {
        self.deadline
    }

    /// True if armed and the deadline has been reached.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        matches!(self.deadline, Some(d) if now >= d)
    }

    /// Stop the timer if it has expired, reporting whether it did.
    pub fn take_expired(&mut self, now: Timestamp) -> bool {
        if self.is_expired(now) {
            self.deadline = None;
            true
        } else {
            false
        }
    }
}

/// Earliest of a set of optional deadlines.
pub fn earliest<I>(deadlines: I) -> Option<Timestamp>
where
    I: IntoIterator<Item = Option<Timestamp>>,
{
    deadlines.into_iter().flatten().min()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic_saturates() {
        let t = Timestamp::from_secs(10);
        assert_eq!((t + Duration::from_millis(500)).as_millis(), 10_500);
        assert_eq!(Timestamp::MAX + Duration::from_secs(1), Timestamp::MAX);
        assert_eq!(Timestamp::from_secs(1) - Timestamp::from_secs(5), Duration::ZERO);
    }

    #[test]
    fn test_duration_shift() {
        let d = Duration::from_secs(1);
        assert_eq!(d.saturating_shl(0), d);
        assert_eq!(d.saturating_shl(3).as_millis(), 8000);
        assert_eq!(Duration::from_millis(u64::MAX / 2 + 1).saturating_shl(1).as_millis(), u64::MAX);
        assert_eq!(Duration::from_millis(3000).half().as_millis(), 1500);
    }

    #[test]
    fn test_timer_lifecycle() {
        let mut timer = Timer::stopped();
        let now = Timestamp::from_secs(1);
        assert!(!timer.is_running());
        assert!(!timer.is_expired(now));

        timer.set(now, Duration::from_secs(2));
        assert_eq!(timer.deadline(), Some(Timestamp::from_secs(3)));
        assert!(!timer.take_expired(Timestamp::from_millis(2999)));
        assert!(timer.take_expired(Timestamp::from_secs(3)));
        assert!(!timer.is_running());
    }

    #[test]
    fn test_earliest_deadline() {
        let a = Some(Timestamp::from_secs(5));
        let b = Some(Timestamp::from_secs(2));
        assert_eq!(earliest([a, None, b]), b);
        assert_eq!(earliest([None, None]), None);
    }
}
