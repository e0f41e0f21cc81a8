//! Millisecond-precision time types
//!
//! The timer stack measures time as integer milliseconds after an arbitrary
//! process epoch. Both types saturate instead of overflowing: the saturated
//! values act as "infinite past" / "infinite future" sentinels, which keeps
//! deadline comparisons total without an `Option` at every call site.

use std::fmt;
use std::ops::{Add, Sub};

/// A span of time in integer milliseconds.
///
/// Unlike `std::time::Duration` this type has an explicit [`Duration::INFINITY`],
/// which the timeout wire codec needs to represent "no effective deadline".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    pub const ZERO: Duration = Duration(0);
    pub const INFINITY: Duration = Duration(i64::MAX);

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Duration(millis)
    }

    #[inline]
    pub const fn from_secs(secs: i64) -> Self {
        Duration(secs.saturating_mul(1000))
    }

    #[inline]
    pub const fn from_minutes(minutes: i64) -> Self {
        Duration(minutes.saturating_mul(60 * 1000))
    }

    #[inline]
    pub const fn from_hours(hours: i64) -> Self {
        Duration(hours.saturating_mul(60 * 60 * 1000))
    }

    /// Convert from fractional seconds, rounding to the nearest millisecond.
    #[inline]
    pub fn from_secs_f64(secs: f64) -> Self {
        let millis = secs * 1000.0;
        if millis >= i64::MAX as f64 {
            return Duration::INFINITY;
        }
        Duration(millis.round() as i64)
    }

    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    #[inline]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    #[inline]
    pub const fn is_infinite(self) -> bool {
        self.0 == i64::MAX
    }
}

impl From<std::time::Duration> for Duration {
    fn from(d: std::time::Duration) -> Self {
        Duration(i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Duration {
        Duration(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_infinite() {
            write!(f, "inf")
        } else {
            write!(f, "{}ms", self.0)
        }
    }
}

/// A point in time: integer milliseconds after the process epoch.
///
/// Monotonic by contract - hosts derive it from a monotonic clock source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub const PROCESS_EPOCH: Timestamp = Timestamp(0);
    pub const INFINITE_FUTURE: Timestamp = Timestamp(i64::MAX);

    #[inline]
    pub const fn from_millis(millis: i64) -> Self {
        Timestamp(millis)
    }

    #[inline]
    pub const fn as_millis(self) -> i64 {
        self.0
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Timestamp) -> Duration {
        Duration(self.0.saturating_sub(rhs.0))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}ms", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_constructors() {
        assert_eq!(Duration::from_secs(2).as_millis(), 2000);
        assert_eq!(Duration::from_minutes(1).as_millis(), 60_000);
        assert_eq!(Duration::from_hours(1).as_millis(), 3_600_000);
        assert_eq!(Duration::from_secs_f64(0.5).as_millis(), 500);
    }

    #[test]
    fn test_duration_saturation() {
        assert!(Duration::from_hours(i64::MAX).is_infinite());
        assert!((Duration::INFINITY + Duration::from_millis(1)).is_infinite());
        assert!(Duration::from_secs_f64(f64::INFINITY).is_infinite());
    }

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_millis(100);
        assert_eq!((t + Duration::from_millis(50)).as_millis(), 150);
        assert_eq!((t - Timestamp::from_millis(40)).as_millis(), 60);
        assert_eq!(
            Timestamp::INFINITE_FUTURE + Duration::from_millis(1),
            Timestamp::INFINITE_FUTURE
        );
    }

    #[test]
    fn test_ordering() {
        assert!(Timestamp::from_millis(1) < Timestamp::from_millis(2));
        assert!(Timestamp::from_millis(2) < Timestamp::INFINITE_FUTURE);
        assert!(Duration::from_secs(1) < Duration::INFINITY);
    }

    #[test]
    fn test_std_conversion() {
        let d: Duration = std::time::Duration::from_millis(250).into();
        assert_eq!(d.as_millis(), 250);
    }
}
