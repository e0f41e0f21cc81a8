//! grpc-timeout wire codec
//!
//! A duration crosses the wire as at most eight ASCII bytes: one to five
//! decimal digits followed by a unit letter (`n`, `m`, `S`, `M`, `H`), with
//! ten/hundred multiples of a unit expressed by zero-padding the digit
//! field. Encoding picks the coarsest unit that loses no precision and
//! always rounds up, so a decoded deadline is never earlier than the one
//! that was encoded.

use crate::time::Duration;

const SECONDS_PER_MINUTE: i64 = 60;
const MINUTES_PER_HOUR: i64 = 60;
/// Ceiling on the encodable range; roughly three years, effectively forever
/// for an RPC deadline.
const MAX_HOURS: u16 = 27000;

#[inline]
fn divide_rounding_up(dividend: i64, divisor: i64) -> i64 {
    (dividend - 1 + divisor) / divisor
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Unit {
    Nanoseconds,
    Milliseconds,
    TenMilliseconds,
    HundredMilliseconds,
    Seconds,
    TenSeconds,
    HundredSeconds,
    Minutes,
    TenMinutes,
    HundredMinutes,
    Hours,
}

/// A duration reduced to the `(value, unit)` form used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    value: u16,
    unit: Unit,
}

impl Timeout {
    pub fn from_duration(duration: Duration) -> Timeout {
        Timeout::from_millis(duration.as_millis())
    }

    /// Render the wire form. At most eight bytes.
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(8);
        out.push_str(&self.value.to_string());
        out.push_str(match self.unit {
            Unit::Nanoseconds => "n",
            Unit::Milliseconds => "m",
            Unit::TenMilliseconds => "0m",
            Unit::HundredMilliseconds => "00m",
            Unit::Seconds => "S",
            Unit::TenSeconds => "0S",
            Unit::HundredSeconds => "00S",
            Unit::Minutes => "M",
            Unit::TenMinutes => "0M",
            Unit::HundredMinutes => "00M",
            Unit::Hours => "H",
        });
        out
    }

    /// The duration this wire form stands for.
    pub fn as_duration(&self) -> Duration {
        let value = i64::from(self.value);
        match self.unit {
            Unit::Nanoseconds => Duration::ZERO,
            Unit::Milliseconds => Duration::from_millis(value),
            Unit::TenMilliseconds => Duration::from_millis(value * 10),
            Unit::HundredMilliseconds => Duration::from_millis(value * 100),
            Unit::Seconds => Duration::from_secs(value),
            Unit::TenSeconds => Duration::from_secs(value * 10),
            Unit::HundredSeconds => Duration::from_secs(value * 100),
            Unit::Minutes => Duration::from_minutes(value),
            Unit::TenMinutes => Duration::from_minutes(value * 10),
            Unit::HundredMinutes => Duration::from_minutes(value * 100),
            Unit::Hours => Duration::from_hours(value),
        }
    }

    /// Computes `100 * ((self - other) / other)`: the percentage by which
    /// this timeout overshoots `other`. Used by tests to bound the rounding
    /// error the encoding introduces.
    pub fn ratio_versus(&self, other: Timeout) -> f64 {
        let a = self.as_duration().as_millis() as f64;
        let b = other.as_duration().as_millis() as f64;
        if b == 0.0 {
            if a > 0.0 {
                return 100.0;
            }
            if a < 0.0 {
                return -100.0;
            }
            return 0.0;
        }
        100.0 * (a / b - 1.0)
    }

    fn new(value: i64, unit: Unit) -> Timeout {
        debug_assert!(value >= 0 && value <= i64::from(u16::MAX));
        Timeout {
            value: value as u16,
            unit,
        }
    }

    fn from_millis(millis: i64) -> Timeout {
        if millis <= 0 {
            return Timeout::new(1, Unit::Nanoseconds);
        }
        if millis < 1000 {
            return Timeout::new(millis, Unit::Milliseconds);
        }
        if millis < 10_000 {
            let value = divide_rounding_up(millis, 10);
            if value % 100 != 0 {
                return Timeout::new(value, Unit::TenMilliseconds);
            }
        } else if millis < 100_000 {
            let value = divide_rounding_up(millis, 100);
            if value % 10 != 0 {
                return Timeout::new(value, Unit::HundredMilliseconds);
            }
        } else if millis > i64::MAX - 999 {
            // prevent signed integer overflow further down the ladder
            return Timeout::new(i64::from(MAX_HOURS), Unit::Hours);
        }
        Timeout::from_seconds(divide_rounding_up(millis, 1000))
    }

    fn from_seconds(seconds: i64) -> Timeout {
        debug_assert!(seconds != 0);
        if seconds < 1000 {
            if seconds % SECONDS_PER_MINUTE != 0 {
                return Timeout::new(seconds, Unit::Seconds);
            }
        } else if seconds < 10_000 {
            let value = divide_rounding_up(seconds, 10);
            if (value * 10) % SECONDS_PER_MINUTE != 0 {
                return Timeout::new(value, Unit::TenSeconds);
            }
        } else if seconds < 100_000 {
            let value = divide_rounding_up(seconds, 100);
            if (value * 100) % SECONDS_PER_MINUTE != 0 {
                return Timeout::new(value, Unit::HundredSeconds);
            }
        }
        Timeout::from_minutes(divide_rounding_up(seconds, SECONDS_PER_MINUTE))
    }

    fn from_minutes(minutes: i64) -> Timeout {
        debug_assert!(minutes != 0);
        if minutes < 1000 {
            if minutes % MINUTES_PER_HOUR != 0 {
                return Timeout::new(minutes, Unit::Minutes);
            }
        } else if minutes < 10_000 {
            let value = divide_rounding_up(minutes, 10);
            if (value * 10) % MINUTES_PER_HOUR != 0 {
                return Timeout::new(value, Unit::TenMinutes);
            }
        } else if minutes < 100_000 {
            let value = divide_rounding_up(minutes, 100);
            if (value * 100) % MINUTES_PER_HOUR != 0 {
                return Timeout::new(value, Unit::HundredMinutes);
            }
        }
        Timeout::from_hours(divide_rounding_up(minutes, MINUTES_PER_HOUR))
    }

    fn from_hours(hours: i64) -> Timeout {
        debug_assert!(hours != 0);
        if hours < i64::from(MAX_HOURS) {
            return Timeout::new(hours, Unit::Hours);
        }
        Timeout::new(i64::from(MAX_HOURS), Unit::Hours)
    }
}

/// Decode a grpc-timeout wire string.
///
/// Accepts `[spaces][digits][spaces][unit][spaces]` with unit one of
/// `n u m S M H`. The wire spec allows at most eight digits; values at or
/// above 10^8 (beyond the one tolerated trailing zero) decode as an
/// infinite duration. Any other deviation yields `None`.
pub fn parse_timeout(text: &str) -> Option<Duration> {
    let bytes = text.as_bytes();
    let mut p = 0;
    // skip whitespace
    while p < bytes.len() && bytes[p] == b' ' {
        p += 1;
    }
    // decode numeric part
    let mut x: i64 = 0;
    let mut have_digit = false;
    while p < bytes.len() && bytes[p].is_ascii_digit() {
        let digit = i64::from(bytes[p] - b'0');
        have_digit = true;
        if x >= 100_000_000 {
            if x != 100_000_000 || digit != 0 {
                return Some(Duration::INFINITY);
            }
        }
        x = x * 10 + digit;
        p += 1;
    }
    if !have_digit {
        return None;
    }
    // skip whitespace
    while p < bytes.len() && bytes[p] == b' ' {
        p += 1;
    }
    if p == bytes.len() {
        return None;
    }
    // decode unit specifier
    let timeout = match bytes[p] {
        b'n' => Duration::from_millis(x / 1_000_000 + i64::from(x % 1_000_000 != 0)),
        b'u' => Duration::from_millis(x / 1_000 + i64::from(x % 1_000 != 0)),
        b'm' => Duration::from_millis(x),
        b'S' => Duration::from_secs(x),
        b'M' => Duration::from_minutes(x),
        b'H' => Duration::from_hours(x),
        _ => return None,
    };
    p += 1;
    while p < bytes.len() {
        if bytes[p] != b' ' {
            return None;
        }
        p += 1;
    }
    Some(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode_millis(millis: i64) -> String {
        Timeout::from_duration(Duration::from_millis(millis)).encode()
    }

    #[test]
    fn test_encode_small_millis() {
        assert_eq!(encode_millis(1), "1m");
        assert_eq!(encode_millis(100), "100m");
        assert_eq!(encode_millis(999), "999m");
    }

    #[test]
    fn test_encode_unit_ladder() {
        assert_eq!(encode_millis(1000), "1S");
        assert_eq!(encode_millis(2500), "2500m");
        assert_eq!(encode_millis(59_900), "59900m");
        assert_eq!(encode_millis(60_000), "1M");
        assert_eq!(encode_millis(3_600_000), "1H");
    }

    #[test]
    fn test_encode_rounds_up() {
        // 1001ms does not fit the millisecond field, so it becomes 101
        // ten-millisecond units.
        assert_eq!(encode_millis(1001), "1010m");
        assert_eq!(encode_millis(100_001), "101S");
    }

    #[test]
    fn test_encode_non_positive() {
        assert_eq!(encode_millis(0), "1n");
        assert_eq!(encode_millis(-5), "1n");
    }

    #[test]
    fn test_encode_saturates() {
        assert_eq!(
            Timeout::from_duration(Duration::INFINITY).encode(),
            "27000H"
        );
    }

    #[test]
    fn test_encode_at_most_eight_bytes() {
        for millis in [
            1, 999, 1001, 9999, 99_999, 100_001, 999_999, 59_999_999, 1 << 40, i64::MAX,
        ] {
            assert!(encode_millis(millis).len() <= 8, "millis={millis}");
        }
    }

    #[test]
    fn test_parse_basic() {
        assert_eq!(parse_timeout("1m"), Some(Duration::from_millis(1)));
        assert_eq!(parse_timeout("10S"), Some(Duration::from_secs(10)));
        assert_eq!(parse_timeout("3M"), Some(Duration::from_minutes(3)));
        assert_eq!(parse_timeout("2H"), Some(Duration::from_hours(2)));
    }

    #[test]
    fn test_parse_sub_millisecond_rounds_up() {
        assert_eq!(parse_timeout("1n"), Some(Duration::from_millis(1)));
        assert_eq!(parse_timeout("1000000n"), Some(Duration::from_millis(1)));
        assert_eq!(parse_timeout("1000001n"), Some(Duration::from_millis(2)));
        assert_eq!(parse_timeout("1500u"), Some(Duration::from_millis(2)));
    }

    #[test]
    fn test_parse_whitespace() {
        assert_eq!(parse_timeout("  5S "), Some(Duration::from_secs(5)));
        assert_eq!(parse_timeout("5 S"), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert_eq!(parse_timeout(""), None);
        assert_eq!(parse_timeout("   "), None);
        assert_eq!(parse_timeout("5"), None);
        assert_eq!(parse_timeout("S"), None);
        assert_eq!(parse_timeout("-5S"), None);
        assert_eq!(parse_timeout("5x"), None);
        assert_eq!(parse_timeout("5S junk"), None);
        assert_eq!(parse_timeout("5\u{00a0}S"), None);
    }

    #[test]
    fn test_ratio_versus() {
        let exact = Timeout::from_duration(Duration::from_secs(10));
        let double = Timeout::from_duration(Duration::from_secs(20));
        assert_eq!(exact.ratio_versus(exact), 0.0);
        assert_eq!(double.ratio_versus(exact), 100.0);
        let zero = Timeout::from_duration(Duration::ZERO);
        assert_eq!(exact.ratio_versus(zero), 100.0);
    }

    #[test]
    fn test_parse_huge_values_are_infinite() {
        assert_eq!(parse_timeout("1000000001S"), Some(Duration::INFINITY));
        assert_eq!(parse_timeout("999999999H"), Some(Duration::INFINITY));
        // The one tolerated value past the 8-digit cap.
        assert_eq!(
            parse_timeout("1000000000S"),
            Some(Duration::from_secs(1_000_000_000))
        );
    }

    #[test]
    fn test_decode_then_encode_normalizes() {
        for (wire, normalized) in [
            ("  1S ", "1S"),
            ("090S", "90S"),
            ("120S", "2M"),
            ("3600S", "1H"),
            ("2500m", "2500m"),
        ] {
            let decoded = parse_timeout(wire).unwrap();
            assert_eq!(Timeout::from_duration(decoded).encode(), normalized);
        }
    }

    proptest! {
        #[test]
        // Bounded below the 27000-hour saturation point, where the
        // round-trip stops being monotone by design.
        fn prop_roundtrip_never_shrinks(millis in 1i64..90_000_000_000) {
            let encoded = Timeout::from_duration(Duration::from_millis(millis)).encode();
            let decoded = parse_timeout(&encoded).unwrap();
            prop_assert!(decoded >= Duration::from_millis(millis));
            // Rounding error is bounded by the chosen unit: exact below one
            // second, and within 10% overall.
            if millis < 1000 {
                prop_assert_eq!(decoded.as_millis(), millis);
            } else {
                let skew = (decoded.as_millis() - millis) as f64 / millis as f64;
                prop_assert!(skew <= 0.10, "skew {}% for {}ms", skew * 100.0, millis);
            }
        }

        #[test]
        fn prop_encode_fits_wire_field(millis in i64::MIN..i64::MAX) {
            prop_assert!(encode_millis(millis).len() <= 8);
        }
    }
}
