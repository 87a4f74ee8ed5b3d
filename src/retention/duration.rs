//! Retention duration strings.
//!
//! A duration is written as up to three `<integer><unit>` tokens with units
//! `d` (days), `h` (hours) and `m` (minutes). Each unit appears at most once and
//! units appear in descending order, with no whitespace:
//!
//! ```text
//! 7d      2d12h      1h30m      45m      1d0h30m
//! ```
//!
//! Components are kept exactly as written, so `48h` stays `48h` and does not
//! become `2d`. Formatting a parsed value reproduces a string that parses back
//! to the same components.

use std::{fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

const SECONDS_PER_MINUTE: u64 = 60;
const SECONDS_PER_HOUR: u64 = 60 * SECONDS_PER_MINUTE;
const SECONDS_PER_DAY: u64 = 24 * SECONDS_PER_HOUR;

/// A duration string that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid duration format '{input}': {kind}")]
pub struct DurationError {
    /// The text that was rejected.
    pub input: String,
    /// Why it was rejected.
    pub kind: DurationErrorKind,
}

/// The reason a duration string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DurationErrorKind {
    #[error("duration is empty")]
    Empty,

    #[error("expected a number (use e.g. '7d', '2d12h', '1h30m', '45m')")]
    MissingNumber,

    #[error("number has no unit (use d, h or m)")]
    MissingUnit,

    #[error("unknown unit '{0}' (use d, h or m)")]
    UnknownUnit(char),

    #[error("unit '{0}' appears more than once")]
    DuplicateUnit(char),

    #[error("unit '{0}' is out of order (write days, then hours, then minutes)")]
    OutOfOrder(char),

    #[error("value is too large")]
    Overflow,

    #[error("duration must be greater than zero")]
    Zero,
}

/// An elapsed-time value made of day, hour and minute components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RetentionDuration {
    days: u32,
    hours: u32,
    minutes: u32,
}

impl RetentionDuration {
    /// The zero duration. Never produced by parsing.
    pub const ZERO: Self = Self {
        days: 0,
        hours: 0,
        minutes: 0,
    };

    pub const fn new(days: u32, hours: u32, minutes: u32) -> Self {
        Self {
            days,
            hours,
            minutes,
        }
    }

    pub const fn days(days: u32) -> Self {
        Self::new(days, 0, 0)
    }

    pub const fn hours(hours: u32) -> Self {
        Self::new(0, hours, 0)
    }

    pub const fn minutes(minutes: u32) -> Self {
        Self::new(0, 0, minutes)
    }

    /// Parse a duration string such as `"7d"` or `"1h30m"`.
    ///
    /// A zero total is rejected: retention needs a positive window.
    pub fn parse(text: &str) -> Result<Self, DurationError> {
        let fail = |kind| DurationError {
            input: text.to_string(),
            kind,
        };

        if text.is_empty() {
            return Err(fail(DurationErrorKind::Empty));
        }

        let mut value = Self::ZERO;
        let mut last_rank: Option<u8> = None;
        let mut rest = text;

        while !rest.is_empty() {
            let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                return Err(fail(DurationErrorKind::MissingNumber));
            }

            let (number, tail) = rest.split_at(digits);
            let unit = tail
                .chars()
                .next()
                .ok_or_else(|| fail(DurationErrorKind::MissingUnit))?;
            let rank = match unit {
                'd' => 0,
                'h' => 1,
                'm' => 2,
                other => return Err(fail(DurationErrorKind::UnknownUnit(other))),
            };

            if let Some(previous) = last_rank {
                if rank == previous {
                    return Err(fail(DurationErrorKind::DuplicateUnit(unit)));
                }
                if rank < previous {
                    return Err(fail(DurationErrorKind::OutOfOrder(unit)));
                }
            }

            let amount: u32 = number
                .parse()
                .map_err(|_| fail(DurationErrorKind::Overflow))?;
            match rank {
                0 => value.days = amount,
                1 => value.hours = amount,
                _ => value.minutes = amount,
            }

            last_rank = Some(rank);
            rest = &tail[unit.len_utf8()..];
        }

        if value.is_zero() {
            return Err(fail(DurationErrorKind::Zero));
        }

        Ok(value)
    }

    /// Whether `text` is an acceptable duration string.
    pub fn validate(text: &str) -> bool {
        Self::parse(text).is_ok()
    }

    pub fn is_zero(&self) -> bool {
        self.total_seconds() == 0
    }

    pub fn day_component(&self) -> u32 {
        self.days
    }

    pub fn hour_component(&self) -> u32 {
        self.hours
    }

    pub fn minute_component(&self) -> u32 {
        self.minutes
    }

    /// Total length in seconds.
    pub fn total_seconds(&self) -> u64 {
        u64::from(self.days) * SECONDS_PER_DAY
            + u64::from(self.hours) * SECONDS_PER_HOUR
            + u64::from(self.minutes) * SECONDS_PER_MINUTE
    }

    pub fn to_std(&self) -> Duration {
        Duration::from_secs(self.total_seconds())
    }

    /// Convert to a chrono delta for timestamp arithmetic.
    ///
    /// Every representable value fits: three `u32` components stay far below
    /// chrono's millisecond range.
    pub fn to_chrono(&self) -> chrono::Duration {
        chrono::Duration::try_seconds(self.total_seconds() as i64)
            .unwrap_or(chrono::Duration::MAX)
    }

    /// Render as "2 days, 12 hours" for display.
    pub fn human_readable(&self) -> String {
        fn plural(n: u32, unit: &str) -> String {
            if n == 1 {
                format!("{n} {unit}")
            } else {
                format!("{n} {unit}s")
            }
        }

        let parts: Vec<String> = [
            (self.days, "day"),
            (self.hours, "hour"),
            (self.minutes, "minute"),
        ]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| plural(n, unit))
        .collect();

        if parts.is_empty() {
            "0 minutes".to_string()
        } else {
            parts.join(", ")
        }
    }
}

impl fmt::Display for RetentionDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0m");
        }
        if self.days > 0 {
            write!(f, "{}d", self.days)?;
        }
        if self.hours > 0 {
            write!(f, "{}h", self.hours)?;
        }
        if self.minutes > 0 {
            write!(f, "{}m", self.minutes)?;
        }
        Ok(())
    }
}

impl FromStr for RetentionDuration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for RetentionDuration {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for RetentionDuration {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Self::parse(&text).map_err(serde::de::Error::custom)
    }
}
