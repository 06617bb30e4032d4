//! Time source and duration text
//!
//! Durations travel through the system as whole seconds. Operators type them as
//! a magnitude followed by a single unit suffix (`30s`, `10m`, `2h`, `7d`), and
//! subjects read them back in the `1d 2h 3m 4s` form.

use chrono::{DateTime, TimeDelta, Utc};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;

/// Source of the current instant
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Clones share the same instant.
#[derive(Debug, Clone)]
pub struct ManualClock {
    millis: Arc<AtomicI64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            millis: Arc::new(AtomicI64::new(start.timestamp_millis())),
        }
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        self.millis
            .store(instant.timestamp_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, seconds: i64) {
        self.millis
            .fetch_add(seconds.saturating_mul(1000), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

/// Reasons a duration string is rejected
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Duration is empty")]
    Empty,

    #[error("Duration '{0}' has no unit suffix")]
    MissingUnit(String),

    #[error("Unknown duration unit '{0}'")]
    UnknownUnit(char),

    #[error("Duration magnitude '{0}' is not a number")]
    InvalidMagnitude(String),

    #[error("Duration must be positive, got {0}")]
    NotPositive(i64),

    #[error("Duration is too large")]
    Overflow,
}

/// Parse `<integer><unit>` into seconds.
///
/// Units are `s`, `m`, `h` and `d`, lowercase only. Surrounding whitespace is
/// ignored. Zero and negative magnitudes are rejected.
///
/// # Errors
///
/// Returns a `ParseError` describing the first problem found.
pub fn parse(text: &str) -> Result<i64, ParseError> {
    let text = text.trim();
    let Some(unit) = text.chars().last() else {
        return Err(ParseError::Empty);
    };

    let multiplier = match unit {
        's' => 1,
        'm' => MINUTE,
        'h' => HOUR,
        'd' => DAY,
        c if c.is_ascii_digit() => return Err(ParseError::MissingUnit(text.to_string())),
        c => return Err(ParseError::UnknownUnit(c)),
    };

    let magnitude_text = &text[..text.len() - unit.len_utf8()];
    if magnitude_text.is_empty() {
        return Err(ParseError::InvalidMagnitude(String::new()));
    }
    if magnitude_text.starts_with('+') {
        return Err(ParseError::InvalidMagnitude(magnitude_text.to_string()));
    }
    let magnitude: i64 = magnitude_text
        .parse()
        .map_err(|_| ParseError::InvalidMagnitude(magnitude_text.to_string()))?;

    if magnitude <= 0 {
        return Err(ParseError::NotPositive(magnitude));
    }

    magnitude
        .checked_mul(multiplier)
        .ok_or(ParseError::Overflow)
}

/// Render seconds as `1d 2h 3m 4s`, largest unit first, zero units omitted.
///
/// Non-positive input renders as the empty string.
#[must_use]
pub fn format(seconds: i64) -> String {
    if seconds <= 0 {
        return String::new();
    }

    let parts = [
        (seconds / DAY, 'd'),
        (seconds % DAY / HOUR, 'h'),
        (seconds % HOUR / MINUTE, 'm'),
        (seconds % MINUTE, 's'),
    ];

    parts
        .iter()
        .filter(|(value, _)| *value > 0)
        .map(|(value, unit)| format!("{value}{unit}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// `start + seconds`, or `None` when the result does not fit.
#[must_use]
pub fn add_seconds(start: DateTime<Utc>, seconds: i64) -> Option<DateTime<Utc>> {
    TimeDelta::try_seconds(seconds).and_then(|delta| start.checked_add_signed(delta))
}

/// Seconds left until `end`, rounded up so a live record never reads as 0.
///
/// Never negative.
#[must_use]
pub fn remaining_seconds(now: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let millis = (end - now).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    millis / 1000 + i64::from(millis % 1000 != 0)
}
