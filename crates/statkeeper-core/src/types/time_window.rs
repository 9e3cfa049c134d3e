//! Maintenance time window.

use std::fmt;

use chrono::{DateTime, FixedOffset, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::result::AppResult;

/// A time-of-day range during which background refresh may be dispatched.
///
/// Bounds are stored as UTC time-of-day:
/// - `start == end` means the window is always open.
/// - `start < end` is the half-open range `[start, end)`.
/// - `start > end` wraps past midnight: `now >= start || now < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Inclusive start.
    start: NaiveTime,
    /// Exclusive end.
    end: NaiveTime,
}

impl TimeWindow {
    /// Create a window from two UTC times of day.
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    /// A window with no restriction.
    pub fn always() -> Self {
        Self::new(NaiveTime::MIN, NaiveTime::MIN)
    }

    /// Parse a window from two `"HH:MM"` or `"HH:MM +ZZZZ"` bounds.
    ///
    /// Each bound is converted from its own offset to UTC.
    pub fn parse(start: &str, end: &str) -> AppResult<Self> {
        Ok(Self::new(parse_bound(start)?, parse_bound(end)?))
    }

    /// Inclusive start (UTC).
    pub fn start(&self) -> NaiveTime {
        self.start
    }

    /// Exclusive end (UTC).
    pub fn end(&self) -> NaiveTime {
        self.end
    }

    /// Whether the window places no restriction at all.
    pub fn is_always_open(&self) -> bool {
        self.start == self.end
    }

    /// Whether maintenance is permitted at the given UTC time of day.
    pub fn contains(&self, now: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= now && now < self.end
        } else {
            now >= self.start || now < self.end
        }
    }

    /// Whether maintenance is permitted at the given instant.
    pub fn contains_instant(&self, now: DateTime<Utc>) -> bool {
        self.contains(now.time())
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02}:{:02}-{:02}:{:02} UTC",
            self.start.hour(),
            self.start.minute(),
            self.end.hour(),
            self.end.minute()
        )
    }
}

/// Parse `"HH:MM"` (UTC) or `"HH:MM +ZZZZ"` into a UTC time of day.
fn parse_bound(raw: &str) -> AppResult<NaiveTime> {
    let trimmed = raw.trim();
    let mut parts = trimmed.split_whitespace();
    let time_part = parts
        .next()
        .ok_or_else(|| AppError::configuration("Empty window bound"))?;
    let offset_part = parts.next();
    if parts.next().is_some() {
        return Err(AppError::configuration(format!(
            "Invalid window bound '{raw}': expected 'HH:MM' or 'HH:MM +ZZZZ'"
        )));
    }

    let local = NaiveTime::parse_from_str(time_part, "%H:%M").map_err(|e| {
        AppError::with_source(
            crate::error::ErrorKind::Configuration,
            format!("Invalid window time '{time_part}'"),
            e,
        )
    })?;

    let offset = match offset_part {
        Some(offset) => parse_offset(offset)?,
        None => return Ok(local),
    };

    // `local - offset` is UTC; NaiveTime arithmetic wraps around midnight.
    let seconds = i64::from(offset.local_minus_utc());
    Ok(local - chrono::Duration::seconds(seconds))
}

fn parse_offset(raw: &str) -> AppResult<FixedOffset> {
    let invalid = || AppError::configuration(format!("Invalid window offset '{raw}'"));

    let (sign, digits) = match raw.as_bytes().first() {
        Some(b'+') => (1, &raw[1..]),
        Some(b'-') => (-1, &raw[1..]),
        _ => return Err(invalid()),
    };
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| invalid())?;
    let minutes: i32 = digits[2..].parse().map_err(|_| invalid())?;
    if minutes >= 60 {
        return Err(invalid());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
