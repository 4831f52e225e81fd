//! Time source and timezone handling.
//!
//! All comparisons and storage use absolute UTC instants (epoch millis at the
//! store boundary). A [`DisplayTimezone`] is applied only when a time is shown
//! to a person, e.g. in notification text.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeDelta, TimeZone, Utc};

use crate::error::{DomainError, DomainResult};

/// Source of "now".
pub trait Clock: Send + Sync + core::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

impl<C> Clock for Arc<C>
where
    C: Clock + ?Sized,
{
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// Wall clock.
#[derive(Debug, Default, Copy, Clone)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock instant, truncated to whole millis so
    /// values survive a round-trip through the store unchanged.
    pub fn starting_now() -> Self {
        let now = Utc::now();
        Self::new(from_storage_millis(to_storage_millis(now)).unwrap_or(now))
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap() = at;
    }

    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Convert an instant into the storage representation (UTC epoch millis).
pub fn to_storage_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Convert a stored epoch-millis value back into an instant.
///
/// Returns `None` for values outside chrono's representable range.
pub fn from_storage_millis(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

/// Fixed display timezone for user-facing times.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DisplayTimezone {
    offset: FixedOffset,
}

impl DisplayTimezone {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    /// Build from an offset east of UTC, in minutes (e.g. `330` for +05:30).
    pub fn from_offset_minutes(minutes: i32) -> DomainResult<Self> {
        let offset = minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| DomainError::validation(format!("utc offset out of range: {minutes}m")))?;
        Ok(Self { offset })
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn to_local(&self, at: DateTime<Utc>) -> DateTime<FixedOffset> {
        at.with_timezone(&self.offset)
    }

    /// Interpret a local wall-clock time in this timezone as an absolute instant.
    pub fn local_to_utc(&self, local: NaiveDateTime) -> DomainResult<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|dt| dt.with_timezone(&Utc))
            .ok_or_else(|| DomainError::validation(format!("ambiguous local time: {local}")))
    }

    pub fn now_local(&self, clock: &dyn Clock) -> DateTime<FixedOffset> {
        self.to_local(clock.now())
    }

    /// Human-readable `HH:MM` in this timezone.
    pub fn format_time(&self, at: DateTime<Utc>) -> String {
        self.to_local(at).format("%H:%M").to_string()
    }
}

impl Default for DisplayTimezone {
    fn default() -> Self {
        Self::utc()
    }
}
