//! Clock and calendar abstraction.
//!
//! All "now" lookups and wall-clock arithmetic go through [`TimeSource`] so
//! the expander and scheduler can run against a fixed clock in tests.
//! Times of day are applied in the source's timezone, recomputed per day.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use std::sync::Mutex;

use crate::types::Weekday;

/// Source of the current instant and of calendar rules
pub trait TimeSource: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// The single authoritative calendar
    fn timezone(&self) -> Tz;

    /// Calendar date of `instant` in this calendar
    fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        instant.with_timezone(&self.timezone()).date_naive()
    }

    /// Absolute instant for a wall-clock time on `date`.
    ///
    /// Ambiguous times (clocks going back) resolve to the earlier instant.
    /// Times skipped by a forward transition move forward by the gap.
    fn resolve_local(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        resolve_in(self.timezone(), date.and_time(time))
    }

    fn start_of_day(&self, date: NaiveDate) -> DateTime<Utc> {
        self.resolve_local(date, NaiveTime::MIN)
    }

    fn days_in_month(&self, date: NaiveDate) -> u32 {
        days_in_month(date.year(), date.month())
    }

    fn weekday(&self, date: NaiveDate) -> Weekday {
        date.weekday().into()
    }
}

fn resolve_in(tz: Tz, local: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Walk forward until we land past the gap; transitions are at most a few hours
            let mut probe = local;
            for _ in 0..4 {
                probe += Duration::hours(1);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            Utc.from_utc_datetime(&local)
        }
    }
}

/// Number of days in the given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// Wall clock in a fixed timezone
#[derive(Clone, Copy, Debug)]
pub struct SystemClock {
    tz: Tz,
}

impl SystemClock {
    pub fn new(tz: Tz) -> Self {
        Self { tz }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new(Tz::UTC)
    }
}

impl TimeSource for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}

/// Manually driven clock for tests and replays
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    tz: Tz,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self::with_timezone(now, Tz::UTC)
    }

    pub fn with_timezone(now: DateTime<Utc>, tz: Tz) -> Self {
        Self {
            now: Mutex::new(now),
            tz,
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl TimeSource for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn timezone(&self) -> Tz {
        self.tz
    }
}
