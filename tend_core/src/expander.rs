//! Recurrence expansion: rule + window -> concrete firing instants.
//!
//! Expansion is pure. It reads nothing but its inputs and the calendar
//! rules of the [`TimeSource`], so the same rule over the same window
//! always yields the same occurrences and the same occurrence keys.

use crate::rule::RecurrenceRule;
use crate::time::TimeSource;
use crate::types::{OccurrenceKey, TimeOfDay};
use crate::{Error, Result};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use std::collections::BTreeSet;

/// Longest window a single expansion may cover
pub const MAX_WINDOW_DAYS: i64 = 400;

/// Half-open window `[start, end)` of firing instants
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidWindow(format!(
                "start {} is after end {}",
                start, end
            )));
        }
        if end - start > Duration::days(MAX_WINDOW_DAYS) {
            return Err(Error::InvalidWindow(format!(
                "window spans more than {} days",
                MAX_WINDOW_DAYS
            )));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }
}

/// One expanded occurrence of a rule
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Occurrence {
    pub key: OccurrenceKey,
    /// When the medication is due / the appointment starts
    pub nominal: DateTime<Utc>,
    /// `nominal - lead_time`; what the sink is asked to fire at
    pub firing: DateTime<Utc>,
}

/// Expand `rule` into every occurrence whose firing instant lies in `window`.
///
/// Output is sorted ascending by firing instant with no two occurrences
/// sharing an instant.
pub fn expand(
    rule: &RecurrenceRule,
    lead_time: Duration,
    window: &Window,
    calendar: &dyn TimeSource,
) -> Result<Vec<Occurrence>> {
    let mut out = Vec::new();

    if let RecurrenceRule::OneTime { instant } = rule {
        let firing = instant
            .checked_sub_signed(lead_time)
            .ok_or_else(|| Error::InvalidRule(format!("lead time moves {} out of range", instant)))?;
        if window.contains(firing) {
            let local = instant.with_timezone(&calendar.timezone());
            out.push(Occurrence {
                key: OccurrenceKey {
                    date: local.date_naive(),
                    slot: TimeOfDay::from(local.time()),
                },
                nominal: *instant,
                firing,
            });
        }
        return Ok(out);
    }

    // Nominal instants fall in [start + lead, end + lead); pad a day either
    // side so zone offsets can't push a candidate out of the scan.
    let shifted_start = window.start.checked_add_signed(lead_time);
    let shifted_end = window.end.checked_add_signed(lead_time);
    let (Some(shifted_start), Some(shifted_end)) = (shifted_start, shifted_end) else {
        return Err(Error::InvalidRule("lead time moves the window out of range".into()));
    };
    let first_day = calendar
        .local_date(shifted_start)
        .pred_opt()
        .ok_or_else(|| Error::InvalidWindow("window starts before the calendar".into()))?;
    let last_day = calendar
        .local_date(shifted_end)
        .succ_opt()
        .ok_or_else(|| Error::InvalidWindow("window ends after the calendar".into()))?;

    let mut push_day = |day: NaiveDate, times: &BTreeSet<TimeOfDay>| {
        for slot in times {
            let nominal = calendar.resolve_local(day, slot.as_naive());
            let Some(firing) = nominal.checked_sub_signed(lead_time) else {
                continue;
            };
            if window.contains(firing) {
                out.push(Occurrence {
                    key: OccurrenceKey { date: day, slot: *slot },
                    nominal,
                    firing,
                });
            }
        }
    };

    match rule {
        RecurrenceRule::Daily { times } => {
            for day in first_day.iter_days().take_while(|d| *d <= last_day) {
                push_day(day, times);
            }
        }

        RecurrenceRule::Weekly { days, times } => {
            for day in first_day.iter_days().take_while(|d| *d <= last_day) {
                if days.contains(&calendar.weekday(day)) {
                    push_day(day, times);
                }
            }
        }

        RecurrenceRule::Interval {
            every_n_days,
            anchor_date,
            times,
        } => {
            for day in first_day.iter_days().take_while(|d| *d <= last_day) {
                let since_anchor = (day - *anchor_date).num_days();
                // Nothing fires before the anchor
                if since_anchor >= 0 && since_anchor % every_n_days == 0 {
                    push_day(day, times);
                }
            }
        }

        RecurrenceRule::Monthly {
            day_of_month,
            times,
        } => {
            let mut month_start = first_day.with_day(1).ok_or_else(|| {
                Error::InvalidWindow(format!("no first day for month of {}", first_day))
            })?;
            while month_start <= last_day {
                let target_day = (*day_of_month).min(calendar.days_in_month(month_start));
                if let Some(day) = month_start.with_day(target_day) {
                    if day >= first_day && day <= last_day {
                        push_day(day, times);
                    }
                }
                month_start = match month_start.checked_add_months(chrono::Months::new(1)) {
                    Some(next) => next,
                    None => break,
                };
            }
        }

        RecurrenceRule::OneTime { .. } => {}
    }

    out.sort_by(|a, b| a.firing.cmp(&b.firing).then(a.key.cmp(&b.key)));
    // Two wall-clock slots can collapse onto one instant across a DST gap
    out.dedup_by(|later, earlier| later.firing == earlier.firing);

    Ok(out)
}
