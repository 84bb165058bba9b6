//! Recurrence rules: the declarative schedule attached to every subject.

use crate::types::{TimeOfDay, Weekday};
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// When a subject's reminders fire
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecurrenceRule {
    /// Every calendar day at each listed time
    Daily { times: BTreeSet<TimeOfDay> },

    /// Only on the listed weekdays
    Weekly {
        days: BTreeSet<Weekday>,
        times: BTreeSet<TimeOfDay>,
    },

    /// Every `every_n_days` days counted from `anchor_date`
    Interval {
        every_n_days: i64,
        anchor_date: NaiveDate,
        times: BTreeSet<TimeOfDay>,
    },

    /// On one day of each month, clamped to the month's last day
    Monthly {
        day_of_month: u32,
        times: BTreeSet<TimeOfDay>,
    },

    /// Exactly once, `lead time` before `instant`
    OneTime { instant: DateTime<Utc> },
}

impl RecurrenceRule {
    pub fn daily(times: impl IntoIterator<Item = TimeOfDay>) -> Result<Self> {
        let rule = RecurrenceRule::Daily {
            times: times.into_iter().collect(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn weekly(
        days: impl IntoIterator<Item = Weekday>,
        times: impl IntoIterator<Item = TimeOfDay>,
    ) -> Result<Self> {
        let rule = RecurrenceRule::Weekly {
            days: days.into_iter().collect(),
            times: times.into_iter().collect(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn interval(
        every_n_days: i64,
        anchor_date: NaiveDate,
        times: impl IntoIterator<Item = TimeOfDay>,
    ) -> Result<Self> {
        let rule = RecurrenceRule::Interval {
            every_n_days,
            anchor_date,
            times: times.into_iter().collect(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn monthly(day_of_month: u32, times: impl IntoIterator<Item = TimeOfDay>) -> Result<Self> {
        let rule = RecurrenceRule::Monthly {
            day_of_month,
            times: times.into_iter().collect(),
        };
        rule.validate()?;
        Ok(rule)
    }

    pub fn one_time(instant: DateTime<Utc>) -> Self {
        RecurrenceRule::OneTime { instant }
    }

    /// Check the rule's invariants.
    ///
    /// Rules deserialized from disk bypass the constructors, so the store
    /// calls this again before accepting a subject.
    pub fn validate(&self) -> Result<()> {
        if let Some(times) = self.times() {
            if times.is_empty() {
                return Err(Error::InvalidRule(
                    "recurring rule needs at least one time of day".into(),
                ));
            }
        }

        match self {
            RecurrenceRule::Weekly { days, .. } if days.is_empty() => Err(Error::InvalidRule(
                "weekly rule needs at least one weekday".into(),
            )),
            RecurrenceRule::Interval { every_n_days, .. } if *every_n_days <= 0 => {
                Err(Error::InvalidRule(format!(
                    "interval must be a positive number of days (got {})",
                    every_n_days
                )))
            }
            RecurrenceRule::Monthly { day_of_month, .. } if !(1..=31).contains(day_of_month) => {
                Err(Error::InvalidRule(format!(
                    "day of month must be within 1..31 (got {})",
                    day_of_month
                )))
            }
            _ => Ok(()),
        }
    }

    /// Times of day for recurring rules; `None` for one-time rules
    pub fn times(&self) -> Option<&BTreeSet<TimeOfDay>> {
        match self {
            RecurrenceRule::Daily { times }
            | RecurrenceRule::Weekly { times, .. }
            | RecurrenceRule::Interval { times, .. }
            | RecurrenceRule::Monthly { times, .. } => Some(times),
            RecurrenceRule::OneTime { .. } => None,
        }
    }

    /// Replace the times of a recurring rule, keeping the rest
    pub fn with_times(&self, new_times: BTreeSet<TimeOfDay>) -> Result<Self> {
        let rule = match self {
            RecurrenceRule::Daily { .. } => RecurrenceRule::Daily { times: new_times },
            RecurrenceRule::Weekly { days, .. } => RecurrenceRule::Weekly {
                days: days.clone(),
                times: new_times,
            },
            RecurrenceRule::Interval {
                every_n_days,
                anchor_date,
                ..
            } => RecurrenceRule::Interval {
                every_n_days: *every_n_days,
                anchor_date: *anchor_date,
                times: new_times,
            },
            RecurrenceRule::Monthly { day_of_month, .. } => RecurrenceRule::Monthly {
                day_of_month: *day_of_month,
                times: new_times,
            },
            RecurrenceRule::OneTime { .. } => {
                return Err(Error::InvalidRule(
                    "one-time rules have no times of day".into(),
                ))
            }
        };
        rule.validate()?;
        Ok(rule)
    }

    /// Short human-readable description for listings
    pub fn describe(&self) -> String {
        let join_times = |times: &BTreeSet<TimeOfDay>| {
            times
                .iter()
                .map(|t| t.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        };

        match self {
            RecurrenceRule::Daily { times } => format!("daily at {}", join_times(times)),
            RecurrenceRule::Weekly { days, times } => format!(
                "every {} at {}",
                days.iter()
                    .map(|d| format!("{:?}", d))
                    .collect::<Vec<_>>()
                    .join("/"),
                join_times(times)
            ),
            RecurrenceRule::Interval {
                every_n_days,
                anchor_date,
                times,
            } => format!(
                "every {} days from {} at {}",
                every_n_days,
                anchor_date,
                join_times(times)
            ),
            RecurrenceRule::Monthly {
                day_of_month,
                times,
            } => format!("monthly on day {} at {}", day_of_month, join_times(times)),
            RecurrenceRule::OneTime { instant } => format!("once at {}", instant.to_rfc3339()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> TimeOfDay {
        s.parse().unwrap()
    }

    #[test]
    fn test_empty_times_rejected() {
        let err = RecurrenceRule::daily(Vec::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidRule(_)));
    }

    #[test]
    fn test_interval_must_be_positive() {
        let anchor = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(RecurrenceRule::interval(0, anchor, [t("07:00")]).is_err());
        assert!(RecurrenceRule::interval(-3, anchor, [t("07:00")]).is_err());
        assert!(RecurrenceRule::interval(3, anchor, [t("07:00")]).is_ok());
    }

    #[test]
    fn test_day_of_month_bounds() {
        assert!(RecurrenceRule::monthly(0, [t("12:00")]).is_err());
        assert!(RecurrenceRule::monthly(32, [t("12:00")]).is_err());
        assert!(RecurrenceRule::monthly(31, [t("12:00")]).is_ok());
    }

    #[test]
    fn test_weekly_needs_days() {
        assert!(RecurrenceRule::weekly(Vec::new(), [t("09:00")]).is_err());
    }

    #[test]
    fn test_deserialized_rule_still_validated() {
        let json = r#"{"type":"daily","times":[]}"#;
        let rule: RecurrenceRule = serde_json::from_str(json).unwrap();
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_with_times_keeps_shape() {
        let rule = RecurrenceRule::weekly([Weekday::Monday], [t("09:00")]).unwrap();
        let updated = rule
            .with_times([t("09:00"), t("18:00")].into_iter().collect())
            .unwrap();
        match updated {
            RecurrenceRule::Weekly { days, times } => {
                assert!(days.contains(&Weekday::Monday));
                assert_eq!(times.len(), 2);
            }
            other => panic!("unexpected rule {:?}", other),
        }
    }

    #[test]
    fn test_one_time_has_no_times() {
        let rule = RecurrenceRule::one_time(Utc::now());
        assert!(rule.times().is_none());
        assert!(rule.with_times(BTreeSet::new()).is_err());
        assert!(rule.validate().is_ok());
    }
}
