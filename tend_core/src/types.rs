//! Core domain types for the Tend reminder system.
//!
//! This module defines the fundamental types used throughout the system:
//! - Reminder subjects (medications, appointments)
//! - Time-of-day and weekday values used by recurrence rules
//! - Triggers, their identifiers and lifecycle states
//! - Notification payloads handed to the sink

use crate::rule::RecurrenceRule;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Stable identifier of a reminder subject. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(Uuid);

impl SubjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SubjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SubjectId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SubjectId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|e| Error::Other(format!("Invalid subject id '{}': {}", s, e)))
    }
}

/// Calendar day plus time slot a trigger belongs to.
///
/// Keyed by the slot's clock time rather than its position in the rule's
/// time set, so adding a time never renames the existing slots.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OccurrenceKey {
    pub date: NaiveDate,
    pub slot: TimeOfDay,
}

impl fmt::Display for OccurrenceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}T{}", self.date.format("%Y-%m-%d"), self.slot)
    }
}

/// Deterministic trigger identifier: `<subject id>/<occurrence key>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerId(String);

impl TriggerId {
    pub fn derive(subject_id: SubjectId, key: &OccurrenceKey) -> Self {
        Self(format!("{}/{}", subject_id, key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The subject part of the identifier, if well-formed
    pub fn subject_id(&self) -> Option<SubjectId> {
        self.0.split('/').next()?.parse().ok()
    }
}

impl fmt::Display for TriggerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TriggerId {
    fn from(s: &str) -> Self {
        Self(s.trim().to_string())
    }
}

// ============================================================================
// Calendar Values
// ============================================================================

/// A wall-clock time with minute precision
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Result<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0)
            .map(Self)
            .ok_or_else(|| Error::InvalidRule(format!("{:02}:{:02} is not a valid time", hour, minute)))
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        // Seconds are dropped; slots are minute-granular
        Self(t.with_second(0).and_then(|t| t.with_nanosecond(0)).unwrap_or(t))
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%H:%M"))
    }
}

impl FromStr for TimeOfDay {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map(Self)
            .map_err(|_| Error::InvalidRule(format!("'{}' is not a HH:MM time", s)))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Day of week, ordered Monday first
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl From<chrono::Weekday> for Weekday {
    fn from(day: chrono::Weekday) -> Self {
        match day {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl FromStr for Weekday {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mon" | "monday" => Ok(Weekday::Monday),
            "tue" | "tues" | "tuesday" => Ok(Weekday::Tuesday),
            "wed" | "wednesday" => Ok(Weekday::Wednesday),
            "thu" | "thurs" | "thursday" => Ok(Weekday::Thursday),
            "fri" | "friday" => Ok(Weekday::Friday),
            "sat" | "saturday" => Ok(Weekday::Saturday),
            "sun" | "sunday" => Ok(Weekday::Sunday),
            other => Err(Error::InvalidRule(format!("Unknown weekday: {}", other))),
        }
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// What a subject reminds the user about
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectKind {
    Medication,
    Appointment,
}

/// Preset lead times offered when setting up an appointment reminder
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadTimePreset {
    None,
    TenMinutes,
    ThirtyMinutes,
    OneHour,
    TwoHours,
    OneDay,
}

impl LeadTimePreset {
    pub fn minutes(&self) -> i64 {
        match self {
            LeadTimePreset::None => 0,
            LeadTimePreset::TenMinutes => 10,
            LeadTimePreset::ThirtyMinutes => 30,
            LeadTimePreset::OneHour => 60,
            LeadTimePreset::TwoHours => 120,
            LeadTimePreset::OneDay => 24 * 60,
        }
    }
}

impl FromStr for LeadTimePreset {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "none" | "0" => Ok(LeadTimePreset::None),
            "10m" => Ok(LeadTimePreset::TenMinutes),
            "30m" => Ok(LeadTimePreset::ThirtyMinutes),
            "1h" => Ok(LeadTimePreset::OneHour),
            "2h" => Ok(LeadTimePreset::TwoHours),
            "1d" => Ok(LeadTimePreset::OneDay),
            other => Err(Error::InvalidRule(format!(
                "Unknown lead time '{}' (expected none, 10m, 30m, 1h, 2h, 1d)",
                other
            ))),
        }
    }
}

/// Longest lead time a subject may carry
pub const MAX_LEAD_MINUTES: i64 = 366 * 24 * 60;

/// One medication or appointment the user wants reminding about
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReminderSubject {
    pub id: SubjectId,
    pub kind: SubjectKind,
    pub name: String,
    /// Dosage for medications, type or location for appointments
    #[serde(default)]
    pub detail: Option<String>,
    pub rule: RecurrenceRule,
    #[serde(default)]
    pub lead_time_minutes: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl ReminderSubject {
    /// Build a new, enabled subject. Validation happens when it is stored.
    pub fn new(kind: SubjectKind, name: impl Into<String>, rule: RecurrenceRule) -> Self {
        Self {
            id: SubjectId::new(),
            kind,
            name: name.into(),
            detail: None,
            rule,
            lead_time_minutes: 0,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    pub fn medication(name: impl Into<String>, rule: RecurrenceRule) -> Self {
        Self::new(SubjectKind::Medication, name, rule)
    }

    pub fn appointment(name: impl Into<String>, rule: RecurrenceRule) -> Self {
        Self::new(SubjectKind::Appointment, name, rule)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_lead_time(mut self, minutes: i64) -> Self {
        self.lead_time_minutes = minutes;
        self
    }

    pub fn lead_time(&self) -> Result<Duration> {
        Duration::try_minutes(self.lead_time_minutes).ok_or_else(|| {
            Error::InvalidRule(format!(
                "lead time of {} minutes is out of range",
                self.lead_time_minutes
            ))
        })
    }

    /// Reject subjects that could never be stored
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidRule("subject name must not be empty".into()));
        }
        if self.lead_time_minutes < 0 {
            return Err(Error::InvalidRule(format!(
                "lead time must not be negative (got {} minutes)",
                self.lead_time_minutes
            )));
        }
        if self.lead_time_minutes > MAX_LEAD_MINUTES {
            return Err(Error::InvalidRule(format!(
                "lead time must be at most {} days (got {} minutes)",
                MAX_LEAD_MINUTES / (24 * 60),
                self.lead_time_minutes
            )));
        }
        self.rule.validate()
    }

    /// Notification content for this subject's triggers
    pub fn payload(&self, style: NotificationStyle) -> NotificationPayload {
        match self.kind {
            SubjectKind::Medication => NotificationPayload {
                title: "Medication Reminder".into(),
                body: match &self.detail {
                    Some(dosage) => format!("Time to take your {} ({})", self.name, dosage),
                    None => format!("Time to take your {}", self.name),
                },
                category: "MEDICATION_REMINDER".into(),
                style,
            },
            SubjectKind::Appointment => {
                let name = match &self.detail {
                    Some(kind) => format!("{} - {}", self.name, kind),
                    None => self.name.clone(),
                };
                NotificationPayload {
                    title: "Appointment Reminder".into(),
                    body: if self.lead_time_minutes > 0 {
                        format!("{} in {}", name, describe_minutes(self.lead_time_minutes))
                    } else {
                        format!("{} is starting now", name)
                    },
                    category: "APPOINTMENT_REMINDER".into(),
                    style,
                }
            }
        }
    }
}

fn describe_minutes(minutes: i64) -> String {
    match minutes {
        m if m % (24 * 60) == 0 => plural(m / (24 * 60), "day"),
        m if m % 60 == 0 => plural(m / 60, "hour"),
        m => plural(m, "minute"),
    }
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", n, unit)
    }
}

// ============================================================================
// Notifications
// ============================================================================

/// How loudly the sink should deliver a notification
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStyle {
    /// Default sound
    #[default]
    Regular,
    /// No sound
    Gentle,
    /// Critical alert sound
    Urgent,
}

/// Content handed to the notification sink
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub category: String,
    pub style: NotificationStyle,
}

// ============================================================================
// Triggers
// ============================================================================

/// Lifecycle state of a trigger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerState {
    Scheduled,
    Fired,
    Acknowledged,
    Missed,
    Cancelled,
}

impl TriggerState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TriggerState::Acknowledged | TriggerState::Missed | TriggerState::Cancelled
        )
    }
}

impl fmt::Display for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TriggerState::Scheduled => "scheduled",
            TriggerState::Fired => "fired",
            TriggerState::Acknowledged => "acknowledged",
            TriggerState::Missed => "missed",
            TriggerState::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// One concrete firing of a subject's rule
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    pub id: TriggerId,
    pub subject_id: SubjectId,
    pub kind: SubjectKind,
    pub firing_instant: DateTime<Utc>,
    pub payload: NotificationPayload,
    pub state: TriggerState,
    /// Whether the sink currently holds this trigger
    #[serde(default)]
    pub registered: bool,
    #[serde(default)]
    pub fired_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Trigger {
    /// A freshly expanded trigger, not yet handed to the sink
    pub fn scheduled(
        subject: &ReminderSubject,
        key: &OccurrenceKey,
        firing_instant: DateTime<Utc>,
        style: NotificationStyle,
    ) -> Self {
        Self {
            id: TriggerId::derive(subject.id, key),
            subject_id: subject.id,
            kind: subject.kind,
            firing_instant,
            payload: subject.payload(style),
            state: TriggerState::Scheduled,
            registered: false,
            fired_at: None,
            resolved_at: None,
        }
    }

    /// Same registration as `other`: identical instant and content
    pub fn same_registration(&self, other: &Trigger) -> bool {
        self.firing_instant == other.firing_instant && self.payload == other.payload
    }
}
