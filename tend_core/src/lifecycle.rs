//! Per-trigger lifecycle state machine.
//!
//! ```text
//! Scheduled -> Fired -> Acknowledged
//!                    -> Missed       (grace period elapsed)
//! Scheduled -> Cancelled
//! Fired     -> Cancelled
//! ```
//!
//! Acknowledged, Missed and Cancelled are terminal. Any transition asked of
//! a trigger that cannot take it is a no-op reported as [`Transition::Conflict`].

use crate::{Error, Result, SubjectId, SubjectKind, Trigger, TriggerId, TriggerState};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Outcome of a requested transition
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    Applied {
        from: TriggerState,
        to: TriggerState,
    },
    /// Benign no-op: the trigger was not in a state that allows this
    Conflict { state: TriggerState },
}

impl Transition {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// How long fired reminders wait for acknowledgment, and how long resolved
/// triggers are kept before being pruned
#[derive(Clone, Copy, Debug)]
pub struct GracePolicy {
    pub medication: Duration,
    pub appointment: Duration,
    pub retention: Duration,
}

impl GracePolicy {
    pub fn grace_for(&self, kind: SubjectKind) -> Duration {
        match kind {
            SubjectKind::Medication => self.medication,
            SubjectKind::Appointment => self.appointment,
        }
    }
}

impl Default for GracePolicy {
    fn default() -> Self {
        Self {
            medication: Duration::hours(2),
            appointment: Duration::hours(1),
            retention: Duration::days(7),
        }
    }
}

/// What a sweep changed
#[derive(Clone, Debug, Default)]
pub struct SweepReport {
    pub fired: Vec<TriggerId>,
    pub missed: Vec<TriggerId>,
    /// Due triggers the sink never held; they can no longer be delivered
    pub expired: Vec<TriggerId>,
    /// Resolved triggers removed from the active set
    pub pruned: Vec<Trigger>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.fired.is_empty()
            && self.missed.is_empty()
            && self.expired.is_empty()
            && self.pruned.is_empty()
    }
}

/// Owns the active trigger set and drives each trigger's state
#[derive(Clone, Debug, Default)]
pub struct LifecycleTracker {
    triggers: BTreeMap<TriggerId, Trigger>,
    policy: GracePolicy,
}

impl LifecycleTracker {
    pub fn new(policy: GracePolicy) -> Self {
        Self {
            triggers: BTreeMap::new(),
            policy,
        }
    }

    /// Restore a previously persisted trigger set
    pub fn with_triggers(policy: GracePolicy, triggers: Vec<Trigger>) -> Self {
        Self {
            triggers: triggers.into_iter().map(|t| (t.id.clone(), t)).collect(),
            policy,
        }
    }

    pub fn policy(&self) -> &GracePolicy {
        &self.policy
    }

    pub fn get(&self, id: &TriggerId) -> Option<&Trigger> {
        self.triggers.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Trigger> {
        self.triggers.values()
    }

    pub fn len(&self) -> usize {
        self.triggers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triggers.is_empty()
    }

    /// Put a fresh Scheduled trigger into the set, replacing any record
    /// with the same id
    pub fn insert_scheduled(&mut self, mut trigger: Trigger) {
        trigger.state = TriggerState::Scheduled;
        trigger.registered = false;
        trigger.fired_at = None;
        trigger.resolved_at = None;
        tracing::debug!("Tracking {} for {}", trigger.id, trigger.firing_instant);
        self.triggers.insert(trigger.id.clone(), trigger);
    }

    pub fn set_registered(&mut self, id: &TriggerId, registered: bool) {
        if let Some(trigger) = self.triggers.get_mut(id) {
            trigger.registered = registered;
        }
    }

    /// The sink delivered this trigger
    pub fn mark_fired(&mut self, id: &TriggerId, at: DateTime<Utc>) -> Result<Transition> {
        self.transition(id, TriggerState::Fired, at)
    }

    /// The user actioned the reminder
    pub fn acknowledge(&mut self, id: &TriggerId, at: DateTime<Utc>) -> Result<Transition> {
        self.transition(id, TriggerState::Acknowledged, at)
    }

    pub fn cancel(&mut self, id: &TriggerId, at: DateTime<Utc>) -> Result<Transition> {
        self.transition(id, TriggerState::Cancelled, at)
    }

    /// Cancel every live trigger of a subject. Returns the ids cancelled.
    pub fn cancel_subject(&mut self, subject_id: SubjectId, at: DateTime<Utc>) -> Vec<TriggerId> {
        let live: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| t.subject_id == subject_id && !t.state.is_terminal())
            .map(|t| t.id.clone())
            .collect();

        for id in &live {
            // Live triggers always accept cancellation
            let _ = self.transition(id, TriggerState::Cancelled, at);
        }

        if !live.is_empty() {
            tracing::info!("Cancelled {} triggers of subject {}", live.len(), subject_id);
        }
        live
    }

    fn transition(
        &mut self,
        id: &TriggerId,
        to: TriggerState,
        at: DateTime<Utc>,
    ) -> Result<Transition> {
        let trigger = self
            .triggers
            .get_mut(id)
            .ok_or_else(|| Error::TriggerNotFound(id.clone()))?;
        let from = trigger.state;

        let allowed = matches!(
            (from, to),
            (TriggerState::Scheduled, TriggerState::Fired)
                | (TriggerState::Fired, TriggerState::Acknowledged)
                | (TriggerState::Fired, TriggerState::Missed)
                | (TriggerState::Scheduled, TriggerState::Cancelled)
                | (TriggerState::Fired, TriggerState::Cancelled)
        );

        if !allowed {
            tracing::debug!("Ignoring {} -> {} for {}", from, to, id);
            return Ok(Transition::Conflict { state: from });
        }

        trigger.state = to;
        match to {
            TriggerState::Fired => {
                trigger.fired_at = Some(at);
                // Delivered: the sink no longer holds it as pending
                trigger.registered = false;
            }
            TriggerState::Acknowledged | TriggerState::Missed | TriggerState::Cancelled => {
                trigger.resolved_at = Some(at);
            }
            TriggerState::Scheduled => {}
        }

        tracing::debug!("Trigger {}: {} -> {}", id, from, to);
        Ok(Transition::Applied { from, to })
    }

    /// Time-driven transitions, evaluated against `now`:
    /// - registered Scheduled triggers whose instant has passed become Fired
    /// - unregistered ones past their instant are Cancelled (never deliverable)
    /// - Fired triggers past their grace period become Missed
    /// - terminal triggers resolved longer than the retention ago are pruned
    ///
    /// Cancelled triggers the sink still holds are kept until cancelled there.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        let policy = self.policy;

        let due: Vec<(TriggerId, bool, DateTime<Utc>)> = self
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Scheduled && t.firing_instant <= now)
            .map(|t| (t.id.clone(), t.registered, t.firing_instant))
            .collect();

        for (id, registered, firing_instant) in due {
            if registered {
                if let Ok(Transition::Applied { .. }) = self.transition(&id, TriggerState::Fired, firing_instant) {
                    report.fired.push(id);
                }
            } else if let Ok(Transition::Applied { .. }) = self.transition(&id, TriggerState::Cancelled, now) {
                report.expired.push(id);
            }
        }

        let overdue: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| t.state == TriggerState::Fired)
            .filter(|t| {
                let fired_at = t.fired_at.unwrap_or(t.firing_instant);
                fired_at
                    .checked_add_signed(policy.grace_for(t.kind))
                    .is_some_and(|deadline| deadline <= now)
            })
            .map(|t| t.id.clone())
            .collect();

        for id in overdue {
            if let Ok(Transition::Applied { .. }) = self.transition(&id, TriggerState::Missed, now) {
                report.missed.push(id);
            }
        }

        let stale: Vec<TriggerId> = self
            .triggers
            .values()
            .filter(|t| t.state.is_terminal() && !t.registered)
            .filter(|t| {
                t.resolved_at
                    .map(|at| {
                        at.checked_add_signed(policy.retention)
                            .is_some_and(|expiry| expiry <= now)
                    })
                    .unwrap_or(true)
            })
            .map(|t| t.id.clone())
            .collect();

        for id in stale {
            if let Some(trigger) = self.triggers.remove(&id) {
                report.pruned.push(trigger);
            }
        }

        if !report.is_empty() {
            tracing::info!(
                "Sweep: {} fired, {} missed, {} expired, {} pruned",
                report.fired.len(),
                report.missed.len(),
                report.expired.len(),
                report.pruned.len()
            );
        }

        report
    }
}
