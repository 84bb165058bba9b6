//! Trigger scheduler: keeps the sink's registrations in line with the rules.
//!
//! Each pass expands every enabled subject over the rolling horizon into a
//! desired set keyed by trigger id, then diffs it against what is registered:
//!
//! - `to_add    = desired \ registered`
//! - `to_remove = registered \ desired`
//!
//! Trigger ids are deterministic, so re-expanding an unchanged rule yields
//! the same ids and the diff is empty.

use crate::error::{DeliveryUnavailable, SinkError, SinkOperation};
use crate::expander::{expand, Window};
use crate::lifecycle::LifecycleTracker;
use crate::sink::NotificationSink;
use crate::store::SubjectStore;
use crate::time::TimeSource;
use crate::{NotificationStyle, Result, Trigger, TriggerId, TriggerState};
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimal set of sink operations for one pass
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconcilePlan {
    pub to_add: Vec<Trigger>,
    pub to_remove: Vec<TriggerId>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

/// Raw sink results for one plan
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub cancelled: Vec<(TriggerId, std::result::Result<(), SinkError>)>,
    pub scheduled: Vec<(TriggerId, std::result::Result<(), SinkError>)>,
}

/// What a dispatched plan achieved
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApplyReport {
    pub scheduled: Vec<TriggerId>,
    pub cancelled: Vec<TriggerId>,
    pub warnings: Vec<DeliveryUnavailable>,
}

/// Expands, diffs and applies; owns the active trigger set via its tracker
#[derive(Clone, Debug)]
pub struct TriggerScheduler {
    horizon: Duration,
    style: NotificationStyle,
    tracker: LifecycleTracker,
}

impl TriggerScheduler {
    pub fn new(horizon: Duration, style: NotificationStyle, tracker: LifecycleTracker) -> Self {
        Self {
            horizon,
            style,
            tracker,
        }
    }

    pub fn horizon(&self) -> Duration {
        self.horizon
    }

    pub fn tracker(&self) -> &LifecycleTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut LifecycleTracker {
        &mut self.tracker
    }

    /// Every trigger enabled subjects should have registered after `now`.
    ///
    /// A subject whose rule cannot be expanded is logged and skipped; it
    /// never blocks the other subjects.
    pub fn desired(
        &self,
        store: &SubjectStore,
        now: DateTime<Utc>,
        calendar: &dyn TimeSource,
    ) -> Result<BTreeMap<TriggerId, Trigger>> {
        let window = Window::new(now, now + self.horizon)?;
        let mut desired = BTreeMap::new();

        for subject in store.enabled() {
            let occurrences = match subject
                .lead_time()
                .and_then(|lead| expand(&subject.rule, lead, &window, calendar))
            {
                Ok(occurrences) => occurrences,
                Err(e) => {
                    tracing::warn!("Skipping subject {} this pass: {}", subject.id, e);
                    continue;
                }
            };

            for occurrence in occurrences.into_iter().filter(|o| o.firing > now) {
                let trigger = Trigger::scheduled(subject, &occurrence.key, occurrence.firing, self.style);
                desired.insert(trigger.id.clone(), trigger);
            }
        }

        Ok(desired)
    }

    /// Diff the desired set against the active set. Does not mutate anything.
    pub fn reconcile(
        &self,
        store: &SubjectStore,
        now: DateTime<Utc>,
        calendar: &dyn TimeSource,
    ) -> Result<ReconcilePlan> {
        let desired = self.desired(store, now, calendar)?;
        let mut plan = ReconcilePlan::default();

        for (id, wanted) in &desired {
            match self.tracker.get(id) {
                None => plan.to_add.push(wanted.clone()),
                Some(current) => match current.state {
                    TriggerState::Scheduled => {
                        if current.registered && current.same_registration(wanted) {
                            continue;
                        }
                        if current.registered {
                            // Instant or content changed under the same id
                            plan.to_remove.push(id.clone());
                        }
                        plan.to_add.push(wanted.clone());
                    }
                    TriggerState::Cancelled => {
                        if current.registered {
                            plan.to_remove.push(id.clone());
                        }
                        plan.to_add.push(wanted.clone());
                    }
                    // Already delivered; a future slot can't map onto it
                    TriggerState::Fired | TriggerState::Acknowledged | TriggerState::Missed => {}
                },
            }
        }

        for current in self.tracker.iter() {
            if desired.contains_key(&current.id) {
                continue;
            }
            let stale_scheduled =
                current.state == TriggerState::Scheduled && current.firing_instant > now;
            let pending_cancel = current.state == TriggerState::Cancelled && current.registered;
            if stale_scheduled || pending_cancel {
                plan.to_remove.push(current.id.clone());
            }
        }

        tracing::debug!(
            "Reconcile: {} desired, {} to add, {} to remove",
            desired.len(),
            plan.to_add.len(),
            plan.to_remove.len()
        );

        Ok(plan)
    }

    /// Apply the plan to the engine's own bookkeeping.
    ///
    /// Removed triggers become Cancelled and added ones Scheduled before any
    /// sink call is made, so readers never see a stale desired set.
    pub fn commit(&mut self, plan: &ReconcilePlan, now: DateTime<Utc>) {
        for id in &plan.to_remove {
            if let Some(TriggerState::Scheduled) = self.tracker.get(id).map(|t| t.state) {
                let _ = self.tracker.cancel(id, now);
            }
        }
        for trigger in &plan.to_add {
            self.tracker.insert_scheduled(trigger.clone());
        }
    }

    /// Record sink results against the bookkeeping
    pub fn record(&mut self, outcome: DispatchOutcome) -> ApplyReport {
        let mut report = ApplyReport::default();

        for (id, result) in outcome.cancelled {
            match result {
                Ok(()) => {
                    if let Some(TriggerState::Cancelled) = self.tracker.get(&id).map(|t| t.state) {
                        self.tracker.set_registered(&id, false);
                    }
                    report.cancelled.push(id);
                }
                Err(e) => report.warnings.push(delivery_warning(id, SinkOperation::Cancel, e)),
            }
        }

        for (id, result) in outcome.scheduled {
            match result {
                Ok(()) => {
                    self.tracker.set_registered(&id, true);
                    report.scheduled.push(id);
                }
                // Stays Scheduled and unregistered; the next pass retries it
                Err(e) => report.warnings.push(delivery_warning(id, SinkOperation::Schedule, e)),
            }
        }

        if !report.warnings.is_empty() {
            tracing::warn!(
                "{} sink operations failed this pass; they will be retried",
                report.warnings.len()
            );
        }

        report
    }

    /// Commit, dispatch and record in one step
    pub async fn apply(
        &mut self,
        plan: ReconcilePlan,
        sink: &dyn NotificationSink,
        now: DateTime<Utc>,
    ) -> ApplyReport {
        self.commit(&plan, now);
        let outcome = dispatch(&plan, sink).await;
        self.record(outcome)
    }
}

fn delivery_warning(id: TriggerId, operation: SinkOperation, err: SinkError) -> DeliveryUnavailable {
    let warning = DeliveryUnavailable {
        trigger_id: id,
        operation,
        reason: err.to_string(),
    };
    tracing::warn!("{}", warning);
    warning
}

/// Issue the plan's sink calls.
///
/// Cancels run before schedules so a replaced id ends up registered; the
/// calls within each group run concurrently.
pub async fn dispatch(plan: &ReconcilePlan, sink: &dyn NotificationSink) -> DispatchOutcome {
    let cancels = join_all(plan.to_remove.iter().map(|id| async move {
        (id.clone(), sink.cancel(id).await)
    }))
    .await;

    let schedules = join_all(plan.to_add.iter().map(|trigger| async move {
        (trigger.id.clone(), sink.schedule(trigger).await)
    }))
    .await;

    DispatchOutcome {
        cancelled: cancels,
        scheduled: schedules,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::GracePolicy;
    use crate::sink::MemorySink;
    use crate::store::SubjectUpdate;
    use crate::time::FixedClock;
    use crate::{RecurrenceRule, ReminderSubject, SubjectId};
    use chrono::TimeZone;
    use std::collections::BTreeSet;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn daily(times: &[&str]) -> RecurrenceRule {
        RecurrenceRule::daily(times.iter().map(|t| t.parse().unwrap())).unwrap()
    }

    fn scheduler(horizon_days: i64) -> TriggerScheduler {
        TriggerScheduler::new(
            Duration::days(horizon_days),
            NotificationStyle::Regular,
            LifecycleTracker::new(GracePolicy::default()),
        )
    }

    fn ids_for(plan: &ReconcilePlan, subject: SubjectId) -> usize {
        plan.to_add.iter().filter(|t| t.subject_id == subject).count()
    }

    async fn pass(
        scheduler: &mut TriggerScheduler,
        store: &SubjectStore,
        sink: &MemorySink,
        clock: &FixedClock,
    ) -> ReconcilePlan {
        let now = clock.now();
        let plan = scheduler.reconcile(store, now, clock).unwrap();
        scheduler.apply(plan.clone(), sink, now).await;
        plan
    }

    #[tokio::test]
    async fn test_second_pass_is_empty() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00", "20:00"])))
            .unwrap();
        let mut scheduler = scheduler(3);

        let first = pass(&mut scheduler, &store, &sink, &clock).await;
        assert_eq!(first.to_add.len(), 6);

        let second = pass(&mut scheduler, &store, &sink, &clock).await;
        assert!(second.is_empty(), "second pass should be empty: {:?}", second);
        assert_eq!(sink.pending_ids().len(), 6);
    }

    #[tokio::test]
    async fn test_adding_a_time_only_adds_new_slots() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        let id = store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let mut scheduler = scheduler(5);
        pass(&mut scheduler, &store, &sink, &clock).await;
        let before: BTreeSet<TriggerId> = sink.pending_ids().into_iter().collect();

        // Mid-horizon edit
        clock.set(utc(2024, 1, 2, 10, 0));
        store
            .update(id, SubjectUpdate::rule(daily(&["08:00", "14:00"])))
            .unwrap();
        let plan = pass(&mut scheduler, &store, &sink, &clock).await;

        assert!(plan.to_remove.is_empty());
        assert!(plan.to_add.iter().all(|t| !before.contains(&t.id)));
        // Jan 2..6 at 14:00; the horizon also slid to pick up Jan 6 and 7 at 08:00
        assert_eq!(plan.to_add.len(), 7);
        assert_eq!(
            plan.to_add
                .iter()
                .filter(|t| t.id.as_str().ends_with("T14:00"))
                .count(),
            5
        );

        // The previously registered 08:00 triggers were never touched
        for id in &before {
            if scheduler.tracker().get(id).unwrap().firing_instant > clock.now() {
                assert!(sink.contains(id));
            }
        }
        assert_eq!(sink.cancel_calls(), 0);
    }

    #[tokio::test]
    async fn test_disable_removes_exactly_its_triggers() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        let med = store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let other = store
            .create(ReminderSubject::medication("Vitamin D", daily(&["09:00"])))
            .unwrap();
        let mut scheduler = scheduler(5);
        let first = pass(&mut scheduler, &store, &sink, &clock).await;
        assert_eq!(ids_for(&first, med), 5);

        store.set_enabled(med, false).unwrap();
        let now = clock.now();
        let plan = scheduler.reconcile(&store, now, &clock).unwrap();

        assert!(plan.to_add.is_empty());
        assert_eq!(plan.to_remove.len(), 5);
        assert!(plan
            .to_remove
            .iter()
            .all(|id| id.subject_id() == Some(med)));

        scheduler.apply(plan, &sink, now).await;
        let remaining: Vec<_> = sink.pending();
        assert_eq!(remaining.len(), 5);
        assert!(remaining.iter().all(|t| t.subject_id == other));
        assert!(scheduler
            .tracker()
            .iter()
            .filter(|t| t.subject_id == med)
            .all(|t| t.state == TriggerState::Cancelled && !t.registered));
    }

    #[tokio::test]
    async fn test_delete_converges_in_one_pass() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        let id = store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let mut scheduler = scheduler(10);
        pass(&mut scheduler, &store, &sink, &clock).await;

        store.delete(id).unwrap();
        pass(&mut scheduler, &store, &sink, &clock).await;

        assert!(sink.pending_ids().is_empty());
        let again = scheduler.reconcile(&store, clock.now(), &clock).unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_is_retried_next_pass() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        sink.set_available(false);
        let mut store = SubjectStore::new();
        store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let mut scheduler = scheduler(2);

        let now = clock.now();
        let plan = scheduler.reconcile(&store, now, &clock).unwrap();
        let report = scheduler.apply(plan, &sink, now).await;

        assert_eq!(report.warnings.len(), 2);
        assert!(report
            .warnings
            .iter()
            .all(|w| w.operation == SinkOperation::Schedule));
        // Still Scheduled in our own books
        assert!(scheduler
            .tracker()
            .iter()
            .all(|t| t.state == TriggerState::Scheduled && !t.registered));

        sink.set_available(true);
        let retry = scheduler.reconcile(&store, now, &clock).unwrap();
        assert_eq!(retry.to_add.len(), 2);
        let report = scheduler.apply(retry, &sink, now).await;
        assert!(report.warnings.is_empty());
        assert_eq!(sink.pending_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_lead_time_change_replaces_registration() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        let appointment_at = utc(2024, 1, 10, 15, 0);
        let id = store
            .create(
                ReminderSubject::appointment("Dentist", RecurrenceRule::one_time(appointment_at))
                    .with_lead_time(60),
            )
            .unwrap();
        let mut scheduler = scheduler(60);
        pass(&mut scheduler, &store, &sink, &clock).await;

        store
            .update(
                id,
                SubjectUpdate {
                    lead_time_minutes: Some(24 * 60),
                    ..Default::default()
                },
            )
            .unwrap();
        let plan = pass(&mut scheduler, &store, &sink, &clock).await;

        assert_eq!(plan.to_remove.len(), 1);
        assert_eq!(plan.to_add.len(), 1);
        let pending = sink.pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].firing_instant, utc(2024, 1, 9, 15, 0));
    }

    #[tokio::test]
    async fn test_horizon_slides_forward() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let mut scheduler = scheduler(3);
        pass(&mut scheduler, &store, &sink, &clock).await;

        clock.advance(Duration::days(1));
        // Jan 1 08:00 is now due and left to the lifecycle tracker
        let plan = pass(&mut scheduler, &store, &sink, &clock).await;

        assert!(plan.to_remove.is_empty());
        assert_eq!(plan.to_add.len(), 1);
        assert!(plan.to_add[0].id.as_str().ends_with("2024-01-04T08:00"));
    }

    #[tokio::test]
    async fn test_reenabled_subject_rescheduled() {
        let clock = FixedClock::new(utc(2024, 1, 1, 0, 0));
        let sink = MemorySink::new();
        let mut store = SubjectStore::new();
        let id = store
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .unwrap();
        let mut scheduler = scheduler(2);
        pass(&mut scheduler, &store, &sink, &clock).await;

        store.set_enabled(id, false).unwrap();
        pass(&mut scheduler, &store, &sink, &clock).await;
        assert!(sink.pending_ids().is_empty());

        store.set_enabled(id, true).unwrap();
        let plan = pass(&mut scheduler, &store, &sink, &clock).await;

        assert_eq!(plan.to_add.len(), 2);
        assert_eq!(sink.pending_ids().len(), 2);
        assert!(scheduler
            .tracker()
            .iter()
            .all(|t| t.state == TriggerState::Scheduled && t.registered));
    }
}
