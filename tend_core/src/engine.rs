//! The reminder engine: a single task that owns the subject store and the
//! trigger set.
//!
//! Every mutation (subject edits, delivery reports, acknowledgments, timed
//! reconciliation) is sent to the engine task over a channel and handled one
//! at a time, so two passes can never interleave. Readers get a consistent
//! [`Snapshot`] through a watch channel without going through the queue.
//!
//! A pass is:
//! 1. sweep due and overdue triggers, journaling the ones pruned
//! 2. reconcile the desired set against the tracked set
//! 3. commit the plan to the books and publish
//! 4. issue the sink calls and record their results
//! 5. publish again

use crate::config::ScheduleConfig;
use crate::error::DeliveryUnavailable;
use crate::journal::{NullJournal, TriggerJournal};
use crate::lifecycle::{LifecycleTracker, Transition};
use crate::scheduler::{dispatch, TriggerScheduler};
use crate::sink::NotificationSink;
use crate::store::{SubjectRepo, SubjectStore, SubjectUpdate};
use crate::time::TimeSource;
use crate::{
    Error, NotificationStyle, ReminderSubject, Result, SubjectId, Trigger, TriggerId, TriggerState,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_BUFFER: usize = 64;

/// Summary of one reconciliation pass
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub at: DateTime<Utc>,
    /// Triggers the sink accepted this pass
    pub added: usize,
    /// Triggers the sink dropped this pass
    pub removed: usize,
    pub fired: usize,
    pub missed: usize,
    pub expired: usize,
    pub pruned: usize,
    pub warnings: Vec<DeliveryUnavailable>,
}

/// Consistent view of the engine's state
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub subjects: Vec<ReminderSubject>,
    /// Stored subjects that no longer validate
    pub quarantined: Vec<SubjectId>,
    pub triggers: Vec<Trigger>,
    pub last_report: Option<PassReport>,
    pub taken_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn subject(&self, id: SubjectId) -> Option<&ReminderSubject> {
        self.subjects.iter().find(|s| s.id == id)
    }

    pub fn is_quarantined(&self, id: SubjectId) -> bool {
        self.quarantined.contains(&id)
    }

    pub fn trigger(&self, id: &TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|t| &t.id == id)
    }

    pub fn triggers_for(&self, subject: SubjectId) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter(move |t| t.subject_id == subject)
    }

    pub fn in_state(&self, state: TriggerState) -> impl Iterator<Item = &Trigger> {
        self.triggers.iter().filter(move |t| t.state == state)
    }

    /// Upcoming reminders, soonest first
    pub fn upcoming(&self) -> Vec<&Trigger> {
        let mut upcoming: Vec<&Trigger> = self.in_state(TriggerState::Scheduled).collect();
        upcoming.sort_by_key(|t| t.firing_instant);
        upcoming
    }
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum Command {
    Create(ReminderSubject, Reply<SubjectId>),
    Update(SubjectId, SubjectUpdate, Reply<ReminderSubject>),
    Delete(SubjectId, Reply<()>),
    SetEnabled(SubjectId, bool, Reply<()>),
    Fired(TriggerId, Reply<Transition>),
    Acknowledge(TriggerId, Reply<Transition>),
    Reconcile(Reply<PassReport>),
    Shutdown(oneshot::Sender<()>),
}

/// Builder for the engine task
pub struct EngineBuilder {
    clock: Arc<dyn TimeSource>,
    sink: Arc<dyn NotificationSink>,
    repo: Box<dyn SubjectRepo>,
    journal: Box<dyn TriggerJournal>,
    schedule: ScheduleConfig,
    style: NotificationStyle,
    triggers: Vec<Trigger>,
}

impl EngineBuilder {
    pub fn schedule(mut self, schedule: ScheduleConfig) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn style(mut self, style: NotificationStyle) -> Self {
        self.style = style;
        self
    }

    /// Restore the trigger set persisted by a previous run
    pub fn triggers(mut self, triggers: Vec<Trigger>) -> Self {
        self.triggers = triggers;
        self
    }

    pub fn journal(mut self, journal: Box<dyn TriggerJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Load subjects and start the engine task.
    ///
    /// No pass runs until one is requested. Must be called from inside a
    /// tokio runtime.
    pub fn spawn(self) -> Result<EngineHandle> {
        self.schedule.validate()?;
        let store = SubjectStore::from_subjects(self.repo.load()?);
        let tracker = LifecycleTracker::with_triggers(self.schedule.grace_policy()?, self.triggers);
        let scheduler = TriggerScheduler::new(self.schedule.horizon(), self.style, tracker);

        let initial = Snapshot {
            subjects: store.to_vec(),
            quarantined: quarantined_ids(&store),
            triggers: scheduler.tracker().iter().cloned().collect(),
            last_report: None,
            taken_at: self.clock.now(),
        };
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);

        let engine = Engine {
            clock: self.clock,
            sink: self.sink,
            repo: self.repo,
            journal: self.journal,
            store,
            scheduler,
            last_report: None,
            snapshot_tx,
        };
        tracing::info!("Starting engine with {} subjects", engine.store.len());
        tokio::spawn(engine.run(rx));

        Ok(EngineHandle {
            tx,
            snapshot: snapshot_rx,
        })
    }
}

/// The engine task's state. Only reachable through an [`EngineHandle`].
pub struct Engine {
    clock: Arc<dyn TimeSource>,
    sink: Arc<dyn NotificationSink>,
    repo: Box<dyn SubjectRepo>,
    journal: Box<dyn TriggerJournal>,
    store: SubjectStore,
    scheduler: TriggerScheduler,
    last_report: Option<PassReport>,
    snapshot_tx: watch::Sender<Snapshot>,
}

impl Engine {
    pub fn builder(
        clock: Arc<dyn TimeSource>,
        sink: Arc<dyn NotificationSink>,
        repo: Box<dyn SubjectRepo>,
    ) -> EngineBuilder {
        EngineBuilder {
            clock,
            sink,
            repo,
            journal: Box::new(NullJournal),
            schedule: ScheduleConfig::default(),
            style: NotificationStyle::default(),
            triggers: Vec::new(),
        }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Create(subject, reply) => {
                    let _ = reply.send(self.create(subject).await);
                }
                Command::Update(id, update, reply) => {
                    let _ = reply.send(self.update(id, update).await);
                }
                Command::Delete(id, reply) => {
                    let _ = reply.send(self.delete(id).await);
                }
                Command::SetEnabled(id, enabled, reply) => {
                    let _ = reply.send(self.set_enabled(id, enabled).await);
                }
                Command::Fired(id, reply) => {
                    let now = self.clock.now();
                    let result = self.scheduler.tracker_mut().mark_fired(&id, now);
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Acknowledge(id, reply) => {
                    let now = self.clock.now();
                    let result = self.scheduler.tracker_mut().acknowledge(&id, now);
                    self.publish();
                    let _ = reply.send(result);
                }
                Command::Reconcile(reply) => {
                    let _ = reply.send(self.pass().await);
                }
                Command::Shutdown(done) => {
                    let _ = done.send(());
                    break;
                }
            }
        }

        tracing::info!("Engine stopped");
    }

    async fn create(&mut self, subject: ReminderSubject) -> Result<SubjectId> {
        let id = self.store.create(subject)?;
        self.persist_and_pass().await?;
        Ok(id)
    }

    async fn update(&mut self, id: SubjectId, update: SubjectUpdate) -> Result<ReminderSubject> {
        let updated = self.store.update(id, update)?.clone();
        self.persist_and_pass().await?;
        Ok(updated)
    }

    async fn delete(&mut self, id: SubjectId) -> Result<()> {
        self.store.delete(id)?;
        self.cancel_subject(id);
        self.persist_and_pass().await
    }

    async fn set_enabled(&mut self, id: SubjectId, enabled: bool) -> Result<()> {
        if !self.store.set_enabled(id, enabled)? {
            return Ok(());
        }
        if !enabled {
            self.cancel_subject(id);
        }
        self.persist_and_pass().await
    }

    /// Cancel in the books first; the sink catches up in the following pass
    fn cancel_subject(&mut self, id: SubjectId) {
        let now = self.clock.now();
        self.scheduler.tracker_mut().cancel_subject(id, now);
        self.publish();
    }

    /// Save subjects, then reconcile even if the save failed.
    ///
    /// The in-memory store keeps the change either way; a save failure is
    /// still reported to the caller.
    async fn persist_and_pass(&mut self) -> Result<()> {
        let saved = self.repo.save(&self.store.to_vec());
        if let Err(e) = &saved {
            tracing::error!("Failed to persist subjects: {}", e);
        }
        self.pass().await?;
        saved.map_err(|e| match e {
            Error::Persistence(_) => e,
            other => Error::Persistence(other.to_string()),
        })
    }

    async fn pass(&mut self) -> Result<PassReport> {
        let now = self.clock.now();

        let sweep = self.scheduler.tracker_mut().sweep(now);
        for trigger in &sweep.pruned {
            if let Err(e) = self.journal.append(trigger) {
                tracing::warn!("Failed to journal {}: {}", trigger.id, e);
            }
        }

        let plan = self
            .scheduler
            .reconcile(&self.store, now, self.clock.as_ref())?;
        self.scheduler.commit(&plan, now);
        self.publish();

        let outcome = dispatch(&plan, self.sink.as_ref()).await;
        let applied = self.scheduler.record(outcome);

        let report = PassReport {
            at: now,
            added: applied.scheduled.len(),
            removed: applied.cancelled.len(),
            fired: sweep.fired.len(),
            missed: sweep.missed.len(),
            expired: sweep.expired.len(),
            pruned: sweep.pruned.len(),
            warnings: applied.warnings,
        };
        tracing::info!(
            "Pass at {}: +{} -{} ({} warnings)",
            now,
            report.added,
            report.removed,
            report.warnings.len()
        );

        self.last_report = Some(report.clone());
        self.publish();
        Ok(report)
    }

    fn publish(&self) {
        let snapshot = Snapshot {
            subjects: self.store.to_vec(),
            quarantined: quarantined_ids(&self.store),
            triggers: self.scheduler.tracker().iter().cloned().collect(),
            last_report: self.last_report.clone(),
            taken_at: self.clock.now(),
        };
        self.snapshot_tx.send_replace(snapshot);
    }
}

fn quarantined_ids(store: &SubjectStore) -> Vec<SubjectId> {
    store
        .iter()
        .map(|s| s.id)
        .filter(|id| store.is_quarantined(*id))
        .collect()
}

/// Cloneable handle to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::EngineStopped)?;
        response.await.map_err(|_| Error::EngineStopped)?
    }

    pub async fn create(&self, subject: ReminderSubject) -> Result<SubjectId> {
        self.request(|reply| Command::Create(subject, reply)).await
    }

    pub async fn update(&self, id: SubjectId, update: SubjectUpdate) -> Result<ReminderSubject> {
        self.request(|reply| Command::Update(id, update, reply)).await
    }

    pub async fn delete(&self, id: SubjectId) -> Result<()> {
        self.request(|reply| Command::Delete(id, reply)).await
    }

    pub async fn set_enabled(&self, id: SubjectId, enabled: bool) -> Result<()> {
        self.request(|reply| Command::SetEnabled(id, enabled, reply)).await
    }

    /// The sink delivered a notification
    pub async fn fired(&self, id: TriggerId) -> Result<Transition> {
        self.request(|reply| Command::Fired(id, reply)).await
    }

    /// The user actioned a delivered notification
    pub async fn acknowledge(&self, id: TriggerId) -> Result<Transition> {
        self.request(|reply| Command::Acknowledge(id, reply)).await
    }

    /// Run a full pass now
    pub async fn reconcile(&self) -> Result<PassReport> {
        self.request(Command::Reconcile).await
    }

    /// Latest published state
    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.clone()
    }

    /// Stop the engine after the commands already queued
    pub async fn shutdown(&self) -> Result<()> {
        let (done, stopped) = oneshot::channel();
        self.tx
            .send(Command::Shutdown(done))
            .await
            .map_err(|_| Error::EngineStopped)?;
        stopped.await.map_err(|_| Error::EngineStopped)
    }
}

/// Reconcile now, then on a fixed period until the engine stops
pub fn spawn_periodic_reconcile(handle: EngineHandle, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match handle.reconcile().await {
                Ok(_) => {}
                Err(Error::EngineStopped) => break,
                Err(e) => tracing::warn!("Periodic reconcile failed: {}", e),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkOperation;
    use crate::sink::MemorySink;
    use crate::store::{MemorySubjectRepo, SubjectRepo};
    use crate::time::FixedClock;
    use crate::RecurrenceRule;
    use chrono::{Duration, TimeZone};

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn daily(times: &[&str]) -> RecurrenceRule {
        RecurrenceRule::daily(times.iter().map(|t| t.parse().unwrap())).unwrap()
    }

    struct Harness {
        clock: Arc<FixedClock>,
        sink: Arc<MemorySink>,
        repo: Arc<MemorySubjectRepo>,
        handle: EngineHandle,
    }

    fn start(horizon_days: i64) -> Harness {
        crate::logging::init_test();
        let clock = Arc::new(FixedClock::new(utc(2024, 1, 1, 0, 0)));
        let sink = Arc::new(MemorySink::new());
        let repo = Arc::new(MemorySubjectRepo::new());
        let schedule = ScheduleConfig {
            horizon_days,
            ..Default::default()
        };
        let handle = Engine::builder(clock.clone(), sink.clone(), Box::new(repo.clone()))
            .schedule(schedule)
            .spawn()
            .unwrap();
        Harness {
            clock,
            sink,
            repo,
            handle,
        }
    }

    #[tokio::test]
    async fn test_disable_cancels_only_that_subject() {
        let h = start(5);
        let med = h
            .handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();
        let other = h
            .handle
            .create(ReminderSubject::medication("Vitamin D", daily(&["09:00"])))
            .await
            .unwrap();
        assert_eq!(h.sink.pending_ids().len(), 10);

        h.handle.set_enabled(med, false).await.unwrap();

        let pending = h.sink.pending();
        assert_eq!(pending.len(), 5);
        assert!(pending.iter().all(|t| t.subject_id == other));

        let snapshot = h.handle.snapshot();
        assert!(snapshot
            .triggers_for(med)
            .all(|t| t.state == TriggerState::Cancelled));
        assert_eq!(snapshot.last_report.as_ref().unwrap().removed, 5);
        assert!(!snapshot.subject(med).unwrap().enabled);
    }

    #[tokio::test]
    async fn test_cancellation_recorded_while_sink_is_down() {
        let h = start(3);
        let id = h
            .handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();

        h.sink.set_available(false);
        h.handle.delete(id).await.unwrap();

        let snapshot = h.handle.snapshot();
        assert!(snapshot.subject(id).is_none());
        assert!(snapshot
            .triggers_for(id)
            .all(|t| t.state == TriggerState::Cancelled && t.registered));
        let warnings = &snapshot.last_report.as_ref().unwrap().warnings;
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().all(|w| w.operation == SinkOperation::Cancel));

        h.sink.set_available(true);
        h.handle.reconcile().await.unwrap();
        assert!(h.sink.pending_ids().is_empty());
        assert!(h
            .handle
            .snapshot()
            .triggers_for(id)
            .all(|t| !t.registered));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_change_in_memory() {
        let h = start(2);
        h.repo.set_failing(true);

        let result = h
            .handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.subjects.len(), 1);
        assert_eq!(h.sink.pending_ids().len(), 2);
        assert!(h.repo.saved().is_empty());
    }

    #[tokio::test]
    async fn test_fire_and_acknowledge() {
        let h = start(2);
        let id = h
            .handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();
        let first = h.handle.snapshot().upcoming()[0].id.clone();
        assert!(first.as_str().starts_with(&id.to_string()));

        h.clock.set(utc(2024, 1, 1, 8, 0));
        h.sink.deliver(&first);
        let fired = h.handle.fired(first.clone()).await.unwrap();
        assert!(fired.is_applied());

        h.clock.advance(Duration::minutes(5));
        let acked = h.handle.acknowledge(first.clone()).await.unwrap();
        assert!(acked.is_applied());

        let again = h.handle.acknowledge(first.clone()).await.unwrap();
        assert_eq!(
            again,
            Transition::Conflict {
                state: TriggerState::Acknowledged
            }
        );

        let trigger = h.handle.snapshot().trigger(&first).cloned().unwrap();
        assert_eq!(trigger.state, TriggerState::Acknowledged);
        assert_eq!(trigger.fired_at, Some(utc(2024, 1, 1, 8, 0)));
    }

    #[tokio::test]
    async fn test_unacknowledged_reminder_becomes_missed() {
        let h = start(2);
        h.handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();

        h.clock.set(utc(2024, 1, 1, 10, 1));
        let report = h.handle.reconcile().await.unwrap();

        assert_eq!(report.fired, 1);
        assert_eq!(report.missed, 1);
        let snapshot = h.handle.snapshot();
        assert_eq!(snapshot.in_state(TriggerState::Missed).count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_trigger_is_reported() {
        let h = start(2);
        let result = h.handle.fired(TriggerId::from("nope")).await;
        assert!(matches!(result, Err(Error::TriggerNotFound(_))));
    }

    #[tokio::test]
    async fn test_concurrent_requests_are_serialized() {
        let h = start(3);
        let (a, b, c) = tokio::join!(
            h.handle
                .create(ReminderSubject::medication("Metformin", daily(&["08:00"]))),
            h.handle
                .create(ReminderSubject::medication("Vitamin D", daily(&["09:00"]))),
            h.handle.reconcile(),
        );
        a.unwrap();
        b.unwrap();
        c.unwrap();

        let snapshot = h.handle.snapshot();
        let scheduled: Vec<TriggerId> = snapshot
            .in_state(TriggerState::Scheduled)
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(scheduled.len(), 6);
        assert_eq!(h.sink.pending_ids(), scheduled);

        let report = h.handle.reconcile().await.unwrap();
        assert_eq!(report.added + report.removed, 0);
    }

    #[tokio::test]
    async fn test_restart_restores_without_duplicates() {
        let h = start(3);
        h.handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();
        let triggers = h.handle.snapshot().triggers;
        h.handle.shutdown().await.unwrap();

        let handle = Engine::builder(h.clock.clone(), h.sink.clone(), Box::new(h.repo.clone()))
            .schedule(ScheduleConfig {
                horizon_days: 3,
                ..Default::default()
            })
            .triggers(triggers)
            .spawn()
            .unwrap();

        let report = handle.reconcile().await.unwrap();
        assert_eq!(report.added, 0);
        assert_eq!(h.sink.schedule_calls(), 3);
        assert_eq!(handle.snapshot().subjects.len(), 1);
    }

    #[tokio::test]
    async fn test_periodic_reconcile_runs_until_shutdown() {
        let h = start(2);
        h.handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();
        h.clock.set(utc(2024, 1, 1, 10, 1));

        let mut updates = h.handle.subscribe();
        let ticker = spawn_periodic_reconcile(h.handle.clone(), std::time::Duration::from_millis(10));

        let timeout = std::time::Duration::from_secs(5);
        tokio::time::timeout(
            timeout,
            updates.wait_for(|s| s.in_state(TriggerState::Missed).count() == 1),
        )
        .await
        .unwrap()
        .unwrap();

        h.handle.shutdown().await.unwrap();
        tokio::time::timeout(timeout, ticker).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_oversized_lead_time_is_rejected_and_engine_keeps_running() {
        let h = start(3);
        let appointment = ReminderSubject::appointment(
            "Dentist",
            RecurrenceRule::one_time(utc(2024, 1, 2, 15, 0)),
        )
        .with_lead_time(i64::MAX / 2);

        let result = h.handle.create(appointment).await;
        assert!(matches!(result, Err(Error::InvalidRule(_))));

        h.handle
            .create(ReminderSubject::medication("Metformin", daily(&["08:00"])))
            .await
            .unwrap();
        assert_eq!(h.handle.reconcile().await.unwrap().added, 0);
        assert_eq!(h.sink.pending_ids().len(), 3);
        assert_eq!(h.handle.snapshot().subjects.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_stored_subject_survives_unrelated_edit() {
        let h = start(3);
        h.handle.shutdown().await.unwrap();

        let times = daily(&["08:00"]).times().unwrap().clone();
        let broken = ReminderSubject::medication(
            "Broken",
            RecurrenceRule::Monthly {
                day_of_month: 40,
                times,
            },
        );
        h.repo.save(std::slice::from_ref(&broken)).unwrap();

        let handle = Engine::builder(h.clock.clone(), h.sink.clone(), Box::new(h.repo.clone()))
            .schedule(ScheduleConfig {
                horizon_days: 3,
                ..Default::default()
            })
            .spawn()
            .unwrap();
        handle
            .create(ReminderSubject::medication("Vitamin D", daily(&["09:00"])))
            .await
            .unwrap();

        let saved = h.repo.saved();
        assert_eq!(saved.len(), 2);
        assert!(saved.contains(&broken));
        assert_eq!(h.sink.pending_ids().len(), 3);
        let snapshot = handle.snapshot();
        assert!(snapshot.is_quarantined(broken.id));
        assert_eq!(snapshot.triggers_for(broken.id).count(), 0);

        let result = handle.set_enabled(broken.id, true).await;
        assert!(matches!(result, Err(Error::InvalidRule(_))));
    }

    #[tokio::test]
    async fn test_stopped_engine_rejects_requests() {
        let h = start(1);
        h.handle.shutdown().await.unwrap();
        let result = h.handle.reconcile().await;
        assert!(matches!(result, Err(Error::EngineStopped)));
    }
}
