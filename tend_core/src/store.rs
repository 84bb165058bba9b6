//! Reminder subject store and its persistence collaborators.
//!
//! The store is plain data. It is only ever mutated from inside the
//! engine task, which is what gives the system its single-writer discipline.

use crate::rule::RecurrenceRule;
use crate::state::{load_json, save_json};
use crate::{Error, ReminderSubject, Result, SubjectId};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Persistence collaborator for subjects.
///
/// `load` must hand back the ids that were saved, unchanged.
pub trait SubjectRepo: Send {
    fn load(&self) -> Result<Vec<ReminderSubject>>;
    fn save(&self, subjects: &[ReminderSubject]) -> Result<()>;
}

/// Field-level edit to an existing subject
#[derive(Clone, Debug, Default)]
pub struct SubjectUpdate {
    pub name: Option<String>,
    pub detail: Option<Option<String>>,
    pub rule: Option<RecurrenceRule>,
    pub lead_time_minutes: Option<i64>,
}

impl SubjectUpdate {
    pub fn rule(rule: RecurrenceRule) -> Self {
        Self {
            rule: Some(rule),
            ..Default::default()
        }
    }
}

/// In-memory set of reminder subjects.
///
/// Stored subjects that no longer validate are quarantined: they are kept
/// and saved back unchanged, but produce no triggers until an edit makes
/// them valid again.
#[derive(Clone, Debug, Default)]
pub struct SubjectStore {
    subjects: BTreeMap<SubjectId, ReminderSubject>,
    quarantined: BTreeSet<SubjectId>,
}

impl SubjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from persisted subjects, quarantining any that no longer validate
    pub fn from_subjects(subjects: Vec<ReminderSubject>) -> Self {
        let mut store = Self::new();
        for subject in subjects {
            if let Err(e) = subject.validate() {
                tracing::warn!("Quarantining stored subject {}: {}", subject.id, e);
                store.quarantined.insert(subject.id);
            }
            store.subjects.insert(subject.id, subject);
        }
        store
    }

    pub fn create(&mut self, subject: ReminderSubject) -> Result<SubjectId> {
        subject.validate()?;
        if self.subjects.contains_key(&subject.id) {
            return Err(Error::Other(format!("Subject {} already exists", subject.id)));
        }
        let id = subject.id;
        tracing::info!("Created {:?} subject {} ({})", subject.kind, id, subject.name);
        self.subjects.insert(id, subject);
        Ok(id)
    }

    /// Apply `update`; nothing changes if the result would be invalid
    pub fn update(&mut self, id: SubjectId, update: SubjectUpdate) -> Result<&ReminderSubject> {
        let current = self.subjects.get(&id).ok_or(Error::SubjectNotFound(id))?;

        let mut edited = current.clone();
        if let Some(name) = update.name {
            edited.name = name;
        }
        if let Some(detail) = update.detail {
            edited.detail = detail;
        }
        if let Some(rule) = update.rule {
            edited.rule = rule;
        }
        if let Some(minutes) = update.lead_time_minutes {
            edited.lead_time_minutes = minutes;
        }
        edited.validate()?;

        tracing::info!("Updated subject {}", id);
        self.quarantined.remove(&id);
        self.subjects.insert(id, edited);
        self.subjects.get(&id).ok_or(Error::SubjectNotFound(id))
    }

    pub fn delete(&mut self, id: SubjectId) -> Result<ReminderSubject> {
        let removed = self.subjects.remove(&id).ok_or(Error::SubjectNotFound(id))?;
        self.quarantined.remove(&id);
        tracing::info!("Deleted subject {}", id);
        Ok(removed)
    }

    /// Returns whether the flag actually changed
    pub fn set_enabled(&mut self, id: SubjectId, enabled: bool) -> Result<bool> {
        let subject = self.subjects.get_mut(&id).ok_or(Error::SubjectNotFound(id))?;
        if enabled && self.quarantined.contains(&id) {
            subject.validate()?;
        }
        let changed = subject.enabled != enabled;
        subject.enabled = enabled;
        Ok(changed)
    }

    pub fn get(&self, id: SubjectId) -> Option<&ReminderSubject> {
        self.subjects.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReminderSubject> {
        self.subjects.values()
    }

    /// Subjects that should have triggers: enabled and not quarantined
    pub fn enabled(&self) -> impl Iterator<Item = &ReminderSubject> {
        self.subjects
            .values()
            .filter(|s| s.enabled && !self.quarantined.contains(&s.id))
    }

    pub fn is_quarantined(&self, id: SubjectId) -> bool {
        self.quarantined.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }

    pub fn to_vec(&self) -> Vec<ReminderSubject> {
        self.subjects.values().cloned().collect()
    }
}

/// Subjects stored as a JSON array on disk
pub struct JsonSubjectRepo {
    path: PathBuf,
}

impl JsonSubjectRepo {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SubjectRepo for JsonSubjectRepo {
    fn load(&self) -> Result<Vec<ReminderSubject>> {
        let subjects = load_json::<Vec<ReminderSubject>>(&self.path)?.unwrap_or_default();
        tracing::info!("Loaded {} subjects from {:?}", subjects.len(), self.path);
        Ok(subjects)
    }

    fn save(&self, subjects: &[ReminderSubject]) -> Result<()> {
        save_json(&self.path, subjects)
            .map_err(|e| Error::Persistence(format!("saving {:?}: {}", self.path, e)))
    }
}

/// In-process repo, mostly for tests and embedding
#[derive(Default)]
pub struct MemorySubjectRepo {
    saved: Mutex<Vec<ReminderSubject>>,
    failing: AtomicBool,
}

impl MemorySubjectRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn saved(&self) -> Vec<ReminderSubject> {
        self.saved.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

impl SubjectRepo for MemorySubjectRepo {
    fn load(&self) -> Result<Vec<ReminderSubject>> {
        Ok(self.saved())
    }

    fn save(&self, subjects: &[ReminderSubject]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Persistence("storage unavailable".into()));
        }
        let mut saved = self
            .saved
            .lock()
            .map_err(|_| Error::Persistence("repo lock poisoned".into()))?;
        *saved = subjects.to_vec();
        Ok(())
    }
}

impl<R: SubjectRepo + Sync> SubjectRepo for std::sync::Arc<R> {
    fn load(&self) -> Result<Vec<ReminderSubject>> {
        (**self).load()
    }

    fn save(&self, subjects: &[ReminderSubject]) -> Result<()> {
        (**self).save(subjects)
    }
}
