//! Notification sink: the external mechanism that actually delivers reminders.
//!
//! The engine treats sinks as best-effort and idempotent. Scheduling an id
//! the sink already holds replaces it; cancelling an unknown id succeeds.

use crate::error::SinkError;
use crate::{Trigger, TriggerId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Delivery collaborator.
///
/// Deliveries are reported back through `EngineHandle::fired`, on the
/// same serialized path as every other engine event.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn schedule(&self, trigger: &Trigger) -> Result<(), SinkError>;
    async fn cancel(&self, trigger_id: &TriggerId) -> Result<(), SinkError>;
}

/// In-process sink that records what it holds
#[derive(Debug)]
pub struct MemorySink {
    pending: Mutex<BTreeMap<TriggerId, Trigger>>,
    available: AtomicBool,
    schedule_calls: AtomicUsize,
    cancel_calls: AtomicUsize,
}

impl Default for MemorySink {
    fn default() -> Self {
        Self {
            pending: Mutex::new(BTreeMap::new()),
            available: AtomicBool::new(true),
            schedule_calls: AtomicUsize::new(0),
            cancel_calls: AtomicUsize::new(0),
        }
    }
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the user revoking (or granting) notification permission
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn pending_ids(&self) -> Vec<TriggerId> {
        self.pending
            .lock()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending(&self) -> Vec<Trigger> {
        self.pending
            .lock()
            .map(|p| p.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: &TriggerId) -> bool {
        self.pending
            .lock()
            .map(|p| p.contains_key(id))
            .unwrap_or(false)
    }

    pub fn schedule_calls(&self) -> usize {
        self.schedule_calls.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.cancel_calls.load(Ordering::SeqCst)
    }

    /// The OS delivered a notification: it is no longer pending
    pub fn deliver(&self, id: &TriggerId) -> Option<Trigger> {
        self.pending.lock().ok()?.remove(id)
    }

    fn check_available(&self) -> Result<(), SinkError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(SinkError::PermissionDenied)
        }
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn schedule(&self, trigger: &Trigger) -> Result<(), SinkError> {
        self.schedule_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SinkError::Unavailable("sink lock poisoned".into()))?;
        pending.insert(trigger.id.clone(), trigger.clone());
        Ok(())
    }

    async fn cancel(&self, trigger_id: &TriggerId) -> Result<(), SinkError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| SinkError::Unavailable("sink lock poisoned".into()))?;
        pending.remove(trigger_id);
        Ok(())
    }
}
