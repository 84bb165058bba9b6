//! File-backed notification sink.
//!
//! Pending notifications live in a JSON map keyed by trigger id. A separate
//! delivery agent (or the CLI's `fired` command) drains it.

use crate::error::SinkError;
use crate::sink::NotificationSink;
use crate::state::{load_json, save_json};
use crate::{Trigger, TriggerId};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

type Pending = BTreeMap<TriggerId, Trigger>;

pub struct OutboxSink {
    path: PathBuf,
    // Serializes read-modify-write cycles from concurrent sink calls
    lock: Mutex<()>,
}

impl OutboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Notifications currently waiting for delivery
    pub fn pending(&self) -> Result<Vec<Trigger>, SinkError> {
        Ok(read_pending(&self.path)?.into_values().collect())
    }

    /// Remove a notification for delivery
    pub fn take(&self, id: &TriggerId) -> Result<Option<Trigger>, SinkError> {
        self.modify(|pending| pending.remove(id))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut Pending) -> T) -> Result<T, SinkError> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| SinkError::Unavailable("outbox lock poisoned".into()))?;
        let mut pending = read_pending(&self.path)?;
        let out = f(&mut pending);
        save_json(&self.path, &pending).map_err(SinkError::from)?;
        Ok(out)
    }
}

fn read_pending(path: &Path) -> Result<Pending, SinkError> {
    match load_json::<Pending>(path) {
        Ok(pending) => Ok(pending.unwrap_or_default()),
        Err(crate::Error::Json(e)) => {
            // The engine re-registers whatever it still wants on the next pass
            tracing::warn!("Outbox {:?} is corrupt ({}), starting empty", path, e);
            Ok(Pending::new())
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl NotificationSink for OutboxSink {
    async fn schedule(&self, trigger: &Trigger) -> Result<(), SinkError> {
        self.modify(|pending| {
            pending.insert(trigger.id.clone(), trigger.clone());
        })
    }

    async fn cancel(&self, trigger_id: &TriggerId) -> Result<(), SinkError> {
        self.modify(|pending| {
            pending.remove(trigger_id);
        })
    }
}
