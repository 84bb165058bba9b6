//! JSON state files with file locking.
//!
//! Subjects, the trigger book and the notification outbox are all stored
//! as whole-file JSON documents. Reads take a shared lock; writes go to a
//! locked temp file in the same directory and are renamed over the original.

use crate::{Error, Result, Trigger};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a JSON document under a shared lock.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let mut contents = String::new();
    let read = std::io::BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;

    let value = serde_json::from_str(&contents)?;
    tracing::debug!("Loaded {:?}", path);
    Ok(Some(value))
}

/// Atomically write a JSON document
///
/// 1. Write to a temp file next to the target
/// 2. Sync to disk
/// 3. Rename over the original
pub fn save_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let temp = NamedTempFile::new_in(path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::Other, "state path missing parent")
    })?)?;

    // Serialize concurrent writers on the temp file
    temp.as_file().lock_exclusive()?;

    {
        let mut writer = std::io::BufWriter::new(temp.as_file());
        let contents = serde_json::to_string_pretty(value)?;
        writer.write_all(contents.as_bytes())?;
        writer.flush()?;
    }

    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| Error::Io(e.error))?;

    tracing::debug!("Saved {:?}", path);
    Ok(())
}

/// The engine's trigger set as persisted between runs
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TriggerBook {
    pub triggers: Vec<Trigger>,
}

impl TriggerBook {
    /// Load the book, falling back to an empty one if the file is unreadable.
    ///
    /// An empty book only costs a re-registration on the next pass.
    pub fn load(path: &Path) -> Result<Self> {
        match load_json::<TriggerBook>(path) {
            Ok(Some(book)) => Ok(book),
            Ok(None) => {
                tracing::info!("No trigger book found, starting empty");
                Ok(Self::default())
            }
            Err(e) => {
                tracing::warn!(
                    "Failed to load trigger book {:?}: {}. Starting empty.",
                    path,
                    e
                );
                Ok(Self::default())
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_json(path, self)
    }
}

impl From<Vec<Trigger>> for TriggerBook {
    fn from(triggers: Vec<Trigger>) -> Self {
        Self { triggers }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NotificationStyle, OccurrenceKey, RecurrenceRule, ReminderSubject};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn sample_trigger() -> Trigger {
        let subject = ReminderSubject::medication(
            "Aspirin",
            RecurrenceRule::daily(["08:00".parse().unwrap()]).unwrap(),
        );
        let key = OccurrenceKey {
            date: NaiveDate::from_ymd_opt(2024, 1, 2).unwrap(),
            slot: "08:00".parse().unwrap(),
        };
        Trigger::scheduled(
            &subject,
            &key,
            Utc.with_ymd_and_hms(2024, 1, 2, 8, 0, 0).unwrap(),
            NotificationStyle::Regular,
        )
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("triggers.json");

        let trigger = sample_trigger();
        TriggerBook::from(vec![trigger.clone()]).save(&path).unwrap();

        let loaded = TriggerBook::load(&path).unwrap();
        assert_eq!(loaded.triggers, vec![trigger]);
    }

    #[test]
    fn test_load_nonexistent_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("nonexistent.json");

        let book = TriggerBook::load(&path).unwrap();
        assert!(book.triggers.is_empty());
        assert!(load_json::<TriggerBook>(&path).unwrap().is_none());
    }

    #[test]
    fn test_corrupted_book_returns_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("triggers.json");
        std::fs::write(&path, "{ invalid json }").unwrap();

        let book = TriggerBook::load(&path).unwrap();
        assert!(book.triggers.is_empty());
        assert!(load_json::<TriggerBook>(&path).is_err());
    }

    #[test]
    fn test_atomic_save_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("triggers.json");

        TriggerBook::default().save(&path).unwrap();

        assert!(path.exists());
        let extras: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "triggers.json")
            .collect();
        assert!(extras.is_empty(), "Unexpected files: {:?}", extras);
    }
}
