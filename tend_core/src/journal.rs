//! Resolved-trigger journal.
//!
//! Triggers pruned from the active set are appended to a JSONL file with
//! file locking, so reminder history survives after the engine forgets them.

use crate::{Result, Trigger};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Destination for triggers leaving the active set
pub trait TriggerJournal: Send {
    fn append(&mut self, trigger: &Trigger) -> Result<()>;
}

/// JSONL journal with file locking
pub struct JsonlJournal {
    path: PathBuf,
}

impl JsonlJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_parent_dir(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

impl TriggerJournal for JsonlJournal {
    fn append(&mut self, trigger: &Trigger) -> Result<()> {
        self.ensure_parent_dir()?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        file.lock_exclusive()?;

        let mut writer = std::io::BufWriter::new(&file);
        let line = serde_json::to_string(trigger)?;
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;

        file.unlock()?;

        tracing::debug!("Journaled {} ({})", trigger.id, trigger.state);
        Ok(())
    }
}

/// Journal that drops everything; used when no history is wanted
#[derive(Debug, Default)]
pub struct NullJournal;

impl TriggerJournal for NullJournal {
    fn append(&mut self, _trigger: &Trigger) -> Result<()> {
        Ok(())
    }
}

/// Read every journaled trigger, skipping lines that fail to parse
pub fn read_resolved(path: &Path) -> Result<Vec<Trigger>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let file = File::open(path)?;
    file.lock_shared()?;

    let reader = BufReader::new(&file);
    let mut triggers = Vec::new();

    for (line_num, line_result) in reader.lines().enumerate() {
        let line = line_result?;
        if line.trim().is_empty() {
            continue;
        }

        match serde_json::from_str::<Trigger>(&line) {
            Ok(trigger) => triggers.push(trigger),
            Err(e) => {
                tracing::warn!("Failed to parse journal entry at line {}: {}", line_num + 1, e);
            }
        }
    }

    file.unlock()?;
    tracing::debug!("Read {} journaled triggers", triggers.len());
    Ok(triggers)
}
