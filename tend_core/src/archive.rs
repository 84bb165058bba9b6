//! Reminder history archive.
//!
//! Rolls the resolved-trigger journal into an append-only CSV and renames
//! the journal aside, so a crash between the two never loses history.

use crate::{Result, Trigger};
use std::fs::OpenOptions;
use std::path::Path;

/// A row in the history CSV
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    trigger_id: String,
    subject_id: String,
    kind: String,
    title: String,
    body: String,
    firing_instant: String,
    state: String,
    fired_at: Option<String>,
    resolved_at: Option<String>,
}

impl From<&Trigger> for CsvRow {
    fn from(trigger: &Trigger) -> Self {
        CsvRow {
            trigger_id: trigger.id.to_string(),
            subject_id: trigger.subject_id.to_string(),
            kind: format!("{:?}", trigger.kind).to_lowercase(),
            title: trigger.payload.title.clone(),
            body: trigger.payload.body.clone(),
            firing_instant: trigger.firing_instant.to_rfc3339(),
            state: trigger.state.to_string(),
            fired_at: trigger.fired_at.map(|t| t.to_rfc3339()),
            resolved_at: trigger.resolved_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Append the journal's triggers to `csv_path`, then archive the journal.
///
/// The CSV is fsynced before the journal is renamed to `.wal.processed`.
/// Returns the number of triggers written.
pub fn wal_to_csv_and_archive(wal_path: &Path, csv_path: &Path) -> Result<usize> {
    let triggers = crate::journal::read_resolved(wal_path)?;

    if triggers.is_empty() {
        tracing::info!("No resolved triggers to roll up");
        return Ok(0);
    }

    if let Some(parent) = csv_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(csv_path)?;

    // Headers only for a fresh file
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);

    for trigger in &triggers {
        writer.serialize(CsvRow::from(trigger))?;
    }

    writer.flush()?;
    let file = writer
        .into_inner()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    file.sync_all()?;

    tracing::info!("Wrote {} triggers to {:?}", triggers.len(), csv_path);

    let processed_path = wal_path.with_extension("wal.processed");
    std::fs::rename(wal_path, &processed_path)?;

    tracing::info!("Archived journal to {:?}", processed_path);

    Ok(triggers.len())
}

/// Remove every `.processed` journal in `dir`
pub fn cleanup_processed(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut count = 0;
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();

        if path.extension().map(|ext| ext == "processed").unwrap_or(false) {
            std::fs::remove_file(&path)?;
            tracing::debug!("Removed processed journal: {:?}", path);
            count += 1;
        }
    }

    if count > 0 {
        tracing::info!("Cleaned up {} processed journals", count);
    }

    Ok(count)
}
