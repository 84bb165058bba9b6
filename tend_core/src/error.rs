//! Error types for the tend_core library.

use crate::types::{SubjectId, TriggerId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for tend_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A recurrence rule or subject failed validation
    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    /// Expansion window is inverted or too long
    #[error("Invalid expansion window: {0}")]
    InvalidWindow(String),

    #[error("Subject not found: {0}")]
    SubjectNotFound(SubjectId),

    #[error("Trigger not found: {0}")]
    TriggerNotFound(TriggerId),

    /// Saving subjects failed; the in-memory store still holds the change
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// The engine task has shut down
    #[error("Engine is not running")]
    EngineStopped,

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Failure reported by a notification sink for a single call
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("notification permission denied")]
    PermissionDenied,

    #[error("sink unavailable: {0}")]
    Unavailable(String),

    #[error("sink IO failure: {0}")]
    Io(String),
}

impl From<Error> for SinkError {
    fn from(err: Error) -> Self {
        SinkError::Io(err.to_string())
    }
}

/// Which sink call failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkOperation {
    Schedule,
    Cancel,
}

impl fmt::Display for SinkOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkOperation::Schedule => f.write_str("schedule"),
            SinkOperation::Cancel => f.write_str("cancel"),
        }
    }
}

/// Per-trigger warning: the sink could not take this call.
///
/// The trigger stays in the engine's bookkeeping and is retried on the
/// next reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("delivery unavailable for {trigger_id} ({operation}): {reason}")]
pub struct DeliveryUnavailable {
    pub trigger_id: TriggerId,
    pub operation: SinkOperation,
    pub reason: String,
}
