#![forbid(unsafe_code)]

//! Core scheduling engine for the Tend medication and appointment reminder system.
//!
//! This crate provides:
//! - Domain types (subjects, recurrence rules, triggers)
//! - Recurrence expansion over a calendar
//! - Trigger reconciliation against a notification sink
//! - Trigger lifecycle tracking (fired, acknowledged, missed)
//! - Persistence (subject store, trigger book, journal, CSV history)
//! - The single-writer engine task tying it together

pub mod types;
pub mod error;
pub mod rule;
pub mod time;
pub mod expander;
pub mod config;
pub mod logging;
pub mod state;
pub mod store;
pub mod lifecycle;
pub mod sink;
pub mod outbox;
pub mod scheduler;
pub mod journal;
pub mod archive;
pub mod engine;

// Re-export commonly used types
pub use error::{DeliveryUnavailable, Error, Result, SinkError, SinkOperation};
pub use types::*;
pub use rule::RecurrenceRule;
pub use time::{FixedClock, SystemClock, TimeSource};
pub use expander::{expand, Occurrence, Window};
pub use config::Config;
pub use state::TriggerBook;
pub use store::{JsonSubjectRepo, MemorySubjectRepo, SubjectRepo, SubjectStore, SubjectUpdate};
pub use lifecycle::{GracePolicy, LifecycleTracker, Transition};
pub use sink::{MemorySink, NotificationSink};
pub use outbox::OutboxSink;
pub use scheduler::{ApplyReport, ReconcilePlan, TriggerScheduler};
pub use journal::{JsonlJournal, TriggerJournal};
pub use engine::{spawn_periodic_reconcile, Engine, EngineBuilder, EngineHandle, PassReport, Snapshot};
