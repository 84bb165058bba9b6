use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use clap::{Parser, Subcommand};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tend_core::*;

#[derive(Parser)]
#[command(name = "tend")]
#[command(about = "Medication and appointment reminder scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Use this config file instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Pretend the current time is this RFC 3339 instant (for testing)
    #[arg(long, global = true, hide = true)]
    now: Option<DateTime<Utc>>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a medication reminder
    AddMedication {
        name: String,

        /// Time of day (HH:MM); repeat for several doses
        #[arg(long = "time", required = true)]
        times: Vec<TimeOfDay>,

        /// Dosage shown in the notification
        #[arg(long)]
        dosage: Option<String>,

        /// Only on these weekdays (e.g. mon,wed,fri)
        #[arg(long, value_delimiter = ',', conflicts_with_all = ["every_n_days", "day_of_month"])]
        days: Vec<Weekday>,

        /// Every N days, counted from --anchor (default today)
        #[arg(long, conflicts_with = "day_of_month")]
        every_n_days: Option<i64>,

        /// First day of an --every-n-days schedule (YYYY-MM-DD)
        #[arg(long, requires = "every_n_days")]
        anchor: Option<NaiveDate>,

        /// Once a month on this day (clamped to short months)
        #[arg(long)]
        day_of_month: Option<u32>,

        /// Remind this long before each dose (none, 10m, 30m, 1h, 2h, 1d)
        #[arg(long)]
        lead: Option<LeadTimePreset>,
    },

    /// Add a one-off appointment reminder
    AddAppointment {
        name: String,

        /// Local start time ("YYYY-MM-DD HH:MM") or an RFC 3339 instant
        #[arg(long)]
        at: String,

        /// Appointment type or location shown in the notification
        #[arg(long)]
        location: Option<String>,

        /// Remind this long before the start (none, 10m, 30m, 1h, 2h, 1d)
        #[arg(long, default_value = "1h")]
        lead: LeadTimePreset,
    },

    /// List reminder subjects
    List,

    /// List triggers (upcoming only unless --all)
    Triggers {
        #[arg(long)]
        all: bool,
    },

    /// Replace the times of day of a recurring reminder
    SetTimes {
        id: String,

        #[arg(long = "time", required = true)]
        times: Vec<TimeOfDay>,
    },

    /// Resume a reminder
    Enable { id: String },

    /// Pause a reminder and cancel its pending notifications
    Disable { id: String },

    /// Delete a reminder and cancel its pending notifications
    Delete { id: String },

    /// Run a reconciliation pass
    Sync,

    /// Report that a notification was delivered
    Fired { trigger_id: String },

    /// Acknowledge a delivered notification
    Ack { trigger_id: String },

    /// Roll up resolved triggers to the history CSV
    Rollup {
        /// Clean up processed journal files after rollup
        #[arg(long)]
        cleanup: bool,
    },
}

/// Files the CLI keeps under the data directory
struct DataPaths {
    subjects: PathBuf,
    triggers: PathBuf,
    outbox: PathBuf,
    wal_dir: PathBuf,
    journal: PathBuf,
    history: PathBuf,
}

impl DataPaths {
    fn new(data_dir: &Path) -> Self {
        let wal_dir = data_dir.join("wal");
        Self {
            subjects: data_dir.join("subjects.json"),
            triggers: data_dir.join("triggers.json"),
            outbox: data_dir.join("outbox.json"),
            journal: wal_dir.join("resolved_triggers.wal"),
            history: data_dir.join("reminder_history.csv"),
            wal_dir,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.verbose {
        tend_core::logging::init_with_level("info");
    } else {
        tend_core::logging::init();
    }

    let config = load_config(cli.config.as_deref())?;
    let data_dir = cli
        .data_dir
        .clone()
        .unwrap_or_else(|| config.data.data_dir.clone());
    let paths = DataPaths::new(&data_dir);

    if let Commands::Rollup { cleanup } = cli.command {
        return cmd_rollup(&paths, cleanup);
    }

    std::fs::create_dir_all(&paths.wal_dir)?;

    let tz = config.calendar.tz()?;
    let clock: Arc<dyn TimeSource> = match cli.now {
        Some(now) => Arc::new(FixedClock::with_timezone(now, tz)),
        None => Arc::new(SystemClock::new(tz)),
    };
    let outbox = Arc::new(OutboxSink::new(&paths.outbox));
    let book = TriggerBook::load(&paths.triggers)?;

    let handle = Engine::builder(
        clock.clone(),
        outbox.clone(),
        Box::new(JsonSubjectRepo::new(&paths.subjects)),
    )
    .schedule(config.schedule.clone())
    .style(config.notifications.style)
    .triggers(book.triggers)
    .journal(Box::new(JsonlJournal::new(&paths.journal)))
    .spawn()?;

    let ctx = Context {
        handle: &handle,
        clock: clock.as_ref(),
        config: &config,
        outbox: &outbox,
    };
    let result = run(cli.command, &ctx).await;

    // The trigger book is saved whatever the command's outcome
    handle.shutdown().await?;
    TriggerBook::from(handle.snapshot().triggers).save(&paths.triggers)?;

    result
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) if path.exists() => Config::load_from(path),
        Some(path) => {
            tracing::info!("No config file at {:?}, using defaults", path);
            Ok(Config::default())
        }
        None => Config::load(),
    }
}

struct Context<'a> {
    handle: &'a EngineHandle,
    clock: &'a dyn TimeSource,
    config: &'a Config,
    outbox: &'a OutboxSink,
}

async fn run(command: Commands, ctx: &Context<'_>) -> Result<()> {
    match command {
        Commands::AddMedication {
            name,
            times,
            dosage,
            days,
            every_n_days,
            anchor,
            day_of_month,
            lead,
        } => {
            let today = ctx.clock.local_date(ctx.clock.now());
            let rule = if !days.is_empty() {
                RecurrenceRule::weekly(days, times)?
            } else if let Some(every) = every_n_days {
                RecurrenceRule::interval(every, anchor.unwrap_or(today), times)?
            } else if let Some(day) = day_of_month {
                RecurrenceRule::monthly(day, times)?
            } else {
                RecurrenceRule::daily(times)?
            };

            let lead_minutes = lead
                .map(|l| l.minutes())
                .unwrap_or(ctx.config.schedule.medication_lead_minutes);
            let mut subject = ReminderSubject::medication(name, rule).with_lead_time(lead_minutes);
            if let Some(dosage) = dosage {
                subject = subject.with_detail(dosage);
            }
            cmd_add(ctx, subject).await
        }

        Commands::AddAppointment {
            name,
            at,
            location,
            lead,
        } => {
            let instant = parse_instant(&at, ctx.clock)?;
            let mut subject = ReminderSubject::appointment(name, RecurrenceRule::one_time(instant))
                .with_lead_time(lead.minutes());
            if let Some(location) = location {
                subject = subject.with_detail(location);
            }
            cmd_add(ctx, subject).await
        }

        Commands::List => {
            cmd_list(ctx);
            Ok(())
        }

        Commands::Triggers { all } => {
            cmd_triggers(ctx, all);
            Ok(())
        }

        Commands::SetTimes { id, times } => {
            let snapshot = ctx.handle.snapshot();
            let id = resolve_subject(&snapshot, &id)?;
            let subject = snapshot.subject(id).ok_or(Error::SubjectNotFound(id))?;
            let rule = subject.rule.with_times(times.into_iter().collect::<BTreeSet<_>>())?;

            let updated = ctx.handle.update(id, SubjectUpdate::rule(rule)).await?;
            println!("✓ {} now {}", updated.name, updated.rule.describe());
            print_pass(&ctx.handle.snapshot());
            Ok(())
        }

        Commands::Enable { id } => {
            let id = resolve_subject(&ctx.handle.snapshot(), &id)?;
            ctx.handle.set_enabled(id, true).await?;
            println!("✓ Enabled {}", id);
            print_pass(&ctx.handle.snapshot());
            Ok(())
        }

        Commands::Disable { id } => {
            let id = resolve_subject(&ctx.handle.snapshot(), &id)?;
            ctx.handle.set_enabled(id, false).await?;
            println!("✓ Disabled {}", id);
            print_pass(&ctx.handle.snapshot());
            Ok(())
        }

        Commands::Delete { id } => {
            let id = resolve_subject(&ctx.handle.snapshot(), &id)?;
            ctx.handle.delete(id).await?;
            println!("✓ Deleted {}", id);
            print_pass(&ctx.handle.snapshot());
            Ok(())
        }

        Commands::Sync => {
            let report = ctx.handle.reconcile().await?;
            println!(
                "✓ Reconciled: {} scheduled, {} cancelled",
                report.added, report.removed
            );
            if report.fired + report.missed + report.pruned > 0 {
                println!(
                    "  {} fired, {} missed, {} archived",
                    report.fired, report.missed, report.pruned
                );
            }
            print_warnings(&report);
            Ok(())
        }

        Commands::Fired { trigger_id } => {
            let id = TriggerId::from(trigger_id.as_str());
            ctx.outbox.take(&id).map_err(|e| Error::Other(e.to_string()))?;
            let transition = ctx.handle.fired(id.clone()).await?;
            print_transition(&id, transition);
            Ok(())
        }

        Commands::Ack { trigger_id } => {
            let id = TriggerId::from(trigger_id.as_str());
            let transition = ctx.handle.acknowledge(id.clone()).await?;
            print_transition(&id, transition);
            Ok(())
        }

        // Handled before the engine starts
        Commands::Rollup { .. } => Ok(()),
    }
}

async fn cmd_add(ctx: &Context<'_>, subject: ReminderSubject) -> Result<()> {
    let name = subject.name.clone();
    let description = subject.rule.describe();
    let id = ctx.handle.create(subject).await?;

    let snapshot = ctx.handle.snapshot();
    let upcoming = snapshot.triggers_for(id).filter(|t| t.state == TriggerState::Scheduled).count();
    println!("✓ Added {} ({})", name, description);
    println!("  ID: {}", id);
    println!("  {} reminders scheduled", upcoming);
    print_pass(&snapshot);
    Ok(())
}

fn cmd_list(ctx: &Context<'_>) {
    let snapshot = ctx.handle.snapshot();
    if snapshot.subjects.is_empty() {
        println!("No reminders yet.");
        return;
    }

    for subject in &snapshot.subjects {
        let status = if snapshot.is_quarantined(subject.id) {
            " [invalid]"
        } else if subject.enabled {
            ""
        } else {
            " [disabled]"
        };
        println!("{}  {}{}", subject.id, subject.name, status);
        if let Some(detail) = &subject.detail {
            println!("    {}", detail);
        }
        println!("    {:?}, {}", subject.kind, subject.rule.describe());
        if subject.lead_time_minutes > 0 {
            println!("    {} minutes early", subject.lead_time_minutes);
        }
    }
}

fn cmd_triggers(ctx: &Context<'_>, all: bool) {
    let snapshot = ctx.handle.snapshot();
    let tz = ctx.clock.timezone();

    let mut triggers: Vec<&Trigger> = if all {
        snapshot.triggers.iter().collect()
    } else {
        snapshot.upcoming()
    };
    triggers.sort_by_key(|t| t.firing_instant);

    if triggers.is_empty() {
        println!("No triggers.");
        return;
    }

    for trigger in triggers {
        println!(
            "{}  {:<12} {}  {}",
            trigger.firing_instant.with_timezone(&tz).format("%Y-%m-%d %H:%M"),
            trigger.state.to_string(),
            trigger.id,
            trigger.payload.body
        );
    }
}

fn cmd_rollup(paths: &DataPaths, cleanup: bool) -> Result<()> {
    if !paths.journal.exists() {
        println!("No journal found - nothing to roll up.");
        return Ok(());
    }

    let count = tend_core::archive::wal_to_csv_and_archive(&paths.journal, &paths.history)?;

    println!("✓ Rolled up {} resolved reminders to CSV", count);
    println!("  CSV: {}", paths.history.display());

    if cleanup {
        let cleaned = tend_core::archive::cleanup_processed(&paths.wal_dir)?;
        if cleaned > 0 {
            println!("✓ Cleaned up {} processed journal files", cleaned);
        }
    }

    Ok(())
}

/// Accept a full or unambiguous partial subject id
fn resolve_subject(snapshot: &Snapshot, input: &str) -> Result<SubjectId> {
    if let Ok(id) = input.parse::<SubjectId>() {
        return Ok(id);
    }

    let matches: Vec<SubjectId> = snapshot
        .subjects
        .iter()
        .map(|s| s.id)
        .filter(|id| id.to_string().starts_with(input.trim()))
        .collect();

    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::Other(format!("No reminder matches '{}'", input))),
        _ => Err(Error::Other(format!("'{}' matches several reminders", input))),
    }
}

fn parse_instant(input: &str, clock: &dyn TimeSource) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(input) {
        return Ok(instant.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input.trim(), format).ok())
        .map(|local| clock.resolve_local(local.date(), local.time()))
        .ok_or_else(|| {
            Error::InvalidRule(format!(
                "'{}' is not a \"YYYY-MM-DD HH:MM\" time or an RFC 3339 instant",
                input
            ))
        })
}

fn print_pass(snapshot: &Snapshot) {
    if let Some(report) = &snapshot.last_report {
        print_warnings(report);
    }
}

fn print_warnings(report: &PassReport) {
    if report.warnings.is_empty() {
        return;
    }
    eprintln!("⚠ {} notifications could not be updated; they will be retried:", report.warnings.len());
    for warning in &report.warnings {
        eprintln!("  - {}", warning);
    }
}

fn print_transition(id: &TriggerId, transition: Transition) {
    match transition {
        Transition::Applied { to, .. } => println!("✓ {} is now {}", id, to),
        Transition::Conflict { state } => println!("{} is already {}; nothing to do", id, state),
    }
}
