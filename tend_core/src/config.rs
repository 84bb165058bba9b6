//! Configuration file support for Tend.
//!
//! Configuration is loaded from `$XDG_CONFIG_HOME/tend/config.toml`.

use crate::lifecycle::GracePolicy;
use crate::types::MAX_LEAD_MINUTES;
use crate::{Error, NotificationStyle, Result};
use chrono::Duration;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Longest grace period a fired reminder may wait for acknowledgment
pub const MAX_GRACE_MINUTES: i64 = 7 * 24 * 60;

/// Longest time resolved triggers are kept before pruning
pub const MAX_RETENTION_DAYS: i64 = 3650;

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub data: DataConfig,

    #[serde(default)]
    pub calendar: CalendarConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub notifications: NotificationConfig,
}

/// Data storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

/// The calendar every time of day is interpreted in
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalendarConfig {
    /// IANA timezone name, e.g. "Europe/London"
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
        }
    }
}

impl CalendarConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| Error::Config(format!("Unknown timezone: {}", self.timezone)))
    }
}

/// Horizon, grace periods and retention
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_horizon_days")]
    pub horizon_days: i64,

    #[serde(default = "default_medication_grace_minutes")]
    pub medication_grace_minutes: i64,

    #[serde(default = "default_appointment_grace_minutes")]
    pub appointment_grace_minutes: i64,

    /// Lead time given to newly added medications
    #[serde(default)]
    pub medication_lead_minutes: i64,

    #[serde(default = "default_history_retention_days")]
    pub history_retention_days: i64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            horizon_days: default_horizon_days(),
            medication_grace_minutes: default_medication_grace_minutes(),
            appointment_grace_minutes: default_appointment_grace_minutes(),
            medication_lead_minutes: 0,
            history_retention_days: default_history_retention_days(),
        }
    }
}

impl ScheduleConfig {
    pub fn horizon(&self) -> Duration {
        Duration::days(self.horizon_days)
    }

    pub fn grace_policy(&self) -> Result<GracePolicy> {
        let minutes = |value: i64, name: &str| {
            Duration::try_minutes(value)
                .ok_or_else(|| Error::Config(format!("{} is out of range", name)))
        };
        Ok(GracePolicy {
            medication: minutes(self.medication_grace_minutes, "medication_grace_minutes")?,
            appointment: minutes(self.appointment_grace_minutes, "appointment_grace_minutes")?,
            retention: Duration::try_days(self.history_retention_days)
                .ok_or_else(|| Error::Config("history_retention_days is out of range".into()))?,
        })
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=365).contains(&self.horizon_days) {
            return Err(Error::Config(format!(
                "horizon_days must be within 1..=365 (got {})",
                self.horizon_days
            )));
        }
        for (name, value) in [
            ("medication_grace_minutes", self.medication_grace_minutes),
            ("appointment_grace_minutes", self.appointment_grace_minutes),
        ] {
            if !(0..=MAX_GRACE_MINUTES).contains(&value) {
                return Err(Error::Config(format!(
                    "{} must be within 0..={} (got {})",
                    name, MAX_GRACE_MINUTES, value
                )));
            }
        }
        if !(0..=MAX_LEAD_MINUTES).contains(&self.medication_lead_minutes) {
            return Err(Error::Config(format!(
                "medication_lead_minutes must be within 0..={} (got {})",
                MAX_LEAD_MINUTES, self.medication_lead_minutes
            )));
        }
        if !(0..=MAX_RETENTION_DAYS).contains(&self.history_retention_days) {
            return Err(Error::Config(format!(
                "history_retention_days must be within 0..={} (got {})",
                MAX_RETENTION_DAYS, self.history_retention_days
            )));
        }
        Ok(())
    }
}

/// Notification presentation
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct NotificationConfig {
    #[serde(default)]
    pub style: NotificationStyle,
}

// Default value functions
fn default_data_dir() -> PathBuf {
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("tend")
}

fn default_timezone() -> String {
    "UTC".into()
}

fn default_horizon_days() -> i64 {
    60
}

fn default_medication_grace_minutes() -> i64 {
    120
}

fn default_appointment_grace_minutes() -> i64 {
    60
}

fn default_history_retention_days() -> i64 {
    7
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir()
            .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
            .unwrap_or_else(|| PathBuf::from("."));
        base.join("tend").join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        self.calendar.tz()?;
        self.schedule.validate()
    }

    /// Save the current configuration to the default path
    pub fn save(&self) -> Result<()> {
        let config_path = Self::default_config_path();
        self.save_to(&config_path)
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }
}
