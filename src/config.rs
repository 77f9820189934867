//! Engine configuration
//!
//! Read from the process environment, optionally seeded from a `.env`
//! file. Everything has a default, so an empty environment is valid.

use chrono::Weekday;
use std::path::PathBuf;
use tracing::warn;

use crate::billing::StoreError;

/// Overrides the usage database location
pub const DB_PATH_VAR: &str = "ENTITLEMENTS_DB_PATH";

/// First day of the calendar week, e.g. `mon` or `sunday`
pub const WEEK_START_VAR: &str = "ENTITLEMENTS_WEEK_START";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitlementConfig {
    /// SQLite file holding counters and the trial start
    pub db_path: PathBuf,
    /// Day the full-access quota week begins on
    pub week_start: Weekday,
}

impl EntitlementConfig {
    /// Load from `.env` (if present) and the environment
    pub fn from_env() -> Result<Self, StoreError> {
        // Missing .env is fine
        let _ = dotenvy::dotenv();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, StoreError> {
        let db_path = match lookup(DB_PATH_VAR).filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => Self::default_db_path()?,
        };

        let week_start = match lookup(WEEK_START_VAR) {
            Some(raw) => raw.trim().parse::<Weekday>().unwrap_or_else(|_| {
                warn!(value = %raw, "Invalid {}, using Sunday", WEEK_START_VAR);
                Weekday::Sun
            }),
            None => Weekday::Sun,
        };

        Ok(Self {
            db_path,
            week_start,
        })
    }

    /// `~/.config/entitlements/usage.db` or the platform equivalent
    pub fn default_db_path() -> Result<PathBuf, StoreError> {
        dirs::config_dir()
            .map(|d| d.join("entitlements").join("usage.db"))
            .ok_or(StoreError::ConfigDirUnavailable)
    }
}
