// ⚙️ Configuration - Where the database, roster and calendar export live
//
// Layers, lowest first: defaults, JSON config file, ROSTER_SYNC_* environment
// variables, command-line flags (applied by the binaries).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_DATABASE: &str = "ROSTER_SYNC_DB";
pub const ENV_ROSTER: &str = "ROSTER_SYNC_ROSTER";
pub const ENV_CALENDAR: &str = "ROSTER_SYNC_CALENDAR";
pub const ENV_BIND: &str = "ROSTER_SYNC_BIND";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Authoritative roster (JSON groups or CSV)
    pub roster_path: PathBuf,

    /// JSON export of the calendar feed
    pub calendar_path: Option<PathBuf>,

    /// Address the HTTP server listens on
    pub bind_address: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: PathBuf::from("roster.db"),
            roster_path: PathBuf::from("roster.json"),
            calendar_path: None,
            bind_address: "127.0.0.1:3000".to_string(),
        }
    }
}

impl Config {
    /// Defaults, then `file` if given, then the process environment
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env(|key| std::env::var(key).ok()))
    }

    /// Missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// Overlay environment values; `lookup` stands in for `std::env::var`
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let value = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(db) = value(ENV_DATABASE) {
            self.database_path = PathBuf::from(db);
        }
        if let Some(roster) = value(ENV_ROSTER) {
            self.roster_path = PathBuf::from(roster);
        }
        if let Some(calendar) = value(ENV_CALENDAR) {
            self.calendar_path = Some(PathBuf::from(calendar));
        }
        if let Some(bind) = value(ENV_BIND) {
            self.bind_address = bind;
        }
        self
    }
}
