use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::reminder::ReminderSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("No home directory; set DAYBOOK_HOME")]
    NoHome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaybookConfig {
    /// Signed-in user. Absent means offline only.
    pub user_id: Option<String>,
    /// Directory backing the remote store.
    pub remote_dir: Option<String>,
    pub reminder_lead_minutes: Option<u64>,
    pub reminder_horizon_hours: Option<u64>,
    pub reminder_debounce_ms: Option<u64>,
}

impl DaybookConfig {
    pub fn reminder_settings(&self) -> ReminderSettings {
        let defaults = ReminderSettings::default();
        ReminderSettings {
            lead: self
                .reminder_lead_minutes
                .map(|minutes| Duration::from_secs(minutes * 60))
                .unwrap_or(defaults.lead),
            horizon: self
                .reminder_horizon_hours
                .map(|hours| Duration::from_secs(hours * 60 * 60))
                .unwrap_or(defaults.horizon),
            debounce: self
                .reminder_debounce_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.debounce),
        }
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn remote_dir(&self, home: &Path) -> PathBuf {
        match self
            .remote_dir
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
        {
            Some(dir) => PathBuf::from(dir),
            None => home.join("remote"),
        }
    }
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    for var in ["HOME", "USERPROFILE"] {
        if let Ok(value) = std::env::var(var) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(PathBuf::from(trimmed));
            }
        }
    }
    None
}

/// `$DAYBOOK_HOME`, else `~/.daybook`.
pub fn resolve_daybook_home() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("DAYBOOK_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".daybook"))
}

pub fn config_path(home: &Path) -> PathBuf {
    home.join("config.toml")
}

/// Directory backing the local store.
pub fn local_dir(home: &Path) -> PathBuf {
    home.join("local")
}

/// Missing or unreadable config yields defaults.
pub fn load_config(home: &Path) -> DaybookConfig {
    let path = config_path(home);
    if !path.is_file() {
        return DaybookConfig::default();
    }
    match fs::read_to_string(&path) {
        Ok(text) => toml::from_str(&text).unwrap_or_else(|err| {
            warn!(path = %path.display(), "ignoring unparsable config: {err}");
            DaybookConfig::default()
        }),
        Err(err) => {
            warn!(path = %path.display(), "ignoring unreadable config: {err}");
            DaybookConfig::default()
        }
    }
}

pub fn write_config(home: &Path, config: &DaybookConfig) -> Result<PathBuf, ConfigError> {
    fs::create_dir_all(home)?;
    let path = config_path(home);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

pub fn update_config(
    home: &Path,
    apply: impl FnOnce(&mut DaybookConfig),
) -> Result<DaybookConfig, ConfigError> {
    let mut config = load_config(home);
    apply(&mut config);
    write_config(home, &config)?;
    Ok(config)
}
