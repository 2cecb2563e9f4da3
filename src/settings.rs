use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::models::SampleFormat;
use crate::utils::logging::DEFAULT_LOG_CAPACITY;

pub const CONFIG_ENV: &str = "FINGERPRINT_DEMO_CONFIG";
pub const DEBUG_ENV: &str = "FINGERPRINT_DEMO_DEBUG";
pub const DEFAULT_CONFIG_FILE: &str = "fingerprint-demo.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    pub sample_format: SampleFormat,
    /// How many of the most recent samples the operator view shows.
    pub history_display_limit: usize,
    pub log_capacity: usize,
    /// Dumps raw device payloads to the process log.
    pub debug: bool,
    /// Upper bound on a single device-service call. `None` waits forever.
    pub call_timeout_ms: Option<u64>,
    /// Report devices without a status field as connected.
    pub assume_connected_when_unreported: bool,
    pub export_dir: PathBuf,
    /// Samples the demo run waits for before stopping.
    pub sample_goal: usize,
    /// Optional device script replacing the built-in demo reader.
    pub device_script: Option<PathBuf>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            sample_format: SampleFormat::PngImage,
            history_display_limit: 12,
            log_capacity: DEFAULT_LOG_CAPACITY,
            debug: false,
            call_timeout_ms: None,
            assume_connected_when_unreported: true,
            export_dir: PathBuf::from("."),
            sample_goal: 3,
            device_script: None,
        }
    }
}

impl ClientSettings {
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var(DEBUG_ENV) {
            self.debug = value == "1" || value.eq_ignore_ascii_case("true");
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<ClientSettings>,
}

impl SettingsStore {
    /// Loads settings from `path`. A missing or unreadable JSON document
    /// yields defaults rather than an error.
    pub fn new(path: PathBuf) -> Result<Self> {
        let mut data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log::warn!(
                    "Ignoring invalid settings in {}: {err}; using defaults",
                    path.display()
                );
                ClientSettings::default()
            })
        } else {
            ClientSettings::default()
        };
        data.apply_env_overrides();

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    /// Settings from `$FINGERPRINT_DEMO_CONFIG`, or `fingerprint-demo.json`
    /// in the working directory.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var_os(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::new(path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self) -> Result<ClientSettings> {
        Ok(self.read()?.clone())
    }

    /// Apply `change` and persist the result.
    pub fn update<F>(&self, change: F) -> Result<ClientSettings>
    where
        F: FnOnce(&mut ClientSettings),
    {
        let mut guard = self.write()?;
        change(&mut guard);
        self.persist(&guard)?;
        Ok(guard.clone())
    }

    fn persist(&self, data: &ClientSettings) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, ClientSettings>> {
        self.data
            .read()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, ClientSettings>> {
        self.data
            .write()
            .map_err(|_| anyhow!("settings lock poisoned"))
    }
}
