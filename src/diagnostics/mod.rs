//! Device detail reports and the JSON diagnostic export.
//!
//! The export schema is free-form and carries no compatibility promise.

mod system;

pub use system::SystemInfo;

use std::{fs, path::{Path, PathBuf}};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::models::{DeviceDescriptor, SampleFormat};

/// Everything known about one device, as shown in the detail view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceReport {
    pub descriptor: DeviceDescriptor,
    /// Enumeration response with any device-info fields merged over it.
    pub info: Value,
    pub supported_formats: Vec<SampleFormat>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiInfo {
    pub api_available: bool,
    pub client_version: &'static str,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticExport {
    pub timestamp: String,
    pub device_info: Option<DeviceReport>,
    pub system_info: SystemInfo,
    pub api_info: ApiInfo,
}

impl DiagnosticExport {
    pub fn new(device_info: Option<DeviceReport>, api_available: bool, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
            device_info,
            system_info: SystemInfo::collect(),
            api_info: ApiInfo {
                api_available,
                client_version: env!("CARGO_PKG_VERSION"),
            },
        }
    }

    pub fn file_name(now: DateTime<Utc>) -> String {
        format!("device-info-{}.json", now.timestamp_millis())
    }

    /// Write the export pretty-printed into `dir`; returns the file path.
    pub fn write_to(&self, dir: &Path, now: DateTime<Utc>) -> Result<PathBuf> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create export directory {}", dir.display()))?;
        let path = dir.join(Self::file_name(now));
        let serialized = serde_json::to_string_pretty(self)?;
        fs::write(&path, serialized)
            .with_context(|| format!("Failed to write diagnostics to {}", path.display()))?;
        Ok(path)
    }
}

/// Shallow merge: keys of `extra` win. Non-object inputs are left alone.
pub fn merge_info(base: &Value, extra: &Value) -> Value {
    match (base, extra) {
        (Value::Object(base), Value::Object(extra)) => {
            let mut merged = base.clone();
            for (key, value) in extra {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        _ => base.clone(),
    }
}
