use serde::Serialize;
use serde_json::Value;

pub const UNKNOWN: &str = "Unknown";

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    pub manufacturer: String,
    pub model: String,
    pub serial_number: String,
    pub firmware_version: String,
    pub driver_version: String,
}

/// Canonical identity of one enumerated reader.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub kind: String,
    /// Defaults to `true` when the response carries no status field. That is
    /// a policy (a device that enumerated is taken to be live), not something
    /// the device service guarantees.
    pub connected: bool,
    pub details: DeviceDetails,
    /// The response exactly as the device service returned it.
    pub raw: Value,
}

impl DeviceDescriptor {
    pub fn status_text(&self) -> &'static str {
        if self.connected {
            "Connected"
        } else {
            "Disconnected"
        }
    }
}
