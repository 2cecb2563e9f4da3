use serde_json::{Map, Value};

use crate::models::{device::UNKNOWN, DeviceDescriptor, DeviceDetails};

use super::probe::FieldProbe;

pub const DEVICE_ID: FieldProbe = FieldProbe::new(&["deviceId", "DeviceId", "id", "ID"]);
const NAME: FieldProbe = FieldProbe::new(&["name", "Name", "deviceName"]);
const KIND: FieldProbe = FieldProbe::new(&["type", "Type", "deviceType", "DeviceType"]);
const CONNECTED: FieldProbe = FieldProbe::new(&["connected", "Connected", "isConnected"]);
const STATUS: FieldProbe = FieldProbe::new(&["status", "Status"]);

const MANUFACTURER: FieldProbe = FieldProbe::new(&["manufacturer", "Manufacturer"]);
const MODEL: FieldProbe = FieldProbe::new(&["model", "Model", "modelName"]);
const SERIAL: FieldProbe = FieldProbe::new(&["serialNumber", "SerialNumber", "serial"]);
const FIRMWARE: FieldProbe = FieldProbe::new(&["firmwareVersion", "FirmwareVersion", "firmware"]);
const DRIVER: FieldProbe = FieldProbe::new(&["driverVersion", "DriverVersion", "driver"]);

pub const MISSING_ID: &str = "N/A";
pub const DEFAULT_KIND: &str = "Fingerprint Reader";

/// What to report when a device response says nothing about connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Enumeration success counts as evidence of a live device.
    AssumeConnected,
    AssumeDisconnected,
}

impl ConnectionPolicy {
    pub fn from_assumption(assume_connected: bool) -> Self {
        if assume_connected {
            ConnectionPolicy::AssumeConnected
        } else {
            ConnectionPolicy::AssumeDisconnected
        }
    }

    fn default_connected(self) -> bool {
        matches!(self, ConnectionPolicy::AssumeConnected)
    }
}

impl Default for ConnectionPolicy {
    fn default() -> Self {
        ConnectionPolicy::AssumeConnected
    }
}

/// Normalize one raw device response. Never fails: anything missing is
/// defaulted, `index` is the device's position in the enumeration.
pub fn normalize_device(raw: &Value, index: usize) -> DeviceDescriptor {
    normalize_device_with(raw, index, ConnectionPolicy::default())
}

pub fn normalize_device_with(
    raw: &Value,
    index: usize,
    policy: ConnectionPolicy,
) -> DeviceDescriptor {
    let empty = Map::new();
    let object = raw.as_object().unwrap_or(&empty);

    let id = DEVICE_ID.text_or(object, MISSING_ID);
    let details = DeviceDetails {
        manufacturer: MANUFACTURER.text_or(object, UNKNOWN),
        model: MODEL.text_or(object, UNKNOWN),
        serial_number: SERIAL.text(object).unwrap_or_else(|| match id.as_str() {
            MISSING_ID => UNKNOWN.to_string(),
            _ => id.clone(),
        }),
        firmware_version: FIRMWARE.text_or(object, UNKNOWN),
        driver_version: DRIVER.text_or(object, UNKNOWN),
    };

    DeviceDescriptor {
        name: NAME.text_or(object, &format!("Device {}", index + 1)),
        kind: KIND.text_or(object, DEFAULT_KIND),
        connected: connection_status(object).unwrap_or(policy.default_connected()),
        details,
        id,
        raw: raw.clone(),
    }
}

fn connection_status(object: &Map<String, Value>) -> Option<bool> {
    CONNECTED.bool(object).or_else(|| {
        STATUS
            .text(object)
            .map(|status| status.eq_ignore_ascii_case("connected"))
    })
}

/// Raw id of a device response, if it carries one.
pub fn raw_device_id(raw: &Value) -> Option<String> {
    raw.as_object().and_then(|object| DEVICE_ID.text(object))
}
