//! Pure conversions from device-service payloads into the canonical model.

pub mod device;
pub mod probe;
pub mod quality;
pub mod sample;

pub use device::{normalize_device, normalize_device_with, raw_device_id, ConnectionPolicy};
pub use probe::FieldProbe;
pub use quality::normalize_quality_event;
pub use sample::{normalize_samples, sample_reader};
