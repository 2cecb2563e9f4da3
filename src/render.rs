//! Plain-text rendering of devices, session state and samples for the
//! terminal demo.

use base64::{engine::general_purpose::STANDARD, Engine};
use image::GenericImageView;

use crate::capture::ClientSnapshot;
use crate::models::{DeviceDescriptor, SamplePayload, SampleRecord};
use crate::utils::logging::LogEntry;

/// Display-ready view of one sample.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplePreview {
    pub sequence_id: u64,
    pub reader: String,
    pub format: &'static str,
    pub quality: String,
    pub payload_kind: &'static str,
    pub payload_size: usize,
    pub dimensions: Option<(u32, u32)>,
    pub captured_at: String,
}

impl SamplePreview {
    pub fn from_record(record: &SampleRecord) -> Self {
        let quality = match record.quality.band() {
            Some(band) => format!("{} ({band:?})", record.quality),
            None => record.quality.to_string(),
        };

        Self {
            sequence_id: record.sequence_id,
            reader: record.reader.clone(),
            format: record.format.label(),
            quality,
            payload_kind: record.payload.kind(),
            payload_size: record.payload.size(),
            dimensions: match &record.payload {
                SamplePayload::InlineImage(uri) => image_dimensions(uri),
                _ => None,
            },
            captured_at: record.captured_at.format("%H:%M:%S").to_string(),
        }
    }
}

impl std::fmt::Display for SamplePreview {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "#{} {} [{}] {} quality {} | {} {} bytes",
            self.sequence_id,
            self.captured_at,
            self.format,
            self.reader,
            self.quality,
            self.payload_kind,
            self.payload_size
        )?;
        if let Some((width, height)) = self.dimensions {
            write!(f, " | {width}x{height}")?;
        }
        Ok(())
    }
}

/// Pixel size of a base64 data-URI image, when it decodes.
pub fn image_dimensions(uri: &str) -> Option<(u32, u32)> {
    let (_, encoded) = uri.split_once(";base64,")?;
    let bytes = STANDARD.decode(encoded).ok()?;
    image::load_from_memory(&bytes)
        .ok()
        .map(|decoded| decoded.dimensions())
}

pub fn device_line(index: usize, device: &DeviceDescriptor) -> String {
    format!(
        "[{index}] {} | ID: {} | Type: {} | Status: {}",
        device.name,
        device.id,
        device.kind,
        device.status_text()
    )
}

pub fn device_list(devices: &[DeviceDescriptor]) -> String {
    if devices.is_empty() {
        return "No fingerprint devices found. Make sure your device is connected and drivers are installed.".to_string();
    }
    devices
        .iter()
        .enumerate()
        .map(|(index, device)| device_line(index, device))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn session_line(snapshot: &ClientSnapshot) -> String {
    let session = &snapshot.session;
    format!(
        "Service: {} | Capture: {:?} | Format: {} | Samples: {} | Last quality: {}",
        if snapshot.service_connected {
            "Connected"
        } else {
            "Disconnected"
        },
        session.state,
        session
            .format
            .map(|format| format.label())
            .unwrap_or("-"),
        session.sample_count,
        session.last_quality
    )
}

/// Previews in display order, newest first.
pub fn sample_grid(records: &[SampleRecord]) -> Vec<SamplePreview> {
    records.iter().rev().map(SamplePreview::from_record).collect()
}

pub fn log_line(entry: &LogEntry) -> String {
    format!(
        "{} [{}] {}",
        entry.timestamp.format("%H:%M:%S"),
        entry.level.as_str(),
        entry.message
    )
}
