use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum SampleFormat {
    Raw,
    Intermediate,
    Compressed,
    PngImage,
}

impl Default for SampleFormat {
    fn default() -> Self {
        SampleFormat::PngImage
    }
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 4] = [
        SampleFormat::Raw,
        SampleFormat::Intermediate,
        SampleFormat::Compressed,
        SampleFormat::PngImage,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SampleFormat::Raw => "Raw",
            SampleFormat::Intermediate => "Intermediate",
            SampleFormat::Compressed => "Compressed",
            SampleFormat::PngImage => "PngImage",
        }
    }

    /// Human label used by the operator view.
    pub fn label(&self) -> &'static str {
        match self {
            SampleFormat::Raw => "Raw Data",
            SampleFormat::Intermediate => "Intermediate",
            SampleFormat::Compressed => "WSQ Compressed",
            SampleFormat::PngImage => "PNG Image",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device-reported quality. `NotAvailable` is permanent for a record: it is
/// never backfilled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Quality {
    Score(u8),
    #[default]
    NotAvailable,
}

impl Quality {
    pub fn score(&self) -> Option<u8> {
        match self {
            Quality::Score(value) => Some(*value),
            Quality::NotAvailable => None,
        }
    }

    pub fn band(&self) -> Option<QualityBand> {
        self.score().map(QualityBand::from_score)
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quality::Score(value) => write!(f, "{value}%"),
            Quality::NotAvailable => f.write_str("N/A"),
        }
    }
}

impl Serialize for Quality {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Quality::Score(value) => serializer.serialize_u8(*value),
            Quality::NotAvailable => serializer.serialize_str("N/A"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum QualityBand {
    Poor,
    Fair,
    Good,
}

impl QualityBand {
    pub fn from_score(score: u8) -> Self {
        if score < 30 {
            QualityBand::Poor
        } else if score < 70 {
            QualityBand::Fair
        } else {
            QualityBand::Good
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum OpaqueData {
    Bytes(Vec<u8>),
    Structured(serde_json::Value),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "kind", content = "value")]
pub enum SamplePayload {
    /// A `data:image/...` URI ready for display.
    InlineImage(String),
    Opaque(OpaqueData),
    Absent,
}

impl SamplePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            SamplePayload::InlineImage(_) => "inline image",
            SamplePayload::Opaque(OpaqueData::Bytes(_)) => "opaque bytes",
            SamplePayload::Opaque(OpaqueData::Structured(_)) => "structured data",
            SamplePayload::Absent => "absent",
        }
    }

    /// Payload size as shown to the operator.
    pub fn size(&self) -> usize {
        match self {
            SamplePayload::InlineImage(uri) => uri.len(),
            SamplePayload::Opaque(OpaqueData::Bytes(bytes)) => bytes.len(),
            SamplePayload::Opaque(OpaqueData::Structured(value)) => value.to_string().len(),
            SamplePayload::Absent => 0,
        }
    }
}

/// One sample pulled out of a samples-acquired event, not yet accepted into
/// the session.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquiredSample {
    pub reader: String,
    pub payload: SamplePayload,
    pub quality: Quality,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRecord {
    pub sequence_id: u64,
    pub reader: String,
    pub payload: SamplePayload,
    pub format: SampleFormat,
    pub quality: Quality,
    pub captured_at: DateTime<Utc>,
}

impl SampleRecord {
    pub fn accept(
        sample: AcquiredSample,
        sequence_id: u64,
        format: SampleFormat,
        captured_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence_id,
            reader: sample.reader,
            payload: sample.payload,
            format,
            quality: sample.quality,
            captured_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_serializes_as_number_or_na() {
        assert_eq!(serde_json::to_string(&Quality::Score(87)).unwrap(), "87");
        assert_eq!(
            serde_json::to_string(&Quality::NotAvailable).unwrap(),
            "\"N/A\""
        );
    }

    #[test]
    fn band_thresholds() {
        assert_eq!(QualityBand::from_score(0), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(29), QualityBand::Poor);
        assert_eq!(QualityBand::from_score(30), QualityBand::Fair);
        assert_eq!(QualityBand::from_score(69), QualityBand::Fair);
        assert_eq!(QualityBand::from_score(70), QualityBand::Good);
        assert_eq!(Quality::NotAvailable.band(), None);
    }

    #[test]
    fn format_round_trips_through_settings_json() {
        let json = serde_json::to_string(&SampleFormat::PngImage).unwrap();
        assert_eq!(json, "\"pngImage\"");
        let back: SampleFormat = serde_json::from_str(&json).unwrap();
        assert_eq!(back, SampleFormat::PngImage);
    }
}
