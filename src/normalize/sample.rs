use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine,
};
use log::debug;
use serde_json::{Map, Value};

use crate::error::ClientError;
use crate::models::{AcquiredSample, OpaqueData, Quality, SampleFormat, SamplePayload};

use super::probe::FieldProbe;
use super::quality::SAMPLE_QUALITY;

const READER: FieldProbe = FieldProbe::new(&["reader", "deviceId", "DeviceId"]);
const SAMPLES: FieldProbe = FieldProbe::new(&["samples", "Samples"]);
const PAYLOAD: FieldProbe = FieldProbe::new(&["Data", "data", "imageData"]);

pub const UNKNOWN_READER: &str = "Unknown Device";
pub const IMAGE_URI_MARKER: &str = "data:image";
pub const PNG_URI_PREFIX: &str = "data:image/png;base64,";

/// Split a samples-acquired event into individual samples.
///
/// Rejects the whole event when the samples field is missing, is a string
/// that does not parse as JSON, or has any shape other than a list or a
/// single object. Nothing is produced for a rejected event.
pub fn normalize_samples(
    event: &Value,
    format: SampleFormat,
) -> Result<Vec<AcquiredSample>, ClientError> {
    let object = event
        .as_object()
        .ok_or_else(|| ClientError::InvalidPayload("event is not an object".into()))?;

    let reader = sample_reader(event);
    let elements = sample_elements(object)?;

    debug!(
        "samples event from {reader}: {} element(s), keys [{}]",
        elements.len(),
        object.keys().cloned().collect::<Vec<_>>().join(", ")
    );

    Ok(elements
        .iter()
        .map(|element| normalize_element(element, &reader, format))
        .collect())
}

/// Reader named by a samples-acquired event, whatever its samples hold.
pub fn sample_reader(event: &Value) -> String {
    event
        .as_object()
        .and_then(|object| READER.text(object))
        .unwrap_or_else(|| UNKNOWN_READER.to_string())
}

fn sample_elements(object: &Map<String, Value>) -> Result<Vec<Value>, ClientError> {
    match SAMPLES.find(object) {
        Some(Value::String(encoded)) => {
            let parsed: Value = serde_json::from_str(encoded).map_err(|err| {
                ClientError::InvalidPayload(format!("failed to parse samples string: {err}"))
            })?;
            match parsed {
                Value::Array(items) => Ok(items),
                Value::Object(_) => Ok(vec![parsed]),
                other => Err(ClientError::InvalidPayload(format!(
                    "samples string holds a {}, not a list or object",
                    json_kind(&other)
                ))),
            }
        }
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(single @ Value::Object(_)) => Ok(vec![single.clone()]),
        Some(other) => Err(ClientError::InvalidPayload(format!(
            "samples field is a {}",
            json_kind(other)
        ))),
        None => Err(ClientError::InvalidPayload(
            "no samples data found in event".into(),
        )),
    }
}

fn normalize_element(element: &Value, reader: &str, format: SampleFormat) -> AcquiredSample {
    let (payload, quality) = match element {
        Value::Object(object) => (
            PAYLOAD.find(object).map(|data| payload_from(data, format)),
            SAMPLE_QUALITY
                .find(object)
                .map(Quality::from_signal)
                .unwrap_or(Quality::NotAvailable),
        ),
        Value::String(_) => (Some(payload_from(element, format)), Quality::NotAvailable),
        _ => (None, Quality::NotAvailable),
    };

    AcquiredSample {
        reader: reader.to_string(),
        payload: payload.unwrap_or(SamplePayload::Absent),
        quality,
    }
}

fn payload_from(data: &Value, format: SampleFormat) -> SamplePayload {
    match data {
        Value::String(text) if text.is_empty() => SamplePayload::Absent,
        Value::String(text) if text.starts_with(IMAGE_URI_MARKER) => {
            SamplePayload::InlineImage(text.clone())
        }
        Value::String(text) => match format {
            SampleFormat::PngImage => SamplePayload::InlineImage(png_data_uri(text)),
            _ => SamplePayload::Opaque(OpaqueData::Bytes(
                decode_b64_url(text).unwrap_or_else(|| text.as_bytes().to_vec()),
            )),
        },
        Value::Null => SamplePayload::Absent,
        other => SamplePayload::Opaque(OpaqueData::Structured(other.clone())),
    }
}

/// Device services hand PNG samples over as base64url. Re-encode them as a
/// standard base64 data URI; when the text is not valid base64url, assume it
/// already is standard base64 and wrap it as-is.
pub fn png_data_uri(encoded: &str) -> String {
    match decode_b64_url(encoded) {
        Some(bytes) => format!("{PNG_URI_PREFIX}{}", STANDARD.encode(bytes)),
        None => {
            debug!("sample payload is not base64url; using it as image data directly");
            format!("{PNG_URI_PREFIX}{encoded}")
        }
    }
}

fn decode_b64_url(encoded: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(encoded.trim_end_matches('=')).ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_string_holding_a_single_object() {
        let event = json!({"samples": "{\"Data\":\"abc\",\"Quality\":\"87\"}"});
        let samples = normalize_samples(&event, SampleFormat::PngImage).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].quality, Quality::Score(87));
        assert_eq!(samples[0].reader, UNKNOWN_READER);
        assert!(matches!(samples[0].payload, SamplePayload::InlineImage(_)));
    }

    #[test]
    fn list_of_base64url_strings() {
        let encoded = URL_SAFE_NO_PAD.encode([0xfb_u8, 0xff, 0x01]);
        let event = json!({"reader": "R-1", "samples": [encoded, encoded]});
        let samples = normalize_samples(&event, SampleFormat::PngImage).unwrap();

        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].reader, "R-1");
        assert_eq!(
            samples[0].payload,
            SamplePayload::InlineImage(format!("{PNG_URI_PREFIX}+/8B"))
        );
        assert_eq!(samples[1].quality, Quality::NotAvailable);
    }

    #[test]
    fn single_object_is_wrapped() {
        let event = json!({"deviceId": "D9", "samples": {"imageData": "data:image/png;base64,AAAA", "score": 140}});
        let samples = normalize_samples(&event, SampleFormat::PngImage).unwrap();

        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].reader, "D9");
        assert_eq!(
            samples[0].payload,
            SamplePayload::InlineImage("data:image/png;base64,AAAA".into())
        );
        assert_eq!(samples[0].quality, Quality::Score(100));
    }

    #[test]
    fn undecodable_payload_is_kept_not_dropped() {
        let event = json!({"samples": [{"data": "not*base64!"}]});
        let samples = normalize_samples(&event, SampleFormat::PngImage).unwrap();

        assert_eq!(
            samples[0].payload,
            SamplePayload::InlineImage(format!("{PNG_URI_PREFIX}not*base64!"))
        );
    }

    #[test]
    fn malformed_events_are_rejected_whole() {
        let cases = [
            json!({"samples": 42}),
            json!({"samples": "not json"}),
            json!({"samples": "17"}),
            json!({"samples": null}),
            json!({"samples": true}),
            json!({}),
            json!("samples"),
            Value::Null,
        ];
        for event in cases {
            let result = normalize_samples(&event, SampleFormat::PngImage);
            assert!(
                matches!(result, Err(ClientError::InvalidPayload(_))),
                "{event} should be rejected"
            );
        }
    }

    #[test]
    fn reader_comes_from_the_event() {
        assert_eq!(sample_reader(&json!({"DeviceId": "R-7", "samples": []})), "R-7");
        assert_eq!(sample_reader(&json!({"samples": []})), UNKNOWN_READER);
        assert_eq!(sample_reader(&json!([1])), UNKNOWN_READER);
        assert!(normalize_samples(&json!({"samples": []}), SampleFormat::Raw)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn non_image_formats_keep_bytes() {
        let encoded = URL_SAFE_NO_PAD.encode(b"minutiae");
        let event = json!({"samples": [{"Data": encoded, "Quality": 3}]});
        let samples = normalize_samples(&event, SampleFormat::Intermediate).unwrap();

        assert_eq!(
            samples[0].payload,
            SamplePayload::Opaque(OpaqueData::Bytes(b"minutiae".to_vec()))
        );
        assert_eq!(samples[0].quality, Quality::Score(3));
    }

    #[test]
    fn structured_and_missing_payloads() {
        let event = json!({"samples": [{"Data": {"Header": 1}}, {"Quality": 50}, 7]});
        let samples = normalize_samples(&event, SampleFormat::Raw).unwrap();

        assert_eq!(
            samples[0].payload,
            SamplePayload::Opaque(OpaqueData::Structured(json!({"Header": 1})))
        );
        assert_eq!(samples[1].payload, SamplePayload::Absent);
        assert_eq!(samples[1].quality, Quality::Score(50));
        assert_eq!(samples[2].payload, SamplePayload::Absent);
    }
}
