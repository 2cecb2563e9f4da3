use serde_json::Value;

use crate::models::Quality;

use super::probe::FieldProbe;

pub const SAMPLE_QUALITY: FieldProbe = FieldProbe::new(&["Quality", "quality", "score"]);
const EVENT_QUALITY: FieldProbe =
    FieldProbe::new(&["quality", "Quality", "score", "value", "percentage", "level"]);

impl Quality {
    /// Read a device quality signal. Only numbers and numeric strings count;
    /// anything else is `NotAvailable`. Scores are clamped to `0..=100`.
    pub fn from_signal(value: &Value) -> Self {
        let raw = match value {
            Value::Number(number) => number
                .as_i64()
                .or_else(|| number.as_u64().map(|v| i64::try_from(v).unwrap_or(i64::MAX)))
                .or_else(|| number.as_f64().map(truncate_float)),
            Value::String(text) => parse_leading_int(text),
            _ => None,
        };

        match raw {
            Some(score) => Quality::Score(clamp_score(score)),
            None => Quality::NotAvailable,
        }
    }
}

/// Quality carried by a quality-reported event: either a bare number or one
/// of the usual keys.
pub fn normalize_quality_event(event: &Value) -> Quality {
    match event {
        Value::Number(_) => Quality::from_signal(event),
        Value::Object(object) => EVENT_QUALITY
            .find(object)
            .map(Quality::from_signal)
            .unwrap_or(Quality::NotAvailable),
        _ => Quality::NotAvailable,
    }
}

fn clamp_score(score: i64) -> u8 {
    // Bounded to 0..=100 so the cast is lossless.
    score.clamp(0, 100) as u8
}

fn truncate_float(value: f64) -> i64 {
    if value >= i64::MAX as f64 {
        i64::MAX
    } else if value <= i64::MIN as f64 {
        i64::MIN
    } else {
        value.trunc() as i64
    }
}

/// Optional sign followed by a run of digits; trailing text is ignored.
fn parse_leading_int(text: &str) -> Option<i64> {
    let trimmed = text.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let digits_len = rest.bytes().take_while(u8::is_ascii_digit).count();
    if digits_len == 0 {
        return None;
    }

    let magnitude = rest[..digits_len].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -magnitude } else { magnitude })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn numeric_signals_are_clamped() {
        assert_eq!(Quality::from_signal(&json!(87)), Quality::Score(87));
        assert_eq!(Quality::from_signal(&json!(150)), Quality::Score(100));
        assert_eq!(Quality::from_signal(&json!(-3)), Quality::Score(0));
        assert_eq!(Quality::from_signal(&json!(64.9)), Quality::Score(64));
        assert_eq!(Quality::from_signal(&json!(u64::MAX)), Quality::Score(100));
        assert_eq!(Quality::from_signal(&json!(1e300)), Quality::Score(100));
    }

    #[test]
    fn numeric_strings_read_like_parse_int() {
        assert_eq!(Quality::from_signal(&json!("87")), Quality::Score(87));
        assert_eq!(Quality::from_signal(&json!(" 42%")), Quality::Score(42));
        assert_eq!(Quality::from_signal(&json!("73.6")), Quality::Score(73));
        assert_eq!(Quality::from_signal(&json!("-20")), Quality::Score(0));
        assert_eq!(
            Quality::from_signal(&json!("99999999999999999999999")),
            Quality::Score(100)
        );
    }

    #[test]
    fn non_numeric_signals_are_not_available() {
        for value in [json!("good"), json!(""), json!(true), json!(null), json!([80]), json!({"q": 1})] {
            assert_eq!(Quality::from_signal(&value), Quality::NotAvailable, "{value}");
        }
    }

    #[test]
    fn quality_events_accept_several_shapes() {
        assert_eq!(normalize_quality_event(&json!(55)), Quality::Score(55));
        assert_eq!(normalize_quality_event(&json!({"quality": "12"})), Quality::Score(12));
        assert_eq!(normalize_quality_event(&json!({"percentage": 101})), Quality::Score(100));
        assert_eq!(normalize_quality_event(&json!({"level": null, "value": 9})), Quality::Score(9));
        assert_eq!(normalize_quality_event(&json!({"other": 1})), Quality::NotAvailable);
        assert_eq!(normalize_quality_event(&json!("80")), Quality::NotAvailable);
    }
}
