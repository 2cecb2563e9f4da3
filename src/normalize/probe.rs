//! Ordered key probing over loosely-typed device payloads.
//!
//! Device services disagree on key casing (`DeviceId`, `deviceId`, `id`...).
//! Each canonical field owns one `FieldProbe` listing the keys to try, in
//! order. The first key that is present and not `null` wins.

use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy)]
pub struct FieldProbe {
    keys: &'static [&'static str],
}

impl FieldProbe {
    pub const fn new(keys: &'static [&'static str]) -> Self {
        Self { keys }
    }

    /// First non-null value under any probed key.
    pub fn find<'a>(&self, object: &'a Map<String, Value>) -> Option<&'a Value> {
        self.keys
            .iter()
            .filter_map(|key| object.get(*key))
            .find(|value| !value.is_null())
    }

    /// Same as [`find`](Self::find) but tolerates non-object input.
    pub fn find_in<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        value.as_object().and_then(|object| self.find(object))
    }

    /// First probed value that reads as a non-empty scalar string.
    pub fn text(&self, object: &Map<String, Value>) -> Option<String> {
        self.keys
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(scalar_text)
    }

    pub fn text_or(&self, object: &Map<String, Value>, default: &str) -> String {
        self.text(object).unwrap_or_else(|| default.to_string())
    }

    pub fn bool(&self, object: &Map<String, Value>) -> Option<bool> {
        self.keys
            .iter()
            .filter_map(|key| object.get(*key))
            .find_map(Value::as_bool)
    }
}

/// Strings and numbers read as text; empty strings count as absent.
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
