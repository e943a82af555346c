//! Decoder for the current-space-weather JSON document
//!
//! The document carries one section per observation kind:
//!
//! ```json
//! {
//!   "xray":      { "time": "2024-01-18 12:00", "ball": 2, "description": "..." },
//!   "magnit":    { "time": "2024-01-18 12:00", "kp": 3, "description": "..." },
//!   "particles": { "time": "2024-01-18 12:00", "ball": 1, "description": "..." }
//! }
//! ```
//!
//! Each section becomes one record `{type, time, value, description}`. A
//! missing section still yields a record, with missing values.

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;

use crate::decoder::{DecodeError, Decoded, FieldValue, Record};

pub const FIELD_NAMES: [&str; 4] = ["type", "time", "value", "description"];

/// Section name and the key holding its value
const SECTIONS: [(&str, &str); 3] = [("xray", "ball"), ("magnit", "kp"), ("particles", "ball")];

const TIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

pub fn decode(raw: &str) -> Result<Decoded, DecodeError> {
    let document: Value =
        serde_json::from_str(raw).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let sections = document
        .as_object()
        .ok_or_else(|| DecodeError::Malformed("top-level value is not an object".to_string()))?;

    let records = SECTIONS
        .iter()
        .map(|(name, value_key)| {
            let section = sections.get(*name);

            let mut record = Record::new();
            record.push("type", FieldValue::Text(name.to_string()));
            record.push("time", time_value(field(section, "time")));
            record.push("value", number_value(field(section, value_key)));
            record.push("description", text_value(field(section, "description")));
            record
        })
        .collect();

    Ok(Decoded {
        records,
        field_names: FIELD_NAMES.iter().map(|n| n.to_string()).collect(),
    })
}

fn field<'a>(section: Option<&'a Value>, key: &str) -> Option<&'a Value> {
    section.and_then(|s| s.get(key))
}

fn number_value(value: Option<&Value>) -> FieldValue {
    match value {
        Some(Value::Number(n)) => n.as_f64().map_or(FieldValue::Missing, FieldValue::Number),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_or(FieldValue::Missing, FieldValue::Number),
        _ => FieldValue::Missing,
    }
}

fn text_value(value: Option<&Value>) -> FieldValue {
    match value {
        Some(Value::String(s)) if !s.trim().is_empty() => FieldValue::Text(s.trim().to_string()),
        Some(Value::Number(n)) => FieldValue::Text(n.to_string()),
        _ => FieldValue::Missing,
    }
}

/// Timestamps become [`FieldValue::Timestamp`]; other text is kept as is
fn time_value(value: Option<&Value>) -> FieldValue {
    match value {
        Some(Value::String(raw)) => match parse_timestamp(raw.trim()) {
            Some(ts) => FieldValue::Timestamp(ts),
            None => text_value(value),
        },
        _ => text_value(value),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.naive_utc());
    }
    TIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
}
