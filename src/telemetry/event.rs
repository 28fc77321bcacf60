use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// A primitive telemetry reading as it arrives on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum TelemetryValue {
    Number(f64),
    Bool(bool),
    Text(String),
    #[default]
    Missing,
}

impl TelemetryValue {
    pub fn from_json(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Number(number)) => number
                .as_f64()
                .map(TelemetryValue::Number)
                .unwrap_or(TelemetryValue::Missing),
            Some(Value::String(text)) => TelemetryValue::Text(text.clone()),
            Some(Value::Bool(flag)) => TelemetryValue::Bool(*flag),
            _ => TelemetryValue::Missing,
        }
    }

    /// Numeric coercion used for charting. Never fails: unparsable input is NaN.
    pub fn as_number(&self) -> f64 {
        match self {
            TelemetryValue::Number(number) => *number,
            TelemetryValue::Text(text) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
            TelemetryValue::Bool(true) => 1.0,
            TelemetryValue::Bool(false) => 0.0,
            TelemetryValue::Missing => f64::NAN,
        }
    }

    pub fn display(&self) -> String {
        match self {
            TelemetryValue::Number(number) => number.to_string(),
            TelemetryValue::Text(text) => text.clone(),
            TelemetryValue::Bool(flag) => flag.to_string(),
            TelemetryValue::Missing => "0".to_string(),
        }
    }
}

/// One inbound telemetry message. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    /// `None` when the payload carried no usable device id.
    pub device_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: TelemetryValue,
    pub timestamp: DateTime<Utc>,
    pub received_at: DateTime<Utc>,
}

impl TelemetryEvent {
    pub fn new(device_id: i64, value: TelemetryValue, timestamp: DateTime<Utc>) -> Self {
        Self {
            device_id: Some(device_id),
            name: None,
            kind: None,
            value,
            timestamp,
            received_at: timestamp,
        }
    }

    /// Decode a `telemetryMessage` argument. Malformed fields degrade, never fail.
    pub fn from_payload(payload: &Value, received_at: DateTime<Utc>) -> Self {
        let device_id = payload
            .get("deviceId")
            .and_then(parse_device_id)
            .or_else(|| payload.get("id").and_then(parse_device_id));

        let raw_timestamp = payload
            .get("timeStamp")
            .or_else(|| payload.get("timestamp"));
        let timestamp = match raw_timestamp.and_then(parse_timestamp_value) {
            Some(parsed) => parsed,
            None => {
                warn!(
                    raw = ?raw_timestamp,
                    "Telemetry timestamp missing or unparsable, using receive time"
                );
                received_at
            }
        };

        Self {
            device_id,
            name: string_field(payload, "name"),
            kind: string_field(payload, "type"),
            value: TelemetryValue::from_json(payload.get("value")),
            timestamp,
            received_at,
        }
    }
}

/// A chart point in a per-device history window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryPoint {
    /// Local time-of-day label.
    pub label: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl HistoryPoint {
    pub fn from_event(event: &TelemetryEvent) -> Self {
        Self {
            label: time_of_day_label(event.timestamp),
            timestamp: event.timestamp,
            value: event.value.as_number(),
        }
    }
}

pub fn time_of_day_label(timestamp: DateTime<Utc>) -> String {
    timestamp.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Parse RFC 3339, or zone-less ISO 8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn parse_timestamp_value(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(raw) => parse_timestamp(raw),
        Value::Number(millis) => millis
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}

fn parse_device_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number.as_i64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(payload: &Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}
