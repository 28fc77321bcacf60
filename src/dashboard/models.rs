use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::api::Device;
use crate::realtime::ConnectionState;
use crate::telemetry::HistoryPoint;

/// Liveness window when a device reports no interval.
const DEFAULT_LIVENESS_MS: i64 = 10_000;
/// Slack added on top of the device's reporting interval.
const LIVENESS_GRACE_MS: i64 = 5_000;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatCard {
    pub id: &'static str,
    pub title: &'static str,
    pub value: String,
    pub subtitle: &'static str,
}

/// One row of the live feed, already joined with its device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveFeedItem {
    pub id: String,
    pub device_id: i64,
    pub device_name: String,
    pub metric_name: String,
    pub value: String,
    pub unit: &'static str,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
    pub id: i64,
    pub name: String,
    pub device_type: String,
    pub live: bool,
    pub last_value: Option<f64>,
    pub unit: &'static str,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Chart series for one device, oldest point first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceChart {
    pub device_id: i64,
    pub title: String,
    pub unit: &'static str,
    pub points: Vec<HistoryPoint>,
}

/// Everything the dashboard renders in one pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardPayload {
    pub connection: ConnectionState,
    pub stat_cards: Vec<StatCard>,
    pub live_feed: Vec<LiveFeedItem>,
    pub devices: Vec<DeviceStatus>,
    pub generated_at: DateTime<Utc>,
}

impl DashboardPayload {
    pub fn live_count(&self) -> usize {
        self.devices.iter().filter(|d| d.live).count()
    }
}

/// Display unit for a device type, matched by case-insensitive substring.
pub fn unit_for_type(device_type: &str) -> &'static str {
    let lowered = device_type.to_lowercase();
    if lowered.contains("temp") {
        "°C"
    } else if lowered.contains("hum") {
        "%"
    } else if lowered.contains("press") {
        "bar"
    } else if lowered.contains("volt") {
        "V"
    } else {
        ""
    }
}

pub fn liveness_window(time_interval_secs: u32) -> Duration {
    if time_interval_secs == 0 {
        return Duration::milliseconds(DEFAULT_LIVENESS_MS);
    }
    Duration::milliseconds(i64::from(time_interval_secs) * 1000 + LIVENESS_GRACE_MS)
}

/// A device is live when it reported within its interval plus grace.
pub fn is_device_live(device: &Device, last_seen: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match last_seen {
        Some(seen) => now - seen < liveness_window(device.time_interval),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(time_interval: u32) -> Device {
        Device {
            id: 1,
            name: "boiler".to_string(),
            topic: String::new(),
            device_type: "Temperature".to_string(),
            time_interval,
            organization: String::new(),
            owner_identity: None,
        }
    }

    #[test]
    fn units_follow_device_type() {
        assert_eq!(unit_for_type("Temperature"), "°C");
        assert_eq!(unit_for_type("HUMIDITY"), "%");
        assert_eq!(unit_for_type("AirPressure"), "bar");
        assert_eq!(unit_for_type("Voltage"), "V");
        assert_eq!(unit_for_type("Door"), "");
    }

    #[test]
    fn liveness_uses_interval_plus_grace() {
        let now = Utc::now();
        let dev = device(5);
        assert!(is_device_live(&dev, Some(now - Duration::seconds(9)), now));
        assert!(!is_device_live(&dev, Some(now - Duration::seconds(10)), now));
    }

    #[test]
    fn liveness_defaults_to_ten_seconds() {
        let now = Utc::now();
        let dev = device(0);
        assert!(is_device_live(&dev, Some(now - Duration::milliseconds(9_999)), now));
        assert!(!is_device_live(&dev, Some(now - Duration::seconds(10)), now));
    }

    #[test]
    fn never_seen_is_not_live() {
        assert!(!is_device_live(&device(5), None, Utc::now()));
    }
}
