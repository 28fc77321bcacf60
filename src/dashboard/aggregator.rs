use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::access::AccessFacade;
use crate::api::Device;
use crate::realtime::ConnectionState;
use crate::telemetry::{time_of_day_label, TelemetryWindowCache};

use super::models::{
    is_device_live, unit_for_type, DashboardPayload, DeviceChart, DeviceStatus, LiveFeedItem,
    StatCard,
};

/// Joins the visible device set, the telemetry windows and the connection
/// state into render-ready payloads. Holds no state of its own.
pub struct DashboardAggregator<'a> {
    access: &'a AccessFacade,
    cache: &'a TelemetryWindowCache,
}

impl<'a> DashboardAggregator<'a> {
    pub fn new(access: &'a AccessFacade, cache: &'a TelemetryWindowCache) -> Self {
        Self { access, cache }
    }

    pub fn compose(&self, connection: ConnectionState, now: DateTime<Utc>) -> DashboardPayload {
        let devices = self.access.devices();
        let lookup: HashMap<i64, &Device> = devices.iter().map(|d| (d.id, d)).collect();

        DashboardPayload {
            connection,
            stat_cards: stat_cards(devices.len(), connection),
            live_feed: self.live_feed(&lookup),
            devices: devices
                .iter()
                .map(|device| self.device_status(device, now))
                .collect(),
            generated_at: now,
        }
    }

    /// Feed entries for visible devices only, newest first.
    fn live_feed(&self, lookup: &HashMap<i64, &Device>) -> Vec<LiveFeedItem> {
        self.cache
            .get_feed()
            .into_iter()
            .filter_map(|event| {
                let device_id = event.device_id?;
                let device = lookup.get(&device_id)?;
                Some(LiveFeedItem {
                    id: format!("feed-{}-{}", event.timestamp.timestamp_millis(), device_id),
                    device_id,
                    device_name: device.name.clone(),
                    metric_name: device.device_type.clone(),
                    value: event.value.display(),
                    unit: unit_for_type(&device.device_type),
                    time: time_of_day_label(event.timestamp),
                })
            })
            .collect()
    }

    fn device_status(&self, device: &Device, now: DateTime<Utc>) -> DeviceStatus {
        let last_seen = self.cache.last_seen(device.id);
        DeviceStatus {
            id: device.id,
            name: device.name.clone(),
            device_type: device.device_type.clone(),
            live: is_device_live(device, last_seen, now),
            last_value: self.cache.latest(device.id).map(|point| point.value),
            unit: unit_for_type(&device.device_type),
            last_seen,
        }
    }

    /// Chart series for a visible device; `None` when the actor cannot see it.
    pub fn chart_for(&self, device_id: i64) -> Option<DeviceChart> {
        let device = self.access.find(device_id)?;
        Some(DeviceChart {
            device_id,
            title: format!("{} ({})", device.name, device.device_type),
            unit: unit_for_type(&device.device_type),
            points: self.cache.get_history(device_id),
        })
    }
}

fn stat_cards(device_count: usize, connection: ConnectionState) -> Vec<StatCard> {
    vec![
        StatCard {
            id: "devs",
            title: "Devices",
            value: device_count.to_string(),
            subtitle: "Available",
        },
        StatCard {
            id: "status",
            title: "Status",
            value: connection.status_label().to_string(),
            subtitle: "Realtime hub",
        },
    ]
}
