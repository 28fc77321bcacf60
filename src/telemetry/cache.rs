use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::config::{Config, MalformedDevicePolicy};

use super::event::{HistoryPoint, TelemetryEvent};
use super::window::{HistoryWindow, RecencyFeed};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub feed_capacity: usize,
    pub history_capacity: usize,
    pub malformed_policy: MalformedDevicePolicy,
    pub sentinel_device_id: i64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for CacheSettings {
    fn from(config: &Config) -> Self {
        Self {
            feed_capacity: config.feed_capacity,
            history_capacity: config.history_capacity,
            malformed_policy: config.malformed_device_policy,
            sentinel_device_id: config.sentinel_device_id,
        }
    }
}

/// Published after every committed `on_event`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheUpdate {
    pub device_id: i64,
    /// Count of accepted events, including this one.
    pub sequence: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub accepted: u64,
    pub dropped: u64,
    pub devices: usize,
}

struct WindowState {
    feed: RecencyFeed<TelemetryEvent>,
    histories: HashMap<i64, HistoryWindow<HistoryPoint>>,
    last_seen: HashMap<i64, DateTime<Utc>>,
    accepted: u64,
    dropped: u64,
}

struct Shared {
    settings: CacheSettings,
    state: RwLock<WindowState>,
    updates: broadcast::Sender<CacheUpdate>,
}

/// Process-wide telemetry windows: one global newest-first feed and one
/// oldest-first history per device. Cloning shares the same state.
///
/// `on_event` is the only mutation and takes the write lock, so there is a
/// single writer at a time; every read returns an owned snapshot.
#[derive(Clone)]
pub struct TelemetryWindowCache {
    shared: Arc<Shared>,
}

impl TelemetryWindowCache {
    pub fn new(settings: CacheSettings) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let state = WindowState {
            feed: RecencyFeed::new(settings.feed_capacity),
            histories: HashMap::new(),
            last_seen: HashMap::new(),
            accepted: 0,
            dropped: 0,
        };
        Self {
            shared: Arc::new(Shared {
                settings,
                state: RwLock::new(state),
                updates,
            }),
        }
    }

    pub fn settings(&self) -> CacheSettings {
        self.shared.settings
    }

    /// Record one inbound event. Never fails and never panics.
    pub fn on_event(&self, mut event: TelemetryEvent) {
        let settings = self.shared.settings;
        let device_id = match (event.device_id, settings.malformed_policy) {
            (Some(id), _) => id,
            (None, MalformedDevicePolicy::Sentinel) => settings.sentinel_device_id,
            (None, MalformedDevicePolicy::Drop) => {
                self.write().dropped += 1;
                debug!("Dropped telemetry without a device id");
                return;
            }
        };
        event.device_id = Some(device_id);

        let point = HistoryPoint::from_event(&event);
        let received_at = event.received_at;

        let sequence = {
            let mut state = self.write();
            state.feed.push_newest(event);
            state
                .histories
                .entry(device_id)
                .or_insert_with(|| HistoryWindow::new(settings.history_capacity))
                .append(point);
            state.last_seen.insert(device_id, received_at);
            state.accepted += 1;
            state.accepted
        };

        // No subscribers is fine.
        let _ = self.shared.updates.send(CacheUpdate {
            device_id,
            sequence,
        });
    }

    /// Newest-first snapshot of the global feed.
    pub fn get_feed(&self) -> Vec<TelemetryEvent> {
        self.read().feed.snapshot()
    }

    /// Oldest-first snapshot of one device's history; empty for unknown ids.
    pub fn get_history(&self, device_id: i64) -> Vec<HistoryPoint> {
        self.read()
            .histories
            .get(&device_id)
            .map(HistoryWindow::snapshot)
            .unwrap_or_default()
    }

    pub fn latest(&self, device_id: i64) -> Option<HistoryPoint> {
        self.read()
            .histories
            .get(&device_id)
            .and_then(|window| window.latest().cloned())
    }

    pub fn last_seen(&self, device_id: i64) -> Option<DateTime<Utc>> {
        self.read().last_seen.get(&device_id).copied()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            accepted: state.accepted,
            dropped: state.dropped,
            devices: state.histories.len(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheUpdate> {
        self.shared.updates.subscribe()
    }

    fn read(&self) -> RwLockReadGuard<'_, WindowState> {
        self.shared
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WindowState> {
        self.shared
            .state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for TelemetryWindowCache {
    fn default() -> Self {
        Self::new(CacheSettings::default())
    }
}
