use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use crate::api::{Device, DeviceSource};
use crate::identity::IdentityContext;
use crate::types::ClientError;

use super::filter::filter_visible;

/// The visible device set as last committed.
#[derive(Debug, Clone, Default)]
pub struct DeviceSnapshot {
    pub devices: Arc<Vec<Device>>,
    /// Bumped whenever the visible set actually changes.
    pub generation: u64,
}

struct FacadeShared {
    source: Arc<dyn DeviceSource>,
    identity: Arc<IdentityContext>,
    snapshot: watch::Sender<DeviceSnapshot>,
    loaded: AtomicBool,
    initial_load: Mutex<()>,
}

/// Process-wide cache of the devices the current actor may see.
///
/// `refresh` replaces the snapshot atomically; concurrent refreshes all run to
/// completion and the last one to finish wins.
#[derive(Clone)]
pub struct AccessFacade {
    shared: Arc<FacadeShared>,
}

impl AccessFacade {
    pub fn new(source: Arc<dyn DeviceSource>, identity: Arc<IdentityContext>) -> Self {
        let (snapshot, _) = watch::channel(DeviceSnapshot::default());
        Self {
            shared: Arc::new(FacadeShared {
                source,
                identity,
                snapshot,
                loaded: AtomicBool::new(false),
                initial_load: Mutex::new(()),
            }),
        }
    }

    /// Fetch all devices, filter for the current actor, and commit.
    /// On failure the previous snapshot is left untouched.
    pub async fn refresh(&self) -> Result<Arc<Vec<Device>>, ClientError> {
        let devices = match self.shared.source.fetch_devices().await {
            Ok(devices) => devices,
            Err(err) => {
                warn!(error = ?err, "Failed to refresh devices, keeping previous snapshot");
                return Err(err);
            }
        };

        let actor = self.shared.identity.actor();
        let visible = Arc::new(filter_visible(&devices, &actor));

        let changed = self.shared.snapshot.send_if_modified(|current| {
            if *current.devices == *visible {
                return false;
            }
            current.devices = visible.clone();
            current.generation += 1;
            true
        });
        self.shared.loaded.store(true, Ordering::Release);

        info!(
            total = devices.len(),
            visible = visible.len(),
            changed,
            "Refreshed visible devices"
        );
        Ok(visible)
    }

    /// Load once. Concurrent first callers share a single fetch.
    pub async fn ensure_loaded(&self) -> Result<Arc<Vec<Device>>, ClientError> {
        if self.is_loaded() {
            return Ok(self.devices());
        }
        let _guard = self.shared.initial_load.lock().await;
        if self.is_loaded() {
            return Ok(self.devices());
        }
        self.refresh().await
    }

    pub fn is_loaded(&self) -> bool {
        self.shared.loaded.load(Ordering::Acquire)
    }

    pub fn devices(&self) -> Arc<Vec<Device>> {
        self.shared.snapshot.borrow().devices.clone()
    }

    pub fn snapshot(&self) -> DeviceSnapshot {
        self.shared.snapshot.borrow().clone()
    }

    pub fn device_count(&self) -> usize {
        self.shared.snapshot.borrow().devices.len()
    }

    pub fn find(&self, device_id: i64) -> Option<Device> {
        self.shared
            .snapshot
            .borrow()
            .devices
            .iter()
            .find(|device| device.id == device_id)
            .cloned()
    }

    pub fn subscribe(&self) -> watch::Receiver<DeviceSnapshot> {
        self.shared.snapshot.subscribe()
    }

    /// Forget the snapshot, e.g. after sign-out.
    pub fn clear(&self) {
        self.shared.snapshot.send_modify(|current| {
            current.devices = Arc::new(Vec::new());
            current.generation += 1;
        });
        self.shared.loaded.store(false, Ordering::Release);
    }
}
