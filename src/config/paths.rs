use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::ClientError;

use super::Config;

pub const CONFIG_PATH_ENV: &str = "FLEET_TELEMETRY_CONFIG";

impl Config {
    /// Resolve the hub endpoint.
    /// Absolute URLs are used verbatim, anything else is appended to the API base.
    pub fn hub_url(&self) -> String {
        let hub = self.telemetry_hub_url.trim();
        if hub.starts_with("http") {
            return hub.to_string();
        }
        format!(
            "{}/{}",
            self.api_base_url.trim_end_matches('/'),
            hub.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs.max(1))
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_secs(self.invocation_timeout_secs.max(1))
    }

    pub fn reconnect_delays(&self) -> Vec<Duration> {
        self.reconnect_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Get the path to the config.json file
/// An explicit FLEET_TELEMETRY_CONFIG wins; otherwise look in the app root
/// (parent of the directory holding the executable)
pub(super) fn get_config_path() -> Result<PathBuf, ClientError> {
    if let Ok(explicit) = env::var(CONFIG_PATH_ENV) {
        let trimmed = explicit.trim();
        if !trimmed.is_empty() {
            return Ok(PathBuf::from(trimmed));
        }
    }

    // Executable is at: app_root/bin/fleet-telemetry
    // Config should be at: app_root/config.json
    if let Ok(exe_path) = env::current_exe() {
        debug!(path = %exe_path.display(), "Executable path detected");

        if let Some(app_root) = exe_path.parent().and_then(|bin_dir| bin_dir.parent()) {
            let config_path = app_root.join("config.json");
            debug!(path = %config_path.display(), "Looking for config");
            if config_path.exists() {
                return Ok(config_path);
            }
        }
    }

    warn!("Using fallback: looking for config.json in current directory");
    Ok(PathBuf::from("config.json"))
}
