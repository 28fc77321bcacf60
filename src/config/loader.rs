use std::env;
use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use crate::types::ClientError;

use super::{paths, Config};

pub const API_URL_ENV: &str = "FLEET_API_URL";
pub const HUB_URL_ENV: &str = "FLEET_HUB_URL";

impl Config {
    /// Load configuration from config.json
    /// Falls back to defaults if the file doesn't exist or can't be parsed
    pub async fn load() -> Self {
        let mut config = match Self::try_load().await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = ?err, "Failed to load config.json, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        info!(
            api = %config.api_base_url,
            hub = %config.hub_url(),
            feed = config.feed_capacity,
            history = config.history_capacity,
            "Loaded configuration"
        );
        config
    }

    async fn try_load() -> Result<Self, ClientError> {
        let config_path = paths::get_config_path()?;
        Self::load_from_path(&config_path).await
    }

    /// Read and validate a config file. A missing file yields the defaults.
    pub async fn load_from_path(path: &Path) -> Result<Self, ClientError> {
        if !path.exists() {
            warn!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .await
            .map_err(|err| ClientError::Config(format!("Failed to read config file: {err}")))?;

        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self, ClientError> {
        let config: Config = serde_json::from_str(contents)
            .map_err(|err| ClientError::Config(format!("Failed to parse config.json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.feed_capacity == 0 {
            return Err(ClientError::Config(
                "feed_capacity must be at least 1".to_string(),
            ));
        }
        if self.history_capacity == 0 {
            return Err(ClientError::Config(
                "history_capacity must be at least 1".to_string(),
            ));
        }
        if self.api_base_url.trim().is_empty() {
            return Err(ClientError::Config("api_base_url is empty".to_string()));
        }
        if self.telemetry_hub_url.trim().is_empty() {
            return Err(ClientError::Config("telemetry_hub_url is empty".to_string()));
        }
        if self.broadcast_group.trim().is_empty() {
            return Err(ClientError::Config("broadcast_group is empty".to_string()));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Some(value) = non_empty_env(API_URL_ENV) {
            self.api_base_url = value;
        }
        if let Some(value) = non_empty_env(HUB_URL_ENV) {
            self.telemetry_hub_url = value;
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
