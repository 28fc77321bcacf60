use serde::{Deserialize, Serialize};

/// What to do with telemetry that arrives without a usable device id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedDevicePolicy {
    /// Bucket the event under `sentinel_device_id`.
    #[default]
    Sentinel,
    /// Discard the event and count it as dropped.
    Drop,
}

/// Configuration for the fleet telemetry client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_hub_url")]
    pub telemetry_hub_url: String,

    #[serde(default = "default_broadcast_group")]
    pub broadcast_group: String,

    #[serde(default = "default_feed_capacity")]
    pub feed_capacity: usize,

    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    #[serde(default)]
    pub malformed_device_policy: MalformedDevicePolicy,

    #[serde(default)]
    pub sentinel_device_id: i64,

    #[serde(default = "default_reconnect_delays")]
    pub reconnect_delays_ms: Vec<u64>,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    #[serde(default = "default_invocation_timeout")]
    pub invocation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            telemetry_hub_url: default_hub_url(),
            broadcast_group: default_broadcast_group(),
            feed_capacity: default_feed_capacity(),
            history_capacity: default_history_capacity(),
            malformed_device_policy: MalformedDevicePolicy::default(),
            sentinel_device_id: 0,
            reconnect_delays_ms: default_reconnect_delays(),
            request_timeout_secs: default_request_timeout(),
            poll_timeout_secs: default_poll_timeout(),
            invocation_timeout_secs: default_invocation_timeout(),
        }
    }
}

fn default_api_base_url() -> String {
    "http://localhost:5000/api".to_string()
}

fn default_hub_url() -> String {
    "/telemetryHub".to_string()
}

fn default_broadcast_group() -> String {
    "MainGroup".to_string()
}

fn default_feed_capacity() -> usize {
    100
}

fn default_history_capacity() -> usize {
    50
}

fn default_reconnect_delays() -> Vec<u64> {
    vec![0, 2_000, 10_000, 30_000]
}

fn default_request_timeout() -> u64 {
    10
}

fn default_poll_timeout() -> u64 {
    100
}

fn default_invocation_timeout() -> u64 {
    15
}
