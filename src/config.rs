mod loader;
mod paths;
mod types;

pub use loader::{API_URL_ENV, HUB_URL_ENV};
pub use paths::CONFIG_PATH_ENV;
pub use types::{Config, MalformedDevicePolicy};
