mod aggregator;
mod models;

pub use aggregator::DashboardAggregator;
pub use models::{
    is_device_live, liveness_window, unit_for_type, DashboardPayload, DeviceChart, DeviceStatus,
    LiveFeedItem, StatCard,
};
