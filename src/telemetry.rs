mod cache;
mod event;
mod window;

pub use cache::{CacheSettings, CacheStats, CacheUpdate, TelemetryWindowCache};
pub use event::{parse_timestamp, time_of_day_label, HistoryPoint, TelemetryEvent, TelemetryValue};
pub use window::{HistoryWindow, RecencyFeed};
