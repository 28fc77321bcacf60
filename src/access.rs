mod facade;
mod filter;

pub use facade::{AccessFacade, DeviceSnapshot};
pub use filter::{filter_visible, is_visible};
