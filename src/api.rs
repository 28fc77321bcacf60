mod client;
mod queries;
mod types;

pub(crate) use client::join_url;
pub use client::{ApiClient, DeviceSource, UserDirectory};
pub use queries::{HistoryQuery, HistoryRange};
pub use types::{
    CreateDeviceRequest, CreateUserRequest, Device, DeviceDetails, LoginRequest, OrganizationItem,
    RegisterRequest, TelemetryPoint, TokenModel, TokenResponse, UserItem,
};
