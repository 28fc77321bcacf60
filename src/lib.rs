pub mod access;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod identity;
pub mod realtime;
pub mod telemetry;
pub mod types;
