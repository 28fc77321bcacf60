use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::telemetry::TelemetryValue;

/// Read-through copy of a backend device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(rename = "type", default)]
    pub device_type: String,
    /// Expected reporting cadence in seconds.
    #[serde(default)]
    pub time_interval: u32,
    /// Empty when the device is unaffiliated.
    #[serde(rename = "company", default, deserialize_with = "null_as_empty")]
    pub organization: String,
    #[serde(
        rename = "ownerUserName",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_identity: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDetails {
    #[serde(flatten)]
    pub device: Device,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub registered_at: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub name: String,
    pub topic: String,
    #[serde(rename = "type")]
    pub device_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_user_name: Option<String>,
    pub time_interval: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserItem {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(rename = "type", default)]
    pub user_type: Option<String>,
    #[serde(default)]
    pub organization_name: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrganizationItem {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    pub confirm_password: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub role: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// A session token as handed to the identity context.
#[derive(Debug, Clone)]
pub struct TokenModel {
    pub access_token: String,
    pub expiration: Option<DateTime<Utc>>,
}

impl From<TokenResponse> for TokenModel {
    fn from(response: TokenResponse) -> Self {
        let expiration = response
            .expiration
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|parsed| parsed.with_timezone(&Utc));
        Self {
            access_token: response.token,
            expiration,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AssignOrganizationRequest<'a> {
    pub company_name: &'a str,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateOrganizationRequest<'a> {
    pub name: &'a str,
}

/// One stored telemetry sample returned by the history endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TelemetryPoint {
    #[serde(default)]
    pub id: i64,
    #[serde(alias = "timeStamp")]
    pub timestamp: String,
    #[serde(default)]
    pub value: TelemetryValue,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
