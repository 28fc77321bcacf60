use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::config::Config;
use crate::identity::IdentityContext;
use crate::types::ClientError;

use super::queries::{HistoryQuery, SimulationQuery};
use super::types::{
    AssignOrganizationRequest, CreateDeviceRequest, CreateOrganizationRequest, CreateUserRequest,
    Device, DeviceDetails, LoginRequest, OrganizationItem, RegisterRequest, TelemetryPoint,
    TokenModel, TokenResponse, UserItem,
};

/// Source of the full, unfiltered device list.
#[async_trait]
pub trait DeviceSource: Send + Sync {
    async fn fetch_devices(&self) -> Result<Vec<Device>, ClientError>;
}

/// Directory used to resolve a user's organization.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn fetch_users(&self) -> Result<Vec<UserItem>, ClientError>;
}

/// JSON REST client for the fleet backend.
/// Attaches the identity's bearer token to every request when one is present.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base_url: String,
    identity: Arc<IdentityContext>,
}

impl ApiClient {
    pub fn new(config: &Config, identity: Arc<IdentityContext>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            identity,
        })
    }

    pub fn identity(&self) -> &Arc<IdentityContext> {
        &self.identity
    }

    // --- Auth ---

    pub async fn login(&self, email: &str, password: &str) -> Result<TokenModel, ClientError> {
        let body = LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        };
        let response: TokenResponse = self.post_json("/Auth/Login", &body).await?;
        Ok(response.into())
    }

    pub async fn register(&self, request: &RegisterRequest) -> Result<(), ClientError> {
        self.send_unit(Method::POST, "/Auth/Register", Some(request))
            .await
    }

    // --- Devices ---

    pub async fn get_all_devices(&self) -> Result<Vec<Device>, ClientError> {
        self.get_json("/Devices").await
    }

    pub async fn get_device(&self, id: i64) -> Result<DeviceDetails, ClientError> {
        self.get_json(&format!("/Devices/{id}")).await
    }

    pub async fn create_device(&self, request: &CreateDeviceRequest) -> Result<(), ClientError> {
        self.send_unit(Method::POST, "/Devices", Some(request)).await
    }

    pub async fn update_device(
        &self,
        id: i64,
        request: &CreateDeviceRequest,
    ) -> Result<(), ClientError> {
        self.send_unit(Method::PUT, &format!("/Devices/{id}"), Some(request))
            .await
    }

    pub async fn delete_device(&self, id: i64) -> Result<(), ClientError> {
        self.send_unit::<()>(Method::DELETE, &format!("/Devices/{id}"), None)
            .await
    }

    // --- Users ---

    pub async fn get_users(&self) -> Result<Vec<UserItem>, ClientError> {
        self.get_json("/Users").await
    }

    pub async fn create_user(&self, request: &CreateUserRequest) -> Result<(), ClientError> {
        self.send_unit(Method::POST, "/Auth/Register", Some(request))
            .await
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), ClientError> {
        self.send_unit::<()>(Method::DELETE, &format!("/Users/{id}"), None)
            .await
    }

    pub async fn assign_organization(
        &self,
        user_id: &str,
        organization: &str,
    ) -> Result<(), ClientError> {
        let body = AssignOrganizationRequest {
            company_name: organization,
        };
        self.send_unit(Method::PUT, &format!("/Users/{user_id}/company"), Some(&body))
            .await
    }

    // --- Organizations ---

    pub async fn get_organizations(&self) -> Result<Vec<OrganizationItem>, ClientError> {
        self.get_json("/Companies").await
    }

    pub async fn create_organization(&self, name: &str) -> Result<OrganizationItem, ClientError> {
        self.post_json("/Companies", &CreateOrganizationRequest { name })
            .await
    }

    pub async fn delete_organization(&self, id: i64) -> Result<(), ClientError> {
        self.send_unit::<()>(Method::DELETE, &format!("/Companies/{id}"), None)
            .await
    }

    // --- Telemetry ---

    pub async fn get_telemetry_history(
        &self,
        device_id: i64,
        query: &HistoryQuery,
    ) -> Result<Vec<TelemetryPoint>, ClientError> {
        self.get_json_with_query(&format!("/Telemetry/{device_id}"), query)
            .await
    }

    // --- Simulation ---

    pub async fn start_all_simulation(&self) -> Result<(), ClientError> {
        let request = self.request(Method::GET, "/Simulation/StartAllSimulation");
        self.execute(request, "/Simulation/StartAllSimulation")
            .await
            .map(drop)
    }

    pub async fn stop_all_simulation(&self) -> Result<(), ClientError> {
        self.send_unit(
            Method::POST,
            "/Simulation/StopAllSimulation",
            Some(&serde_json::json!({})),
        )
        .await
    }

    pub async fn start_simulation(&self, device_id: i64) -> Result<(), ClientError> {
        self.simulation_command("/Simulation/StartSimulation", device_id)
            .await
    }

    pub async fn stop_simulation(&self, device_id: i64) -> Result<(), ClientError> {
        self.simulation_command("/Simulation/StopSimulation", device_id)
            .await
    }

    async fn simulation_command(&self, path: &str, device_id: i64) -> Result<(), ClientError> {
        let request = self
            .request(Method::POST, path)
            .query(&SimulationQuery { id: device_id })
            .json(&serde_json::json!({}));
        self.execute(request, path).await.map(drop)
    }

    // --- Verbs ---

    async fn get_json<T>(&self, path: &str) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        self.get_json_with_query(path, &()).await
    }

    async fn get_json_with_query<T, Q>(&self, path: &str, query: &Q) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let request = self.request(Method::GET, path).query(query);
        let response = self.execute(request, path).await?;
        response.json::<T>().await.map_err(ClientError::Http)
    }

    async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.request(Method::POST, path).json(body);
        let response = self.execute(request, path).await?;
        response.json::<T>().await.map_err(ClientError::Http)
    }

    /// Send a request whose response body is irrelevant.
    async fn send_unit<B>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> Result<(), ClientError>
    where
        B: Serialize + ?Sized,
    {
        let mut request = self.request(method, path);
        if let Some(body) = body {
            request = request.json(body);
        }
        self.execute(request, path).await.map(drop)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = join_url(&self.base_url, path);
        let request = self.http.request(method, url);
        match self.identity.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn execute(&self, request: RequestBuilder, path: &str) -> Result<Response, ClientError> {
        let response = request.send().await.map_err(ClientError::Http)?;
        let status = response.status();
        if !status.is_success() {
            warn!(path, status = %status, "Backend request failed");
            return Err(ClientError::Api(format!("{} returned {}", path, status)));
        }
        debug!(path, status = %status, "Backend request succeeded");
        Ok(response)
    }
}

#[async_trait]
impl DeviceSource for ApiClient {
    async fn fetch_devices(&self) -> Result<Vec<Device>, ClientError> {
        self.get_all_devices().await
    }
}

#[async_trait]
impl UserDirectory for ApiClient {
    async fn fetch_users(&self) -> Result<Vec<UserItem>, ClientError> {
        self.get_users().await
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_url_normalizes_slashes() {
        assert_eq!(join_url("http://h/api/", "/Devices"), "http://h/api/Devices");
        assert_eq!(join_url("http://h/api", "Devices/3"), "http://h/api/Devices/3");
    }

    #[test]
    fn bearer_token_is_attached_only_when_signed_in() {
        let identity = Arc::new(IdentityContext::new());
        let client = ApiClient::new(&Config::default(), identity.clone()).unwrap();

        let anonymous = client.request(Method::GET, "/Devices").build().unwrap();
        assert!(anonymous.headers().get("authorization").is_none());
        assert_eq!(anonymous.url().as_str(), "http://localhost:5000/api/Devices");

        identity.sign_in("abc", None);
        let authed = client.request(Method::GET, "/Devices").build().unwrap();
        assert_eq!(
            authed.headers().get("authorization").unwrap(),
            "Bearer abc"
        );
    }
}
