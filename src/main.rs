use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use fleet_telemetry::access::AccessFacade;
use fleet_telemetry::api::ApiClient;
use fleet_telemetry::config::Config;
use fleet_telemetry::dashboard::DashboardAggregator;
use fleet_telemetry::identity::IdentityContext;
use fleet_telemetry::realtime::{ConnectionManager, LongPollingTransport};
use fleet_telemetry::telemetry::{CacheSettings, TelemetryWindowCache};
use fleet_telemetry::types::ClientError;

const TOKEN_ENV: &str = "FLEET_TOKEN";
const EMAIL_ENV: &str = "FLEET_EMAIL";
const PASSWORD_ENV: &str = "FLEET_PASSWORD";
const SUMMARY_INTERVAL: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(err) = run().await {
        error!(error = ?err, "fleet-telemetry exited with an error");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ClientError> {
    let config = Config::load().await;
    config.validate()?;

    let identity = Arc::new(IdentityContext::new());
    let api = Arc::new(ApiClient::new(&config, identity.clone())?);
    sign_in(&api).await?;
    identity.hydrate(api.as_ref()).await;

    let access = AccessFacade::new(api.clone(), identity.clone());
    if let Err(err) = access.ensure_loaded().await {
        warn!(error = ?err, "Starting without a device list");
    }

    let cache = TelemetryWindowCache::new(CacheSettings::from(&config));
    let transport = Arc::new(LongPollingTransport::new(&config, identity.clone())?);
    let manager = ConnectionManager::new(transport, cache.clone(), config.broadcast_group.clone());

    let mut updates = cache.subscribe();
    let mut status = manager.subscribe();
    manager.start().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    let mut last_summary: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *status.borrow_and_update();
                info!(status = %state, "Hub status");
            }
            update = updates.recv() => match update {
                Ok(_) | Err(RecvError::Lagged(_)) => {
                    if last_summary.is_some_and(|at| at.elapsed() < SUMMARY_INTERVAL) {
                        continue;
                    }
                    last_summary = Some(Instant::now());
                    log_summary(&access, &cache, &manager);
                }
                Err(RecvError::Closed) => break,
            },
        }
    }

    manager.stop().await;
    Ok(())
}

async fn sign_in(api: &ApiClient) -> Result<(), ClientError> {
    if let Some(token) = env_value(TOKEN_ENV) {
        api.identity().sign_in(token, None);
        return Ok(());
    }

    let (Some(email), Some(password)) = (env_value(EMAIL_ENV), env_value(PASSWORD_ENV)) else {
        return Err(ClientError::Config(format!(
            "set {TOKEN_ENV}, or {EMAIL_ENV} and {PASSWORD_ENV}"
        )));
    };
    let token = api.login(&email, &password).await?;
    api.identity().sign_in(token.access_token, token.expiration);
    Ok(())
}

fn log_summary(access: &AccessFacade, cache: &TelemetryWindowCache, manager: &ConnectionManager) {
    let payload = DashboardAggregator::new(access, cache).compose(manager.state(), Utc::now());
    let stats = cache.stats();
    let latest = payload.live_feed.first();

    info!(
        status = %payload.connection,
        devices = payload.devices.len(),
        live = payload.live_count(),
        accepted = stats.accepted,
        dropped = stats.dropped,
        latest_device = latest.map(|item| item.device_name.as_str()).unwrap_or(""),
        latest_value = latest.map(|item| item.value.as_str()).unwrap_or(""),
        latest_unit = latest.map(|item| item.unit).unwrap_or(""),
        "Dashboard"
    );
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
