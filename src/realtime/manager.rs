use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::telemetry::{TelemetryEvent, TelemetryWindowCache};

use super::state::{ConnectionState, Trigger};
use super::transport::{HubTransport, TransportEvent, TransportSession};

pub const JOIN_GROUP_METHOD: &str = "JoinGroup";
pub const TELEMETRY_MESSAGE: &str = "telemetryMessage";
const SERVER_CONNECTED: &str = "Connected";
const SERVER_DISCONNECTED: &str = "Disconnected";
const ACKNOWLEDGE: &str = "AcknowledgeHappened";

struct Control {
    state: ConnectionState,
    /// Bumped on every start and stop; late results from an older epoch are ignored.
    epoch: u64,
    connection_id: Option<String>,
    pump: Option<JoinHandle<()>>,
    /// In-flight group rejoin after a resume. Runs beside the pump.
    rejoin: Option<JoinHandle<()>>,
}

struct ManagerShared {
    transport: Arc<dyn HubTransport>,
    cache: TelemetryWindowCache,
    group: String,
    status: watch::Sender<ConnectionState>,
    control: Mutex<Control>,
}

/// Owns the single realtime hub connection and feeds inbound telemetry into
/// the window cache. Clones share the same connection.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<ManagerShared>,
}

impl ConnectionManager {
    pub fn new(
        transport: Arc<dyn HubTransport>,
        cache: TelemetryWindowCache,
        group: impl Into<String>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(ManagerShared {
                transport,
                cache,
                group: group.into(),
                status,
                control: Mutex::new(Control {
                    state: ConnectionState::Disconnected,
                    epoch: 0,
                    connection_id: None,
                    pump: None,
                    rejoin: None,
                }),
            }),
        }
    }

    /// Connect and join the broadcast group.
    ///
    /// Only acts from `Disconnected` or `Error`; calls in any other state
    /// return immediately, so overlapping starts produce one attempt.
    pub async fn start(&self) {
        let epoch = {
            let mut control = self.shared.lock();
            if self.shared.transition(&mut control, Trigger::Start).is_none() {
                debug!(state = ?control.state, "Start ignored");
                return;
            }
            control.epoch += 1;
            control.epoch
        };

        let session = match self.shared.transport.start().await {
            Ok(session) => session,
            Err(err) => {
                error!(error = ?err, "Failed to start hub connection");
                let mut control = self.shared.lock();
                if control.epoch == epoch {
                    self.shared.transition(&mut control, Trigger::TransportFailed);
                }
                return;
            }
        };

        let TransportSession {
            connection_id,
            events,
        } = session;
        // Some(idle) when a stop arrived while connecting.
        let superseded = {
            let mut control = self.shared.lock();
            if control.epoch == epoch {
                self.shared
                    .transition(&mut control, Trigger::TransportStarted);
                control.connection_id = Some(connection_id.clone());
                control.pump = Some(tokio::spawn(self.shared.clone().pump(events, epoch)));
                None
            } else {
                Some(control.state == ConnectionState::Disconnected)
            }
        };
        if let Some(idle) = superseded {
            debug!("Hub connected after stop, discarding");
            // Only tear down if no newer start took over.
            if idle {
                self.shared.transport.stop().await;
            }
            return;
        }

        info!(connection = %connection_id, "Hub connection online");
        self.shared.join_group().await;
    }

    /// Tear down the connection. No reconnect follows.
    pub async fn stop(&self) {
        let (pump, rejoin) = {
            let mut control = self.shared.lock();
            if self.shared.transition(&mut control, Trigger::Stop).is_none() {
                debug!(state = ?control.state, "Stop ignored");
                return;
            }
            control.epoch += 1;
            control.connection_id = None;
            (control.pump.take(), control.rejoin.take())
        };
        for task in [pump, rejoin].into_iter().flatten() {
            task.abort();
        }
        self.shared.transport.stop().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.lock().state
    }

    pub fn status_label(&self) -> &'static str {
        self.state().status_label()
    }

    /// Watch state transitions. The current state is visible immediately.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.status.subscribe()
    }

    pub fn connection_id(&self) -> Option<String> {
        self.shared.lock().connection_id.clone()
    }

    pub fn cache(&self) -> &TelemetryWindowCache {
        &self.shared.cache
    }
}

impl ManagerShared {
    fn lock(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, control: &mut Control, trigger: Trigger) -> Option<ConnectionState> {
        let next = control.state.on(trigger)?;
        let previous = std::mem::replace(&mut control.state, next);
        self.status.send_replace(next);
        info!(from = %previous, to = %next, ?trigger, "Hub connection state changed");
        Some(next)
    }

    /// Apply `trigger` if `epoch` is still current.
    fn apply(&self, epoch: u64, trigger: Trigger) -> bool {
        let mut control = self.lock();
        control.epoch == epoch && self.transition(&mut control, trigger).is_some()
    }

    async fn join_group(&self) {
        let arguments = vec![Value::String(self.group.clone())];
        match self.transport.invoke(JOIN_GROUP_METHOD, arguments).await {
            Ok(()) => info!(group = %self.group, "Joined broadcast group"),
            Err(err) => warn!(group = %self.group, error = ?err, "Failed to join broadcast group"),
        }
    }

    /// Rejoin the group on a resumed connection without holding up the pump.
    fn spawn_rejoin(self: &Arc<Self>, epoch: u64, connection_id: String) {
        let mut control = self.lock();
        if control.epoch != epoch {
            return;
        }
        control.connection_id = Some(connection_id);
        if let Some(previous) = control.rejoin.take() {
            previous.abort();
        }
        let shared = self.clone();
        control.rejoin = Some(tokio::spawn(async move {
            let current = shared.lock().epoch == epoch;
            if current {
                shared.join_group().await;
            }
        }));
    }

    async fn pump(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>, epoch: u64) {
        while let Some(event) = events.recv().await {
            match event {
                TransportEvent::Invocation { target, arguments } => {
                    self.demux(epoch, &target, arguments)
                }
                TransportEvent::Reconnecting { error } => {
                    warn!(error = error.as_deref().unwrap_or(""), "Hub connection reconnecting");
                    self.apply(epoch, Trigger::TransportDropped);
                }
                TransportEvent::Reconnected { connection_id } => {
                    if self.apply(epoch, Trigger::TransportRestored) {
                        info!(connection = %connection_id, "Hub connection restored");
                        self.spawn_rejoin(epoch, connection_id);
                    }
                }
                TransportEvent::Closed { error } => {
                    warn!(error = error.as_deref().unwrap_or(""), "Hub connection closed");
                    self.apply(epoch, Trigger::TransportClosed);
                    return;
                }
            }
        }
        debug!("Hub event stream ended");
        self.apply(epoch, Trigger::TransportClosed);
    }

    fn demux(&self, epoch: u64, target: &str, arguments: Vec<Value>) {
        match target {
            TELEMETRY_MESSAGE => {
                let received_at = Utc::now();
                for payload in &arguments {
                    self.cache
                        .on_event(TelemetryEvent::from_payload(payload, received_at));
                }
            }
            SERVER_CONNECTED => {
                let connection_id = arguments.first().and_then(|v| v.as_str());
                info!(connection = connection_id.unwrap_or(""), "Server confirmed connection");
                if let Some(id) = connection_id {
                    let mut control = self.lock();
                    if control.epoch == epoch {
                        control.connection_id = Some(id.to_string());
                    }
                }
            }
            SERVER_DISCONNECTED => {
                let connection_id = arguments.first().and_then(|v| v.as_str());
                info!(connection = connection_id.unwrap_or(""), "Server reported disconnect");
            }
            ACKNOWLEDGE => debug!(arguments = arguments.len(), "Server acknowledged"),
            other => debug!(method = other, "Ignoring unknown hub method"),
        }
    }
}
