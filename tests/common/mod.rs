#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Notify};

use fleet_telemetry::api::{Device, DeviceSource};
use fleet_telemetry::identity::IdentityContext;
use fleet_telemetry::realtime::{
    ConnectionManager, ConnectionState, HubTransport, TransportEvent, TransportSession,
};
use fleet_telemetry::types::ClientError;

pub const WAIT: Duration = Duration::from_secs(2);

/// In-memory hub transport driven by the test.
#[derive(Default)]
pub struct ScriptedTransport {
    starts: AtomicUsize,
    stops: AtomicUsize,
    fail_start: AtomicBool,
    fail_invoke: AtomicBool,
    start_gate: Mutex<Option<Arc<Notify>>>,
    invoke_gate: Mutex<Option<Arc<Notify>>>,
    invocations: Mutex<Vec<(String, Vec<Value>)>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_invoke(&self, fail: bool) {
        self.fail_invoke.store(fail, Ordering::SeqCst);
    }

    /// Make the next `start` wait until the returned gate is notified.
    pub fn hold_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Make the next `invoke` record itself, then wait until the returned
    /// gate is notified.
    pub fn hold_next_invoke(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.invoke_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn invocations(&self) -> Vec<(String, Vec<Value>)> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn join_count(&self) -> usize {
        self.invocations()
            .iter()
            .filter(|(target, _)| target == "JoinGroup")
            .count()
    }

    /// Deliver an event as if it came from the server. Returns false when
    /// nobody is listening any more.
    pub async fn emit(&self, event: TransportEvent) -> bool {
        let sender = self.events.lock().unwrap().clone();
        match sender {
            Some(sender) => sender.send(event).await.is_ok(),
            None => false,
        }
    }

    pub async fn emit_telemetry(&self, payload: Value) -> bool {
        self.emit(TransportEvent::Invocation {
            target: "telemetryMessage".to_string(),
            arguments: vec![payload],
        })
        .await
    }
}

#[async_trait]
impl HubTransport for ScriptedTransport {
    async fn start(&self) -> Result<TransportSession, ClientError> {
        let attempt = self.starts.fetch_add(1, Ordering::SeqCst) + 1;
        let gate = self.start_gate.lock().unwrap().take();
        match gate {
            Some(gate) => gate.notified().await,
            None => tokio::task::yield_now().await,
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("negotiate refused".to_string()));
        }
        let (tx, events) = mpsc::channel(32);
        *self.events.lock().unwrap() = Some(tx);
        Ok(TransportSession {
            connection_id: format!("conn-{attempt}"),
            events,
        })
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientError> {
        self.invocations
            .lock()
            .unwrap()
            .push((target.to_string(), arguments));
        let gate = self.invoke_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_invoke.load(Ordering::SeqCst) {
            return Err(ClientError::Api(format!("{target} failed: no such group")));
        }
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.events.lock().unwrap().take();
    }
}

/// One scripted answer from the device backend.
pub struct Reply {
    pub delay: Duration,
    pub result: Result<Vec<Device>, String>,
}

impl Reply {
    pub fn ok(devices: Vec<Device>) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Ok(devices),
        }
    }

    pub fn err(message: &str) -> Self {
        Self {
            delay: Duration::ZERO,
            result: Err(message.to_string()),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// Device source answering from a queue; the last reply repeats.
pub struct ScriptedDevices {
    replies: Mutex<VecDeque<Reply>>,
    fallback: Vec<Device>,
    calls: AtomicUsize,
}

impl ScriptedDevices {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            fallback: Vec::new(),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn always(devices: Vec<Device>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: devices,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceSource for ScriptedDevices {
    async fn fetch_devices(&self) -> Result<Vec<Device>, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();
        let reply = reply.unwrap_or_else(|| Reply::ok(self.fallback.clone()).after(Duration::from_millis(10)));
        tokio::time::sleep(reply.delay).await;
        reply.result.map_err(ClientError::Api)
    }
}

pub fn device(id: i64, organization: &str, owner: Option<&str>) -> Device {
    Device {
        id,
        name: format!("device-{id}"),
        topic: format!("fleet/{id}"),
        device_type: "Temperature".to_string(),
        time_interval: 5,
        organization: organization.to_string(),
        owner_identity: owner.map(str::to_string),
    }
}

pub fn fleet() -> Vec<Device> {
    vec![
        device(1, "Acme", Some("alice")),
        device(2, "", Some("bob")),
        device(3, "Ware", Some("carol")),
    ]
}

pub fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.")
}

pub fn signed_in(user: &str, role: &str) -> Arc<IdentityContext> {
    let identity = Arc::new(IdentityContext::new());
    identity.sign_in(unsigned_token(&json!({"name": user, "role": role})), None);
    identity
}

pub async fn wait_for_state(manager: &ConnectionManager, expected: ConnectionState) {
    let mut status = manager.subscribe();
    tokio::time::timeout(WAIT, status.wait_for(|state| *state == expected))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected:?}"))
        .expect("status channel closed");
}

pub async fn wait_until(mut check: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
