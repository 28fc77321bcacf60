use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::join_url;
use crate::config::Config;
use crate::identity::IdentityContext;
use crate::types::ClientError;

use super::protocol::{
    encode_invocation, handshake_request, parse_frames, HubMessage, NegotiateResponse,
};
use super::transport::{HubTransport, TransportEvent, TransportSession};

const EVENT_CHANNEL_CAPACITY: usize = 256;
/// Extra slack on top of the server's poll hold time.
const POLL_GRACE: Duration = Duration::from_secs(5);
/// Polls allowed before the handshake response must have arrived.
const HANDSHAKE_POLLS: usize = 3;

type Completion = oneshot::Sender<Result<(), String>>;

/// Hub transport over HTTP long polling with text frames.
///
/// `POST {hub}/negotiate` yields a connection token; messages go out with
/// `POST {hub}?id=` and arrive by repeatedly holding `GET {hub}?id=` open.
pub struct LongPollingTransport {
    shared: Arc<PollShared>,
}

struct PollShared {
    http: Client,
    hub_url: String,
    identity: Arc<IdentityContext>,
    poll_timeout: Duration,
    invocation_timeout: Duration,
    reconnect_delays: Vec<Duration>,
    token: Mutex<Option<String>>,
    pending: Mutex<HashMap<String, Completion>>,
    next_invocation: AtomicU64,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// How the poll loop continues after a batch of messages.
enum Flow {
    Continue,
    Reconnect(Option<String>),
    Close(Option<String>),
    /// The owner dropped the event receiver.
    Abandoned,
}

enum PollOutcome {
    Messages(Vec<HubMessage>),
    Ended,
}

impl LongPollingTransport {
    pub fn new(config: &Config, identity: Arc<IdentityContext>) -> Result<Self, ClientError> {
        let http = Client::builder()
            .connect_timeout(config.request_timeout())
            .build()
            .map_err(ClientError::Http)?;

        Ok(Self {
            shared: Arc::new(PollShared {
                http,
                hub_url: config.hub_url(),
                identity,
                poll_timeout: config.poll_timeout(),
                invocation_timeout: config.invocation_timeout(),
                reconnect_delays: config.reconnect_delays(),
                token: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                next_invocation: AtomicU64::new(0),
                worker: Mutex::new(None),
            }),
        })
    }

    pub fn hub_url(&self) -> &str {
        &self.shared.hub_url
    }
}

#[async_trait]
impl HubTransport for LongPollingTransport {
    async fn start(&self) -> Result<TransportSession, ClientError> {
        self.shared.halt_worker().await;

        let (connection_id, backlog) = self.shared.connect().await?;
        let (tx, events) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let worker = tokio::spawn(self.shared.clone().run(tx, backlog));
        *lock(&self.shared.worker) = Some(worker);

        Ok(TransportSession {
            connection_id,
            events,
        })
    }

    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientError> {
        let Some(token) = lock(&self.shared.token).clone() else {
            return Err(ClientError::Transport("hub is not connected".to_string()));
        };

        let invocation_id = self
            .shared
            .next_invocation
            .fetch_add(1, Ordering::Relaxed)
            .to_string();
        let (tx, rx) = oneshot::channel();
        lock(&self.shared.pending).insert(invocation_id.clone(), tx);

        let body = encode_invocation(&invocation_id, target, &arguments);
        if let Err(err) = self.shared.send(&token, body).await {
            lock(&self.shared.pending).remove(&invocation_id);
            return Err(err);
        }

        match tokio::time::timeout(self.shared.invocation_timeout, rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(ClientError::Api(format!("{target} failed: {message}"))),
            Ok(Err(_)) => Err(ClientError::Transport(format!(
                "connection closed before {target} completed"
            ))),
            Err(_) => {
                lock(&self.shared.pending).remove(&invocation_id);
                Err(ClientError::Transport(format!(
                    "timed out waiting for {target} to complete"
                )))
            }
        }
    }

    async fn stop(&self) {
        // The worker may be mid-reconnect; it must be gone before the token is read.
        self.shared.halt_worker().await;
        self.shared.fail_pending("connection stopped");

        let Some(token) = lock(&self.shared.token).take() else {
            return;
        };
        let request = self
            .shared
            .request(Method::DELETE, &self.shared.hub_url)
            .query(&[("id", token.as_str())])
            .timeout(POLL_GRACE);
        match request.send().await {
            Ok(response) => debug!(status = %response.status(), "Closed hub connection"),
            Err(err) => debug!(error = ?err, "Failed to close hub connection"),
        }
    }
}

impl PollShared {
    /// Negotiate, send the handshake and wait for its response.
    /// Returns the connection id and any messages that arrived with the handshake.
    async fn connect(&self) -> Result<(String, Vec<HubMessage>), ClientError> {
        let url = join_url(&self.hub_url, "negotiate");
        let response = self
            .request(Method::POST, &url)
            .query(&[("negotiateVersion", "1")])
            .timeout(self.poll_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("negotiate returned {status}")));
        }
        let negotiate: NegotiateResponse = response.json().await?;
        let (connection_id, token) = negotiate.into_connection()?;
        debug!(connection = %connection_id, "Negotiated hub connection");

        *lock(&self.token) = Some(token.clone());
        self.send(&token, handshake_request()).await?;

        for _ in 0..HANDSHAKE_POLLS {
            let messages = match self.poll_once(&token).await? {
                PollOutcome::Messages(messages) => messages,
                PollOutcome::Ended => {
                    return Err(ClientError::Transport(
                        "connection ended during handshake".to_string(),
                    ))
                }
            };
            let mut messages = messages.into_iter();
            match messages.next() {
                Some(HubMessage::HandshakeResponse { error: None }) => {
                    info!(connection = %connection_id, url = %self.hub_url, "Hub handshake complete");
                    return Ok((connection_id, messages.collect()));
                }
                Some(HubMessage::HandshakeResponse { error: Some(error) }) => {
                    return Err(ClientError::Protocol(format!("handshake rejected: {error}")));
                }
                Some(other) => {
                    return Err(ClientError::Protocol(format!(
                        "expected handshake response, got {other:?}"
                    )));
                }
                None => continue,
            }
        }
        Err(ClientError::Protocol(
            "no handshake response from server".to_string(),
        ))
    }

    async fn run(self: Arc<Self>, tx: mpsc::Sender<TransportEvent>, mut backlog: Vec<HubMessage>) {
        loop {
            let mut flow = Flow::Continue;
            for message in backlog.drain(..) {
                flow = self.dispatch(message, &tx).await;
                if !matches!(flow, Flow::Continue) {
                    break;
                }
            }

            if let Flow::Continue = flow {
                let token = lock(&self.token).clone();
                flow = match token {
                    None => Flow::Close(Some("connection token discarded".to_string())),
                    Some(token) => match self.poll_once(&token).await {
                        Ok(PollOutcome::Messages(messages)) => {
                            backlog = messages;
                            continue;
                        }
                        Ok(PollOutcome::Ended) => {
                            Flow::Reconnect(Some("server ended the connection".to_string()))
                        }
                        Err(err) => Flow::Reconnect(Some(err.to_string())),
                    },
                };
            }

            match flow {
                Flow::Continue => {}
                Flow::Abandoned => {
                    self.fail_pending("event receiver dropped");
                    return;
                }
                Flow::Close(error) => {
                    info!(error = error.as_deref().unwrap_or(""), "Hub connection closed");
                    self.fail_pending("connection closed");
                    let _ = tx.send(TransportEvent::Closed { error }).await;
                    return;
                }
                Flow::Reconnect(error) => {
                    warn!(error = error.as_deref().unwrap_or(""), "Hub connection lost");
                    self.fail_pending("connection lost");
                    if tx.send(TransportEvent::Reconnecting { error }).await.is_err() {
                        return;
                    }
                    match self.reconnect().await {
                        Ok((connection_id, messages)) => {
                            let event = TransportEvent::Reconnected { connection_id };
                            if tx.send(event).await.is_err() {
                                return;
                            }
                            backlog = messages;
                        }
                        Err(err) => {
                            warn!(error = ?err, "Giving up on hub connection");
                            *lock(&self.token) = None;
                            let event = TransportEvent::Closed {
                                error: Some(err.to_string()),
                            };
                            let _ = tx.send(event).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn dispatch(&self, message: HubMessage, tx: &mpsc::Sender<TransportEvent>) -> Flow {
        match message {
            HubMessage::Invocation {
                target, arguments, ..
            } => {
                let event = TransportEvent::Invocation { target, arguments };
                if tx.send(event).await.is_err() {
                    return Flow::Abandoned;
                }
            }
            HubMessage::Completion {
                invocation_id,
                error,
            } => {
                let waiter = lock(&self.pending).remove(&invocation_id);
                match waiter {
                    Some(waiter) => {
                        let _ = waiter.send(error.map_or(Ok(()), Err));
                    }
                    None => {
                        debug!(invocation = %invocation_id, "Completion for unknown invocation")
                    }
                }
            }
            HubMessage::Ping => {}
            HubMessage::Close {
                error,
                allow_reconnect,
            } => {
                return if allow_reconnect {
                    Flow::Reconnect(error)
                } else {
                    Flow::Close(error)
                };
            }
            HubMessage::HandshakeResponse { .. } => debug!("Ignoring repeated handshake response"),
            HubMessage::Other { message_type } => {
                debug!(message_type, "Ignoring unsupported hub message")
            }
        }
        Flow::Continue
    }

    async fn reconnect(&self) -> Result<(String, Vec<HubMessage>), ClientError> {
        let mut last_error = None;
        for (attempt, delay) in self.reconnect_delays.iter().enumerate() {
            tokio::time::sleep(*delay).await;
            info!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "Reconnecting to hub");
            match self.connect().await {
                Ok(connected) => return Ok(connected),
                Err(err) => {
                    warn!(attempt = attempt + 1, error = ?err, "Reconnect attempt failed");
                    last_error = Some(err);
                }
            }
        }
        Err(ClientError::Transport(match last_error {
            Some(err) => format!("reconnect attempts exhausted: {err}"),
            None => "automatic reconnect is disabled".to_string(),
        }))
    }

    async fn poll_once(&self, token: &str) -> Result<PollOutcome, ClientError> {
        let response = self
            .request(Method::GET, &self.hub_url)
            .query(&[("id", token)])
            .timeout(self.poll_timeout + POLL_GRACE)
            .send()
            .await?;

        match response.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(PollOutcome::Ended),
            status if status.is_success() => {
                let body = response.text().await?;
                let mut messages = Vec::new();
                for parsed in parse_frames(&body) {
                    match parsed {
                        Ok(message) => messages.push(message),
                        Err(err) => warn!(error = ?err, "Skipping malformed hub frame"),
                    }
                }
                Ok(PollOutcome::Messages(messages))
            }
            status => Err(ClientError::Transport(format!("poll returned {status}"))),
        }
    }

    async fn send(&self, token: &str, body: String) -> Result<(), ClientError> {
        let response = self
            .request(Method::POST, &self.hub_url)
            .query(&[("id", token)])
            .header(reqwest::header::CONTENT_TYPE, "text/plain;charset=UTF-8")
            .body(body)
            .timeout(self.poll_timeout)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Transport(format!("send returned {status}")));
        }
        Ok(())
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request = self.http.request(method, url);
        match self.identity.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Abort the poll loop and wait until it has actually stopped running.
    async fn halt_worker(&self) {
        let worker = lock(&self.worker).take();
        if let Some(worker) = worker {
            worker.abort();
            let _ = worker.await;
        }
    }

    fn fail_pending(&self, reason: &str) {
        let pending: Vec<Completion> = lock(&self.pending).drain().map(|(_, tx)| tx).collect();
        if !pending.is_empty() {
            debug!(count = pending.len(), reason, "Failing pending invocations");
        }
        for waiter in pending {
            let _ = waiter.send(Err(reason.to_string()));
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
