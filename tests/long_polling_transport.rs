mod common;

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use common::{wait_until, WAIT};
use fleet_telemetry::config::Config;
use fleet_telemetry::identity::IdentityContext;
use fleet_telemetry::realtime::{
    HubTransport, LongPollingTransport, TransportEvent, RECORD_SEPARATOR,
};
use fleet_telemetry::types::ClientError;

/// One scripted answer to a `GET` poll.
enum PollReply {
    Frames(String),
    End,
}

#[derive(Default)]
struct HubScript {
    negotiations: usize,
    fail_negotiate: bool,
    negotiate_delay: Duration,
    /// Frames delivered together with the handshake response.
    welcome: String,
    reject_invocations: Option<String>,
    outbox: HashMap<String, VecDeque<PollReply>>,
    sent: Vec<(String, String)>,
    deletes: Vec<String>,
}

/// Minimal long-polling hub on a local port. Every response closes its
/// connection, so each request arrives on a fresh socket.
#[derive(Clone)]
struct ScriptedHub {
    addr: SocketAddr,
    script: Arc<Mutex<HubScript>>,
}

impl ScriptedHub {
    async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let hub = Self {
            addr: listener.local_addr().unwrap(),
            script: Arc::new(Mutex::new(HubScript::default())),
        };
        let server = hub.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(server.clone().serve(stream));
            }
        });
        hub
    }

    fn config(&self, reconnect_delays_ms: &[u64]) -> Config {
        Config {
            api_base_url: format!("http://{}", self.addr),
            telemetry_hub_url: "/telemetryHub".to_string(),
            reconnect_delays_ms: reconnect_delays_ms.to_vec(),
            request_timeout_secs: 2,
            poll_timeout_secs: 2,
            invocation_timeout_secs: 2,
            ..Config::default()
        }
    }

    fn transport(&self, reconnect_delays_ms: &[u64]) -> LongPollingTransport {
        let identity = Arc::new(IdentityContext::new());
        LongPollingTransport::new(&self.config(reconnect_delays_ms), identity).unwrap()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, HubScript> {
        self.script.lock().unwrap()
    }

    fn push(&self, token: &str, reply: PollReply) {
        self.script()
            .outbox
            .entry(token.to_string())
            .or_default()
            .push_back(reply);
    }

    fn negotiations(&self) -> usize {
        self.script().negotiations
    }

    fn deletes(&self) -> Vec<String> {
        self.script().deletes.clone()
    }

    fn sent_on(&self, token: &str) -> Vec<String> {
        self.script()
            .sent
            .iter()
            .filter(|(t, _)| t == token)
            .map(|(_, body)| body.clone())
            .collect()
    }

    async fn serve(self, mut stream: TcpStream) {
        let Some((method, path, body)) = read_request(&mut stream).await else {
            return;
        };
        let (route, query) = path.split_once('?').unwrap_or((path.as_str(), ""));
        let token = query
            .split('&')
            .find_map(|pair| pair.strip_prefix("id="))
            .unwrap_or("")
            .to_string();

        let (status, reply) = match (method.as_str(), route.ends_with("/negotiate")) {
            ("POST", true) => self.negotiate().await,
            ("POST", false) => self.receive(&token, body),
            ("GET", _) => self.poll(&token).await,
            ("DELETE", _) => {
                self.script().deletes.push(token);
                ("202 Accepted", String::new())
            }
            _ => ("405 Method Not Allowed", String::new()),
        };

        let length = if status.starts_with("204") {
            String::new()
        } else {
            format!("Content-Length: {}\r\n", reply.len())
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\n{length}Connection: close\r\n\r\n{reply}"
        );
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
    }

    async fn negotiate(&self) -> (&'static str, String) {
        let (attempt, delay, fail) = {
            let mut script = self.script();
            script.negotiations += 1;
            (script.negotiations, script.negotiate_delay, script.fail_negotiate)
        };
        tokio::time::sleep(delay).await;
        if fail {
            return ("503 Service Unavailable", String::new());
        }

        let token = format!("t{attempt}");
        let welcome = std::mem::take(&mut self.script().welcome);
        self.push(&token, PollReply::Frames(format!("{{}}{RECORD_SEPARATOR}{welcome}")));
        let body = json!({
            "connectionId": format!("c{attempt}"),
            "connectionToken": token,
            "negotiateVersion": 1,
            "availableTransports": [
                {"transport": "LongPolling", "transferFormats": ["Text"]}
            ]
        });
        ("200 OK", body.to_string())
    }

    fn receive(&self, token: &str, body: String) -> (&'static str, String) {
        let rejection = self.script().reject_invocations.clone();
        for frame in body.split(RECORD_SEPARATOR).filter(|f| !f.is_empty()) {
            let Ok(message) = serde_json::from_str::<Value>(frame) else {
                continue;
            };
            if message["type"] != json!(1) {
                continue;
            }
            if let Some(id) = message["invocationId"].as_str() {
                let completion = match &rejection {
                    Some(error) => json!({"type": 3, "invocationId": id, "error": error}),
                    None => json!({"type": 3, "invocationId": id}),
                };
                self.push(token, PollReply::Frames(format!("{completion}{RECORD_SEPARATOR}")));
            }
        }
        self.script().sent.push((token.to_string(), body));
        ("200 OK", String::new())
    }

    async fn poll(&self, token: &str) -> (&'static str, String) {
        let next = self
            .script()
            .outbox
            .get_mut(token)
            .and_then(|queue| queue.pop_front());
        match next {
            Some(PollReply::Frames(frames)) => ("200 OK", frames),
            Some(PollReply::End) => ("204 No Content", String::new()),
            None => {
                tokio::time::sleep(Duration::from_millis(20)).await;
                ("200 OK", String::new())
            }
        }
    }
}

async fn read_request(stream: &mut TcpStream) -> Option<(String, String, String)> {
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 1024];
    let header_end = loop {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            return None;
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buffer.len() < header_end + content_length {
        let read = stream.read(&mut chunk).await.ok()?;
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    let mut request_line = head.lines().next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let body = String::from_utf8_lossy(&buffer[header_end..]).to_string();
    Some((method, path, body))
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> Option<TransportEvent> {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("no hub event in time")
}

fn telemetry_frame(device_id: i64) -> String {
    let frame = json!({
        "type": 1,
        "target": "telemetryMessage",
        "arguments": [{"deviceId": device_id}]
    });
    format!("{frame}{RECORD_SEPARATOR}")
}

fn telemetry_event(device_id: i64) -> TransportEvent {
    TransportEvent::Invocation {
        target: "telemetryMessage".to_string(),
        arguments: vec![json!({"deviceId": device_id})],
    }
}

#[tokio::test]
async fn handshake_backlog_and_polls_are_delivered_in_order() {
    let hub = ScriptedHub::spawn().await;
    hub.script().welcome = telemetry_frame(4);
    let transport = hub.transport(&[10]);

    let mut session = transport.start().await.unwrap();
    assert_eq!(session.connection_id, "c1");
    assert_eq!(hub.sent_on("t1"), vec![format!(r#"{{"protocol":"json","version":1}}{RECORD_SEPARATOR}"#)]);

    hub.push("t1", PollReply::Frames(telemetry_frame(5)));

    assert_eq!(next_event(&mut session.events).await, Some(telemetry_event(4)));
    assert_eq!(next_event(&mut session.events).await, Some(telemetry_event(5)));
    transport.stop().await;
}

#[tokio::test]
async fn invoke_resolves_on_completion() {
    let hub = ScriptedHub::spawn().await;
    let transport = hub.transport(&[10]);
    let _session = transport.start().await.unwrap();

    transport
        .invoke("JoinGroup", vec![json!("MainGroup")])
        .await
        .unwrap();

    let sent = hub.sent_on("t1");
    assert_eq!(sent.len(), 2);
    let invocation: Value = serde_json::from_str(sent[1].trim_end_matches(RECORD_SEPARATOR)).unwrap();
    assert_eq!(invocation["target"], "JoinGroup");
    assert_eq!(invocation["arguments"], json!(["MainGroup"]));
    transport.stop().await;
}

#[tokio::test]
async fn rejected_invocation_reports_the_server_error() {
    let hub = ScriptedHub::spawn().await;
    hub.script().reject_invocations = Some("no such group".to_string());
    let transport = hub.transport(&[10]);
    let _session = transport.start().await.unwrap();

    let err = transport
        .invoke("JoinGroup", vec![json!("Nowhere")])
        .await
        .unwrap_err();

    assert!(matches!(&err, ClientError::Api(message) if message.contains("no such group")));
    transport.stop().await;
}

#[tokio::test]
async fn ended_poll_reconnects_with_a_fresh_token() {
    let hub = ScriptedHub::spawn().await;
    let transport = hub.transport(&[10]);
    let mut session = transport.start().await.unwrap();

    hub.push("t1", PollReply::End);

    assert!(matches!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Reconnecting { error: Some(_) })
    ));
    assert_eq!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Reconnected {
            connection_id: "c2".to_string()
        })
    );
    assert_eq!(hub.negotiations(), 2);

    transport
        .invoke("JoinGroup", vec![json!("MainGroup")])
        .await
        .unwrap();
    assert_eq!(hub.sent_on("t2").len(), 2);
    assert_eq!(hub.sent_on("t1").len(), 1);
    transport.stop().await;
    assert_eq!(hub.deletes(), vec!["t2".to_string()]);
}

#[tokio::test]
async fn exhausted_reconnects_close_the_session() {
    let hub = ScriptedHub::spawn().await;
    let transport = hub.transport(&[10, 10]);
    let mut session = transport.start().await.unwrap();

    hub.script().fail_negotiate = true;
    hub.push("t1", PollReply::End);

    assert!(matches!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Reconnecting { .. })
    ));
    match next_event(&mut session.events).await {
        Some(TransportEvent::Closed { error: Some(error) }) => {
            assert!(error.contains("exhausted"), "{error}")
        }
        other => panic!("expected Closed, got {other:?}"),
    }
    assert_eq!(next_event(&mut session.events).await, None);
    assert_eq!(hub.negotiations(), 3);

    let err = transport.invoke("JoinGroup", vec![]).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn stop_during_reconnect_discards_the_session() {
    let hub = ScriptedHub::spawn().await;
    let transport = hub.transport(&[10]);
    let mut session = transport.start().await.unwrap();

    hub.script().negotiate_delay = Duration::from_millis(300);
    hub.push("t1", PollReply::End);
    assert!(matches!(
        next_event(&mut session.events).await,
        Some(TransportEvent::Reconnecting { .. })
    ));
    wait_until(|| hub.negotiations() == 2).await;

    transport.stop().await;

    assert_eq!(next_event(&mut session.events).await, None);
    assert_eq!(hub.deletes(), vec!["t1".to_string()]);
    let err = transport.invoke("JoinGroup", vec![]).await.unwrap_err();
    assert!(matches!(&err, ClientError::Transport(message) if message.contains("not connected")));

    // The abandoned negotiate completes server-side but nothing follows it.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert!(hub.sent_on("t2").is_empty());
    assert_eq!(hub.negotiations(), 2);
}
