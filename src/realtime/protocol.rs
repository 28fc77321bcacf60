//! JSON hub protocol framing.
//!
//! Every message is a JSON object followed by the 0x1E record separator.
//! The handshake response is the only message without a `type` field.

use serde::Deserialize;
use serde_json::{json, Value};

use crate::types::ClientError;

pub const RECORD_SEPARATOR: char = '\u{1e}';

const INVOCATION: u64 = 1;
const COMPLETION: u64 = 3;
const PING: u64 = 6;
const CLOSE: u64 = 7;

#[derive(Debug, Clone, PartialEq)]
pub enum HubMessage {
    HandshakeResponse {
        error: Option<String>,
    },
    Invocation {
        invocation_id: Option<String>,
        target: String,
        arguments: Vec<Value>,
    },
    Completion {
        invocation_id: String,
        error: Option<String>,
    },
    Ping,
    Close {
        error: Option<String>,
        allow_reconnect: bool,
    },
    /// Stream items and other types this client never requests.
    Other {
        message_type: u64,
    },
}

impl HubMessage {
    fn from_value(value: &Value) -> Result<Self, ClientError> {
        let error = value
            .get("error")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string());

        let Some(message_type) = value.get("type") else {
            return Ok(HubMessage::HandshakeResponse { error });
        };
        let message_type = message_type
            .as_u64()
            .ok_or_else(|| ClientError::Protocol(format!("invalid message type: {message_type}")))?;

        let message = match message_type {
            INVOCATION => HubMessage::Invocation {
                invocation_id: value
                    .get("invocationId")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                target: value
                    .get("target")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| ClientError::Protocol("invocation without target".to_string()))?
                    .to_string(),
                arguments: value
                    .get("arguments")
                    .and_then(|v| v.as_array())
                    .cloned()
                    .unwrap_or_default(),
            },
            COMPLETION => HubMessage::Completion {
                invocation_id: value
                    .get("invocationId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        ClientError::Protocol("completion without invocationId".to_string())
                    })?
                    .to_string(),
                error,
            },
            PING => HubMessage::Ping,
            CLOSE => HubMessage::Close {
                error,
                allow_reconnect: value
                    .get("allowReconnect")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            },
            other => HubMessage::Other {
                message_type: other,
            },
        };
        Ok(message)
    }
}

/// Split a transport payload into messages. Each record parses independently.
pub fn parse_frames(payload: &str) -> Vec<Result<HubMessage, ClientError>> {
    payload
        .split(RECORD_SEPARATOR)
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(|record| {
            let value: Value = serde_json::from_str(record)?;
            HubMessage::from_value(&value)
        })
        .collect()
}

pub fn handshake_request() -> String {
    frame(&json!({"protocol": "json", "version": 1}))
}

pub fn encode_invocation(invocation_id: &str, target: &str, arguments: &[Value]) -> String {
    frame(&json!({
        "type": INVOCATION,
        "invocationId": invocation_id,
        "target": target,
        "arguments": arguments,
    }))
}

fn frame(value: &Value) -> String {
    let mut out = value.to_string();
    out.push(RECORD_SEPARATOR);
    out
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AvailableTransport {
    pub transport: String,
    #[serde(default)]
    pub transfer_formats: Vec<String>,
}

/// Body of `POST {hub}/negotiate`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiateResponse {
    #[serde(default)]
    pub connection_id: Option<String>,
    #[serde(default)]
    pub connection_token: Option<String>,
    #[serde(default)]
    pub available_transports: Vec<AvailableTransport>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl NegotiateResponse {
    /// The id used on the wire (`connectionToken` from negotiate v1 on).
    pub fn into_connection(self) -> Result<(String, String), ClientError> {
        if let Some(error) = self.error {
            return Err(ClientError::Transport(format!("negotiate failed: {error}")));
        }
        if let Some(url) = self.url {
            return Err(ClientError::Transport(format!(
                "negotiate redirect to {url} is not supported"
            )));
        }
        let supports_long_polling = self.available_transports.is_empty()
            || self.available_transports.iter().any(|t| {
                t.transport == "LongPolling"
                    && (t.transfer_formats.is_empty()
                        || t.transfer_formats.iter().any(|f| f == "Text"))
            });
        if !supports_long_polling {
            return Err(ClientError::Transport(
                "server does not offer long polling with text frames".to_string(),
            ));
        }

        let connection_id = self
            .connection_id
            .ok_or_else(|| ClientError::Protocol("negotiate without connectionId".to_string()))?;
        let token = self
            .connection_token
            .unwrap_or_else(|| connection_id.clone());
        Ok((connection_id, token))
    }
}
