use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::ClientError;

/// What the transport reports to its owner after `start` succeeds.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A server-to-client method call.
    Invocation {
        target: String,
        arguments: Vec<Value>,
    },
    /// The link dropped and automatic reconnection began.
    Reconnecting { error: Option<String> },
    /// Automatic reconnection succeeded on a fresh connection.
    Reconnected { connection_id: String },
    /// The link is gone for good. No further events follow.
    Closed { error: Option<String> },
}

/// An established connection and its event stream.
#[derive(Debug)]
pub struct TransportSession {
    pub connection_id: String,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Client side of a hub connection with automatic reconnect.
#[async_trait]
pub trait HubTransport: Send + Sync {
    /// Connect and complete the protocol handshake.
    async fn start(&self) -> Result<TransportSession, ClientError>;

    /// Call a hub method and wait for its completion.
    async fn invoke(&self, target: &str, arguments: Vec<Value>) -> Result<(), ClientError>;

    /// Tear down the connection and cancel any pending reconnect.
    async fn stop(&self);
}
