use serde::Serialize;

/// Lifecycle of the realtime hub connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Online,
    Reconnecting,
    Error,
}

/// Inputs that move the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Start,
    TransportStarted,
    TransportFailed,
    TransportDropped,
    TransportRestored,
    /// Retries exhausted, or the server closed without allowing a reconnect.
    TransportClosed,
    Stop,
}

impl ConnectionState {
    /// Next state for `trigger`, or `None` when the trigger does not apply.
    pub fn on(self, trigger: Trigger) -> Option<ConnectionState> {
        use ConnectionState::*;
        use Trigger::*;

        match (self, trigger) {
            (Disconnected | Error, Start) => Some(Connecting),
            (Connecting, TransportStarted) => Some(Online),
            (Connecting, TransportFailed) => Some(Error),
            (Online, TransportDropped) => Some(Reconnecting),
            (Reconnecting, TransportRestored) => Some(Online),
            (Online | Reconnecting, TransportClosed) => Some(Disconnected),
            (Connecting | Online | Reconnecting | Error, Stop) => Some(Disconnected),
            _ => None,
        }
    }

    /// Human-readable status for display surfaces.
    pub fn status_label(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting...",
            ConnectionState::Online => "Online",
            ConnectionState::Reconnecting => "Reconnecting...",
            ConnectionState::Error => "Error",
        }
    }

    pub fn is_online(self) -> bool {
        self == ConnectionState::Online
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.status_label())
    }
}
