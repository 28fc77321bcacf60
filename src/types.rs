use thiserror::Error;

/// Errors surfaced by the fleet telemetry client.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Api(String),

    #[error("Invalid token: {0}")]
    Token(String),

    #[error("Hub protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),
}
