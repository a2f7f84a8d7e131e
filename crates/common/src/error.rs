use thiserror::Error;

/// Error types for the backstream tunnel
#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("No tunnel agent connected")]
    NoClient,

    #[error("All tunnel agents are busy")]
    AgentsBusy,

    #[error("Timeout waiting for response")]
    Timeout,

    #[error("Local service unavailable: {0}")]
    LocalServiceUnavailable(String),

    #[error("WebSocket error: {0}")]
    WebSocketError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Type alias for Results using TunnelError
pub type Result<T> = std::result::Result<T, TunnelError>;
