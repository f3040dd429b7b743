use std::time::Duration;

/// Errors surfaced by the connection engine.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// TCP or socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Wire protocol parsing error.
    #[error("protocol error: {0}")]
    Protocol(#[from] seedstream_protocol::ProtocolError),

    /// Operation exceeded the configured timeout duration.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Server closed the connection.
    #[error("disconnected")]
    Disconnected,

    /// Invalid configuration detected before connecting.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Uni-station and multi-station subscriptions cannot be mixed.
    #[error("subscription mode conflict: {0}")]
    ModeConflict(&'static str),

    /// Server refused a command during negotiation.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// An INFO request is already in flight on this connection.
    #[error("info request already pending")]
    InfoPending,

    /// Server sent the `ERROR` sentinel after negotiation.
    #[error("server reported an error condition")]
    ServerError,

    /// Non-miniSEED data in the stream; the connection cannot recover.
    #[error("unreadable data stream: {0}")]
    BadStream(String),

    /// miniSEED decoding error from the external decoder.
    #[error("miniseed error: {0}")]
    Miniseed(#[from] miniseed_rs::MseedError),
}

impl ClientError {
    /// Whether the engine handles this error internally by disconnecting
    /// and retrying after the reconnect delay.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout(_) | Self::Disconnected | Self::Negotiation(_)
        )
    }
}

/// Convenience alias for `Result<T, ClientError>`.
pub type Result<T> = std::result::Result<T, ClientError>;
