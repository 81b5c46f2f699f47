use thiserror::Error;

/// Top-level error type for the crate.
///
/// Every failure mode across the connection pair, the codec, and the
/// catalog maps onto one of these variants. Nothing here escalates past
/// the facade: `client` degrades each variant into an empty/false/no-op
/// result plus a log line.
#[derive(Debug, Error)]
pub enum Error {
    // ── Connection ──────────────────────────────────────────────────
    /// Channel could not be established (refused, unreachable, TLS).
    #[error("connection failed: {0}")]
    Connection(String),

    /// The hub rejected the access token during the handshake.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Websocket transport error after the channel was open.
    #[error("websocket transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    // ── Protocol ────────────────────────────────────────────────────
    /// Malformed or unexpected envelope.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// No response correlated within the per-receive deadline.
    #[error("request {id} timed out after {timeout_secs}s")]
    Timeout { id: u64, timeout_secs: u64 },

    /// The hub answered the request with `success: false`.
    #[error("hub reported failure for request {id}")]
    CommandFailed { id: u64 },

    // ── Local state ─────────────────────────────────────────────────
    /// Connection settings are missing or incomplete.
    #[error("invalid settings: {0}")]
    Settings(String),

    /// A consumer token string did not decode to (controller, page, button).
    #[error("malformed consumer token: {0:?}")]
    Token(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}

impl Error {
    /// True when reconnecting might resolve the failure.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connection(_) | Self::Transport(_) | Self::Timeout { .. }
        )
    }
}
