//! Error types for the FC2 live-capture engine.
//!
//! One enum per component, aggregated into [`SessionError`] at the
//! orchestrator boundary — errors are reported at the site that understands
//! them (§7 of the design notes), not flattened into a single catch-all.

use thiserror::Error;

/// Disconnect reason carried by a `control_disconnection` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disconnect {
    /// code 4101 — streamer switched the broadcast to a paid program.
    PaidProgram,
    /// code 4507 — the stream requires a login.
    LoginRequired,
    /// code 4512 — another connection to the same live stream was detected.
    MultipleConnection,
    /// any other code.
    Other(i64),
}

impl Disconnect {
    pub fn from_code(code: i64) -> Self {
        match code {
            4101 => Self::PaidProgram,
            4507 => Self::LoginRequired,
            4512 => Self::MultipleConnection,
            other => Self::Other(other),
        }
    }

    pub fn code(&self) -> i64 {
        match self {
            Self::PaidProgram => 4101,
            Self::LoginRequired => 4507,
            Self::MultipleConnection => 4512,
            Self::Other(code) => *code,
        }
    }
}

impl std::fmt::Display for Disconnect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PaidProgram => write!(f, "server switched to a paid program"),
            Self::LoginRequired => write!(f, "server requires a login"),
            Self::MultipleConnection => write!(f, "multiple connections to the same stream"),
            Self::Other(code) => write!(f, "server disconnected with code {code}"),
        }
    }
}

/// Errors raised by the live-stream API client (C4).
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("live stream is currently not online")]
    NotOnline,
    #[error("control token was not a well-formed JWT: {0}")]
    MalformedControlToken(String),
}

/// Errors raised by the WebSocket control channel (C3).
#[derive(Debug, Error)]
pub enum WsError {
    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("server did not return a valid playlist")]
    EmptyPlaylist,
    #[error("{0}")]
    ServerDisconnection(Disconnect),
    #[error("receive timed out after {0:?}")]
    ReceiveTimeout(std::time::Duration),
    #[error("websocket closed")]
    Closed,
}

/// Errors raised by the HLS downloader (C2).
#[derive(Debug, Error)]
pub enum HlsError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("the live stream has ended")]
    StreamFinished,
}

/// Errors raised by the muxer invoker (C5).
#[derive(Debug, Error)]
pub enum MuxerError {
    #[error("failed to spawn muxer process: {0}")]
    Spawn(std::io::Error),
    #[error("io error while reading muxer output: {0}")]
    Io(#[from] std::io::Error),
    #[error("muxer exited with status {0}")]
    NonZeroExit(i32),
}

/// Aggregate error type returned by the session orchestrator (C6).
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Ws(#[from] WsError),
    #[error(transparent)]
    Hls(#[from] HlsError),
    #[error(transparent)]
    Muxer(#[from] MuxerError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("recording was interrupted")]
    Interrupted,
}

pub type Result<T, E = SessionError> = std::result::Result<T, E>;
