use crate::session::SessionState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SpeechError>;

#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Authorization rejected ({status}): {body}")]
    Auth { status: u16, body: String },

    #[error("Authorization request failed: {0}")]
    AuthRequest(#[from] reqwest::Error),

    #[error("Cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] speech_protocol::ParseError),

    #[error("Audio error: {0}")]
    Audio(String),

    #[error("Socket error: {0}")]
    Transport(String),

    #[error("WebSocket connection failed: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("Session has been disposed")]
    Disposed,
}

impl SpeechError {
    /// Wraps a socket-level close or failure reason, substituting a fixed
    /// message when the transport gave none.
    pub fn transport(reason: Option<String>) -> Self {
        SpeechError::Transport(reason.unwrap_or_else(|| "unknown socket error".to_string()))
    }
}
