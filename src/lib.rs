pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod pcm;
pub mod session;
pub mod transport;

pub use error::{Result, SpeechError};

// Re-export commonly used types
pub use config::{load_config, ApiConfig, SpeechConfig};
pub use dispatch::SessionEvent;
pub use session::{Session, SessionState};
pub use speech_protocol::ServerMessage;
