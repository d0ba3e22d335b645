//! # Speech Protocol
//!
//! Wire protocol for the cloud speech recognition service.
//!
//! This crate provides:
//! - Outbound frame builders (speech config, audio header, turn-end telemetry)
//! - The audio packetizer that batches PCM bytes into fixed-size frames
//! - The inbound header/body parser and typed server messages
//!
//! Everything here is pure and deterministic; the session layer owns all IO.
//!
//! ## Example Usage
//!
//! ```rust
//! use speech_protocol::{Packetizer, ServerMessage, AUDIO_FRAME_SIZE};
//!
//! // Batch raw PCM into wire frames
//! let mut packetizer = Packetizer::new(&speech_protocol::new_request_id());
//! let frames = packetizer.push(&vec![0u8; 10_000]);
//! assert!(frames.iter().all(|f| f.len() == AUDIO_FRAME_SIZE));
//!
//! // Decode a server event
//! let text = "path:speech.hypothesis\r\n\r\n{\"Text\":\"hel\",\"Offset\":0,\"Duration\":0}";
//! let message = ServerMessage::parse(text).unwrap();
//! assert!(matches!(message, ServerMessage::SpeechHypothesis(_)));
//! ```

pub mod frame;
pub mod message;

// Re-export commonly used types
pub use frame::{
    audio_header, new_request_id, speech_config, telemetry_ack, Packetizer, AUDIO_FRAME_SIZE,
};
pub use message::{
    NBest, ParseError, RawMessage, ServerMessage, SpeechEndDetected, SpeechFragment,
    SpeechHypothesis, SpeechPhrase, SpeechStartDetected,
};
