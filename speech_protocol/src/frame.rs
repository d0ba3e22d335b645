use chrono::{SecondsFormat, Utc};
use uuid::Uuid;

/// Total size of one audio frame on the wire, header included.
pub const AUDIO_FRAME_SIZE: usize = 8192;

// Static client/device identity the service expects in the config frame.
const SPEECH_CONTEXT: &str = r#"{
	"context":{
		"system":{"version":"1.0.00000"},
		"os":{
			"platform":"Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/59.0.3071.115 Safari/537.36",
			"name":"Browser",
			"version":""
		},
		"device":{"manufacturer":"SpeechSample","model":"SpeechSample","version":"1.0.00000"}
	}
}"#;

const TELEMETRY_BODY: &str = "Details";

/// Fresh request/connection identifier: UUID v4 without hyphens.
pub fn new_request_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// UTC timestamp with millisecond precision, as the service expects in
/// every `x-timestamp` header.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// One-time speech configuration frame, sent once per streaming start
/// before any audio frame.
pub fn speech_config(request_id: &str) -> String {
    let mut config = String::new();
    config.push_str("path:speech.config\r\n");
    config.push_str(&format!("x-timestamp:{}\r\n", timestamp()));
    config.push_str("content-type:application/json\r\n");
    config.push_str(&format!("x-requestId:{}\r\n", request_id));
    config.push_str("\r\n\r\n");
    config.push_str(SPEECH_CONTEXT);
    config
}

/// Audio frame header: the ASCII header text prefixed with its own byte
/// length as a 2-byte big-endian integer.
///
/// The header is fixed for the lifetime of one request id; regenerate it
/// whenever a new id is issued.
pub fn audio_header(request_id: &str) -> Vec<u8> {
    let mut text = String::new();
    text.push_str("path:audio\r\n");
    text.push_str(&format!("x-requestid:{}\r\n", request_id));
    text.push_str(&format!("x-timestamp:{}\r\n", timestamp()));
    text.push_str("content-type:audio/wav; codec=audio/pcm; samplerate=16000");

    let bytes = text.as_bytes();
    let mut header = Vec::with_capacity(2 + bytes.len());
    header.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    header.extend_from_slice(bytes);
    header
}

/// Telemetry frame acknowledging the end of a turn.
pub fn telemetry_ack() -> String {
    let mut ack = String::new();
    ack.push_str("path:telemetry\r\n");
    ack.push_str(&format!("x-timestamp:{}\r\n", timestamp()));
    ack.push_str("content-type:application/json\r\n");
    ack.push_str("\r\n\r\n");
    ack.push_str(TELEMETRY_BODY);
    ack
}

/// Batches raw PCM bytes into fixed-size audio frames.
///
/// `push` drains one frame per full capacity's worth of buffered bytes as
/// soon as the threshold is reached; the tail that never reaches capacity
/// is only sent by an explicit [`flush`](Packetizer::flush), zero-padded
/// to the full frame size. Mid-stream frames therefore never carry
/// padding, so no artificial silence is injected inside an utterance.
pub struct Packetizer {
    header: Vec<u8>,
    capacity: usize,
    buffer: Vec<u8>,
}

impl Packetizer {
    pub fn new(request_id: &str) -> Self {
        let header = audio_header(request_id);
        let capacity = AUDIO_FRAME_SIZE - header.len();
        Packetizer {
            header,
            capacity,
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Payload bytes that fit in one frame next to the header.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes buffered and not yet framed.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Append a sample chunk, returning every frame it completed.
    ///
    /// Returns an empty vec while the buffer stays below capacity. A chunk
    /// larger than the remaining capacity completes as many frames as it
    /// fills; the remainder stays buffered.
    pub fn push(&mut self, sample: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(sample);

        let mut frames = Vec::new();
        while self.buffer.len() >= self.capacity {
            let rest = self.buffer.split_off(self.capacity);
            let payload = std::mem::replace(&mut self.buffer, rest);
            frames.push(self.build_frame(&payload));
        }
        frames
    }

    /// Send the buffered tail as one final zero-padded frame.
    ///
    /// Returns `None` when nothing is buffered.
    pub fn flush(&mut self) -> Option<Vec<u8>> {
        if self.buffer.is_empty() {
            return None;
        }
        let payload = std::mem::take(&mut self.buffer);
        Some(self.build_frame(&payload))
    }

    /// Drop buffered bytes without sending them (turn boundary).
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    fn build_frame(&self, payload: &[u8]) -> Vec<u8> {
        debug_assert!(payload.len() <= self.capacity);
        let mut frame = Vec::with_capacity(AUDIO_FRAME_SIZE);
        frame.extend_from_slice(&self.header);
        frame.extend_from_slice(payload);
        frame.resize(AUDIO_FRAME_SIZE, 0);
        frame
    }
}
