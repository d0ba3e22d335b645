use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParseError {
    #[error("unsupported message path: {0}")]
    UnsupportedPath(String),

    #[error("message has no path header")]
    MissingPath,

    #[error("invalid message body: {0}")]
    Body(#[from] serde_json::Error),
}

/// Header/body split of one inbound text block, before typed decoding.
///
/// Headers are the lines before the first blank line, each split at its
/// first colon; keys are matched case-insensitively, values are kept
/// verbatim. Everything after the blank line is the body.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    headers: Vec<(String, String)>,
    body: String,
}

impl RawMessage {
    pub fn parse(text: &str) -> Self {
        let mut headers = Vec::new();
        let mut rest = text;

        loop {
            let (line, tail) = match rest.split_once('\n') {
                Some((line, tail)) => (line.trim_end_matches('\r'), tail),
                None => (rest.trim_end_matches('\r'), ""),
            };

            if line.is_empty() {
                rest = tail;
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.push((key.to_string(), value.to_string()));
            }
            if tail.is_empty() {
                rest = tail;
                break;
            }
            rest = tail;
        }

        RawMessage {
            headers,
            body: rest.to_string(),
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    /// The routing key selecting the message schema.
    pub fn path(&self) -> Option<&str> {
        self.header("path")
    }

    pub fn request_id(&self) -> Option<&str> {
        self.header("x-requestid")
    }
}

/// Speech detected in the audio stream. Offset is in 100-nanosecond units
/// from the start of the stream.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechStartDetected {
    #[serde(default)]
    pub offset: u64,
}

/// End of speech detected; any audio buffered past this point is stale.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechEndDetected {
    #[serde(default)]
    pub offset: u64,
}

/// Interim recognition result. The text may change as more audio arrives.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechHypothesis {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub duration: u64,
}

/// Stable fragment of the running recognition.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechFragment {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub duration: u64,
}

/// Final recognition result for one utterance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SpeechPhrase {
    #[serde(default)]
    pub recognition_status: String,
    #[serde(default)]
    pub display_text: Option<String>,
    #[serde(default)]
    pub offset: u64,
    #[serde(default)]
    pub duration: u64,
    #[serde(default, rename = "NBest")]
    pub n_best: Vec<NBest>,
}

impl SpeechPhrase {
    pub fn is_success(&self) -> bool {
        self.recognition_status == "Success"
    }

    /// Best display text: `DisplayText` in simple format, otherwise the
    /// top-ranked candidate.
    pub fn best_text(&self) -> Option<&str> {
        if let Some(text) = self.display_text.as_deref() {
            return Some(text);
        }
        self.n_best.first().and_then(|c| c.display.as_deref())
    }
}

/// One ranked alternative transcription.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NBest {
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub lexical: Option<String>,
    #[serde(default, rename = "ITN")]
    pub itn: Option<String>,
    #[serde(default, rename = "MaskedITN")]
    pub masked_itn: Option<String>,
    #[serde(default)]
    pub display: Option<String>,
}

/// One decoded server event, tagged by the `path` routing key.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    TurnStart,
    TurnEnd,
    SpeechStartDetected(SpeechStartDetected),
    SpeechEndDetected(SpeechEndDetected),
    SpeechHypothesis(SpeechHypothesis),
    SpeechFragment(SpeechFragment),
    SpeechPhrase(SpeechPhrase),
}

impl ServerMessage {
    /// Decode one received text block.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Self::from_raw(&RawMessage::parse(text))
    }

    /// Decode an already-split message.
    ///
    /// The body of `turn.start`/`turn.end` is not interpreted; the service
    /// sends a context object the client never uses.
    pub fn from_raw(raw: &RawMessage) -> Result<Self, ParseError> {
        let path = raw.path().ok_or(ParseError::MissingPath)?;
        match path.trim().to_ascii_lowercase().as_str() {
            "turn.start" => Ok(ServerMessage::TurnStart),
            "turn.end" => Ok(ServerMessage::TurnEnd),
            "speech.startdetected" => Ok(ServerMessage::SpeechStartDetected(
                serde_json::from_str(raw.body())?,
            )),
            "speech.enddetected" => Ok(ServerMessage::SpeechEndDetected(serde_json::from_str(
                raw.body(),
            )?)),
            "speech.hypothesis" => Ok(ServerMessage::SpeechHypothesis(serde_json::from_str(
                raw.body(),
            )?)),
            "speech.fragment" => Ok(ServerMessage::SpeechFragment(serde_json::from_str(
                raw.body(),
            )?)),
            "speech.phrase" => Ok(ServerMessage::SpeechPhrase(serde_json::from_str(
                raw.body(),
            )?)),
            other => Err(ParseError::UnsupportedPath(other.to_string())),
        }
    }

    /// Routing key this variant decodes from.
    pub fn path(&self) -> &'static str {
        match self {
            ServerMessage::TurnStart => "turn.start",
            ServerMessage::TurnEnd => "turn.end",
            ServerMessage::SpeechStartDetected(_) => "speech.startDetected",
            ServerMessage::SpeechEndDetected(_) => "speech.endDetected",
            ServerMessage::SpeechHypothesis(_) => "speech.hypothesis",
            ServerMessage::SpeechFragment(_) => "speech.fragment",
            ServerMessage::SpeechPhrase(_) => "speech.phrase",
        }
    }
}
