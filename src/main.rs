use anyhow::{Context, Result};
use clap::Parser;
use speech_edge_rs::config::{load_config, SpeechConfig};
use speech_edge_rs::dispatch::SessionEvent;
use speech_edge_rs::pcm;
use speech_edge_rs::session::Session;
use speech_protocol::ServerMessage;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 16 kHz mono WAV file to stream
    wav: PathBuf,

    /// Recognition language
    #[arg(long, default_value = "en-US")]
    language: String,

    /// Service region
    #[arg(long, default_value = "westus")]
    region: String,

    /// Bytes of PCM per send (default is 100ms of audio)
    #[arg(long, default_value_t = 3_200)]
    chunk_bytes: usize,

    /// Reconnect automatically when the service ends a turn
    #[arg(long)]
    reconnect: bool,

    /// Full token endpoint URL, replacing the regional default
    #[arg(long)]
    token_endpoint: Option<String>,

    /// Full recognition endpoint URL, replacing the regional default
    #[arg(long)]
    speech_endpoint: Option<String>,
}

// 16000 samples/s at 2 bytes per sample
const BYTES_PER_SECOND: usize = 32_000;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    log::info!("🚀 Starting speech-edge with args: {:?}", args);

    let api_config = load_config().context("Failed to load configuration")?;
    let audio = pcm::read_wav_pcm16(&args.wav)
        .with_context(|| format!("Failed to read {}", args.wav.display()))?;
    log::info!(
        "🎵 Loaded {} bytes of PCM audio ({:.1}s)",
        audio.len(),
        audio.len() as f64 / BYTES_PER_SECOND as f64
    );

    let session = Session::new(SpeechConfig {
        language: args.language,
        region: args.region,
        reconnect_on_turn_end: args.reconnect,
        token_endpoint: args.token_endpoint,
        speech_endpoint: args.speech_endpoint,
        ..SpeechConfig::default()
    });

    session
        .authenticate(api_config.speech_key())
        .await
        .context("Authentication failed")?;
    log::info!("🔑 Authenticated");

    session.connect().await.context("Connection failed")?;
    log::info!("📡 Connected");

    // Pace the file like a live microphone
    let chunk_bytes = args.chunk_bytes.max(1);
    let chunk_interval = Duration::from_millis((chunk_bytes * 1000 / BYTES_PER_SECOND) as u64);
    let mut turn_ended = false;
    for chunk in audio.chunks(chunk_bytes) {
        session.stream(chunk);
        for event in session.drain_events() {
            turn_ended |= report(&event);
        }
        tokio::time::sleep(chunk_interval).await;
    }
    session.flush();
    log::info!("🎤 Audio submitted, waiting for the service to finish");

    // The final phrase and turn.end arrive after the last audio frame
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !turn_ended && tokio::time::Instant::now() < deadline {
        for event in session.drain_events() {
            turn_ended |= report(&event);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    if !turn_ended {
        log::warn!("⏰ Gave up waiting for the turn to end");
    }

    if session.state() == speech_edge_rs::SessionState::Streaming
        || session.state() == speech_edge_rs::SessionState::Connected
    {
        session.disconnect().context("Disconnect failed")?;
    }
    session.dispose();

    println!("👋 Done");
    Ok(())
}

/// Print one session event. Returns true once the service has ended the turn.
fn report(event: &SessionEvent) -> bool {
    match event {
        SessionEvent::State(state) => {
            log::debug!("Session state: {}", state);
            false
        }
        SessionEvent::Message(message) => report_message(message),
        SessionEvent::Error(e) => {
            log::error!("❌ Session error: {}", e);
            false
        }
    }
}

fn report_message(message: &ServerMessage) -> bool {
    match message {
        ServerMessage::TurnStart => {
            log::info!("🔄 Turn started");
            false
        }
        ServerMessage::TurnEnd => {
            log::info!("🏁 Turn ended");
            true
        }
        ServerMessage::SpeechStartDetected(event) => {
            log::info!("🎙️ Speech detected at offset {}", event.offset);
            false
        }
        ServerMessage::SpeechEndDetected(event) => {
            log::info!("🤫 Speech ended at offset {}", event.offset);
            false
        }
        ServerMessage::SpeechHypothesis(hypothesis) => {
            println!("   {}", hypothesis.text);
            false
        }
        ServerMessage::SpeechFragment(fragment) => {
            println!("   {}", fragment.text);
            false
        }
        ServerMessage::SpeechPhrase(phrase) => {
            if phrase.is_success() {
                println!("✨ \"{}\"", phrase.best_text().unwrap_or_default());
            } else {
                println!("❌ No speech recognized ({})", phrase.recognition_status);
            }
            false
        }
    }
}
