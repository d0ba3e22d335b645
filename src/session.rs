//! Session lifecycle for one speech-recognition engagement.
//!
//! A session authenticates against the token endpoint, opens the recognition
//! socket, packetizes outgoing audio, and reacts to decoded server messages.
//! Background completions never touch caller-visible state directly; they are
//! funnelled through the session's event queue and observed by draining it
//! from the foreground loop.

use crate::auth::Authenticator;
use crate::config::SpeechConfig;
use crate::dispatch::{EventQueue, SessionEvent};
use crate::error::{Result, SpeechError};
use crate::transport::{ConnectRequest, Connector, OutboundFrame, TransportEvent, WsConnector};
use speech_protocol::{new_request_id, speech_config, telemetry_ack, Packetizer, ServerMessage};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use strum::Display;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

/// Lifecycle states, ordered by readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum SessionState {
    Idle,
    Authenticating,
    Authenticated,
    Connecting,
    Connected,
    Streaming,
    Disconnecting,
}

struct Inner {
    state: SessionState,
    /// Issued per authentication; the audio-frame header derives from it
    request_id: String,
    packetizer: Option<Packetizer>,
    outbound: Option<UnboundedSender<OutboundFrame>>,
    conn_cancel: Option<CancellationToken>,
}

struct Shared {
    config: SpeechConfig,
    auth: Mutex<Option<Authenticator>>,
    events: EventQueue,
    inner: Mutex<Inner>,
    disposed: AtomicBool,
}

impl Shared {
    fn emit(&self, event: SessionEvent) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }
        self.events.push(event);
    }

    fn set_state(&self, state: SessionState) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state == state {
                return;
            }
            inner.state = state;
        }
        self.emit(SessionEvent::State(state));
    }

    /// Transition and emit only when the session is currently in `from`.
    fn set_state_if(&self, from: SessionState, to: SessionState) {
        {
            let mut inner = self.inner.lock().unwrap();
            if inner.state != from {
                return;
            }
            inner.state = to;
        }
        self.emit(SessionEvent::State(to));
    }
}

/// One logical speech-recognition engagement over a persistent socket.
///
/// Operations are meant to be driven from a single foreground loop. State
/// changes, decoded messages, and background failures all arrive through
/// [`Session::drain_events`] in the order they happened, so the caller never
/// observes a transition concurrently.
pub struct Session {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
}

impl Session {
    pub fn new(config: SpeechConfig) -> Self {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    /// Build a session over a caller-supplied transport.
    pub fn with_connector(config: SpeechConfig, connector: Arc<dyn Connector>) -> Self {
        Session {
            shared: Arc::new(Shared {
                config,
                auth: Mutex::new(None),
                events: EventQueue::new(),
                inner: Mutex::new(Inner {
                    state: SessionState::Idle,
                    request_id: String::new(),
                    packetizer: None,
                    outbound: None,
                    conn_cancel: None,
                }),
                disposed: AtomicBool::new(false),
            }),
            connector,
        }
    }

    pub fn state(&self) -> SessionState {
        self.shared.inner.lock().unwrap().state
    }

    /// Take the oldest pending event, if any.
    pub fn poll_event(&self) -> Option<SessionEvent> {
        self.shared.events.pop()
    }

    /// Take every pending event at once, preserving order.
    pub fn drain_events(&self) -> Vec<SessionEvent> {
        self.shared.events.drain()
    }

    pub fn pending_events(&self) -> usize {
        self.shared.events.len()
    }

    /// Exchange the subscription key for a bearer token.
    ///
    /// On success the session holds a fresh request identifier, a matching
    /// audio-frame header, and a background task keeping the token renewed.
    /// On failure the session returns to `Idle` and the error is returned to
    /// the caller directly, never through the event queue.
    pub async fn authenticate(&self, key: &str) -> Result<()> {
        self.ensure_not_disposed()?;
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if inner.state != SessionState::Idle {
                return Err(SpeechError::InvalidState {
                    operation: "authenticate",
                    state: inner.state,
                });
            }
            inner.state = SessionState::Authenticating;
        }
        self.shared.emit(SessionEvent::State(SessionState::Authenticating));
        log::info!("Session: Requesting bearer token");

        let auth = Authenticator::new(key, &self.shared.config.token_url());
        match auth.fetch().await {
            Ok(()) => {
                auth.start_renewal();
                *self.shared.auth.lock().unwrap() = Some(auth);

                let request_id = new_request_id();
                {
                    let mut inner = self.shared.inner.lock().unwrap();
                    inner.packetizer = Some(Packetizer::new(&request_id));
                    inner.request_id = request_id;
                }
                self.shared.set_state(SessionState::Authenticated);
                log::info!("Session: Authenticated");
                Ok(())
            }
            Err(e) => {
                log::warn!("Session: Authentication failed: {}", e);
                self.shared.set_state(SessionState::Idle);
                Err(e)
            }
        }
    }

    /// Open the recognition socket with the current bearer token.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        {
            let inner = self.shared.inner.lock().unwrap();
            if inner.state != SessionState::Authenticated {
                return Err(SpeechError::InvalidState {
                    operation: "connect",
                    state: inner.state,
                });
            }
        }
        open_connection(&self.shared, &self.connector).await
    }

    /// Close the recognition socket and return to `Authenticated`.
    ///
    /// Token renewal keeps running; only the connection is torn down.
    pub fn disconnect(&self) -> Result<()> {
        self.ensure_not_disposed()?;
        let state = self.shared.inner.lock().unwrap().state;
        if !matches!(state, SessionState::Connected | SessionState::Streaming) {
            return Err(SpeechError::InvalidState {
                operation: "disconnect",
                state,
            });
        }
        if teardown_connection(&self.shared) {
            self.shared.emit(SessionEvent::State(SessionState::Disconnecting));
            self.shared.set_state(SessionState::Authenticated);
        }
        Ok(())
    }

    /// Feed one chunk of raw 16 kHz mono PCM bytes.
    ///
    /// Returns true only when at least one full frame went out this call.
    /// A false return also covers the benign cases: empty chunk, session not
    /// connected, or bytes merely buffered below the frame capacity. The
    /// first call after connecting transmits the one-time configuration
    /// frame ahead of any audio.
    pub fn stream(&self, sample: &[u8]) -> bool {
        if self.shared.disposed.load(Ordering::SeqCst) || sample.is_empty() {
            return false;
        }

        let became_streaming;
        let transmitted;
        {
            let mut inner = self.shared.inner.lock().unwrap();
            if !matches!(
                inner.state,
                SessionState::Connected | SessionState::Streaming
            ) {
                return false;
            }
            let Some(outbound) = inner.outbound.clone() else {
                return false;
            };

            became_streaming = inner.state == SessionState::Connected;
            if became_streaming {
                // The configuration frame must reach the service before audio
                let config = speech_config(&inner.request_id);
                if outbound.send(OutboundFrame::Text(config)).is_err() {
                    log::warn!("Session: Failed to queue configuration frame");
                    return false;
                }
                inner.state = SessionState::Streaming;
            }

            let Some(packetizer) = inner.packetizer.as_mut() else {
                return false;
            };
            let frames = packetizer.push(sample);
            transmitted = !frames.is_empty();
            for frame in frames {
                // Best effort while capturing live audio: log and keep going
                if outbound.send(OutboundFrame::Binary(frame)).is_err() {
                    log::warn!("Session: Failed to queue audio frame");
                    return false;
                }
            }
        }

        if became_streaming {
            self.shared.emit(SessionEvent::State(SessionState::Streaming));
        }
        transmitted
    }

    /// Pad and transmit any buffered tail as one final full-size frame.
    ///
    /// Returns true only when a frame actually went out. Only meaningful
    /// while `Streaming`; anywhere else there is nothing sendable and it
    /// returns false.
    pub fn flush(&self) -> bool {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return false;
        }
        let mut inner = self.shared.inner.lock().unwrap();
        if inner.state != SessionState::Streaming {
            return false;
        }
        let Some(outbound) = inner.outbound.clone() else {
            return false;
        };
        let Some(packetizer) = inner.packetizer.as_mut() else {
            return false;
        };
        match packetizer.flush() {
            Some(frame) => outbound.send(OutboundFrame::Binary(frame)).is_ok(),
            None => false,
        }
    }

    /// True while a bearer token is held and renewal is running.
    pub fn is_authorized(&self) -> bool {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return false;
        }
        self.shared
            .auth
            .lock()
            .unwrap()
            .as_ref()
            .map(|auth| auth.is_valid())
            .unwrap_or(false)
    }

    /// Tear everything down: renewal timer, token, connection, buffered audio.
    ///
    /// Idempotent and callable from any state. After disposal every operation
    /// fails with [`SpeechError::Disposed`] and no further events surface.
    pub fn dispose(&self) {
        if self.shared.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Session: Disposing");

        if let Some(auth) = self.shared.auth.lock().unwrap().take() {
            auth.stop_renewal();
        }

        let mut inner = self.shared.inner.lock().unwrap();
        if let Some(cancel) = inner.conn_cancel.take() {
            cancel.cancel();
        }
        if let Some(outbound) = inner.outbound.take() {
            let _ = outbound.send(OutboundFrame::Close);
        }
        if let Some(packetizer) = inner.packetizer.as_mut() {
            packetizer.clear();
        }
        inner.state = SessionState::Idle;
    }

    fn ensure_not_disposed(&self) -> Result<()> {
        if self.shared.disposed.load(Ordering::SeqCst) {
            return Err(SpeechError::Disposed);
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fetch the token, dial the endpoint, and wire up the reader pump.
/// Rolls back to `Authenticated` when the attempt fails.
async fn open_connection(shared: &Arc<Shared>, connector: &Arc<dyn Connector>) -> Result<()> {
    let token = {
        let auth = shared.auth.lock().unwrap();
        auth.as_ref().filter(|a| a.is_valid()).and_then(|a| a.token())
    };
    let Some(token) = token else {
        let state = shared.inner.lock().unwrap().state;
        return Err(SpeechError::InvalidState {
            operation: "connect",
            state,
        });
    };

    let request = ConnectRequest {
        url: shared.config.speech_url()?,
        connection_id: new_request_id(),
        bearer_token: token,
        connect_timeout: shared.config.connect_timeout,
    };

    shared.set_state(SessionState::Connecting);
    log::info!(
        "Session: Connecting to {}",
        request.url.host_str().unwrap_or("recognition endpoint")
    );

    match connector.connect(request).await {
        Ok(transport) => {
            let cancel = CancellationToken::new();
            {
                let mut inner = shared.inner.lock().unwrap();
                inner.outbound = Some(transport.outbound);
                inner.conn_cancel = Some(cancel.clone());
            }
            spawn_reader(
                Arc::clone(shared),
                Arc::clone(connector),
                transport.events,
                cancel,
            );
            shared.set_state(SessionState::Connected);
            log::info!("Session: Connected");
            Ok(())
        }
        Err(e) => {
            log::warn!("Session: Connection failed: {}", e);
            shared.set_state(SessionState::Authenticated);
            Err(e)
        }
    }
}

/// Detach the live connection, if any. Returns false when there was none.
fn teardown_connection(shared: &Shared) -> bool {
    let mut inner = shared.inner.lock().unwrap();
    if !matches!(
        inner.state,
        SessionState::Connected | SessionState::Streaming
    ) {
        return false;
    }
    inner.state = SessionState::Disconnecting;
    if let Some(cancel) = inner.conn_cancel.take() {
        cancel.cancel();
    }
    if let Some(outbound) = inner.outbound.take() {
        let _ = outbound.send(OutboundFrame::Close);
    }
    if let Some(packetizer) = inner.packetizer.as_mut() {
        packetizer.clear();
    }
    true
}

fn spawn_reader(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    mut events: UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                event = events.recv() => event,
                _ = cancel.cancelled() => return,
            };
            let Some(event) = event else {
                handle_closed(&shared, None);
                return;
            };
            match event {
                TransportEvent::Message(text) => {
                    if !handle_message(&shared, &connector, &text).await {
                        return;
                    }
                }
                TransportEvent::Closed(reason) => {
                    handle_closed(&shared, reason);
                    return;
                }
                TransportEvent::Error(reason) => {
                    handle_closed(&shared, Some(reason));
                    return;
                }
            }
        }
    });
}

/// React to one inbound text block. Returns false when this pump is done.
async fn handle_message(
    shared: &Arc<Shared>,
    connector: &Arc<dyn Connector>,
    text: &str,
) -> bool {
    if shared.disposed.load(Ordering::SeqCst) {
        return false;
    }
    let message = match ServerMessage::parse(text) {
        Ok(message) => message,
        Err(e) => {
            log::warn!("Session: Undecodable message: {}", e);
            shared.emit(SessionEvent::Error(SpeechError::Protocol(e)));
            return true;
        }
    };
    log::debug!("Session: Received {}", message.path());

    match message {
        ServerMessage::TurnEnd => {
            // Ack first, then drop the stale buffer, then tell the caller
            {
                let mut inner = shared.inner.lock().unwrap();
                if let Some(outbound) = inner.outbound.as_ref() {
                    if outbound.send(OutboundFrame::Text(telemetry_ack())).is_err() {
                        log::warn!("Session: Failed to queue turn acknowledgement");
                    }
                }
                if let Some(packetizer) = inner.packetizer.as_mut() {
                    packetizer.clear();
                }
            }
            shared.set_state_if(SessionState::Streaming, SessionState::Connected);
            shared.emit(SessionEvent::Message(ServerMessage::TurnEnd));

            if shared.config.reconnect_on_turn_end {
                reconnect(shared, connector).await;
                return false;
            }
            true
        }
        ServerMessage::SpeechEndDetected(payload) => {
            // Segment finished; anything still buffered is stale
            {
                let mut inner = shared.inner.lock().unwrap();
                if let Some(packetizer) = inner.packetizer.as_mut() {
                    packetizer.clear();
                }
            }
            shared.set_state_if(SessionState::Streaming, SessionState::Connected);
            shared.emit(SessionEvent::Message(ServerMessage::SpeechEndDetected(
                payload,
            )));
            true
        }
        other => {
            shared.emit(SessionEvent::Message(other));
            true
        }
    }
}

/// Cycle the connection after a turn when the config asks for it.
async fn reconnect(shared: &Arc<Shared>, connector: &Arc<dyn Connector>) {
    log::info!("Session: Cycling connection after turn end");
    if !teardown_connection(shared) {
        return;
    }
    shared.emit(SessionEvent::State(SessionState::Disconnecting));
    shared.set_state(SessionState::Authenticated);

    if let Err(e) = open_connection(shared, connector).await {
        log::warn!("Session: Reconnect failed: {}", e);
        shared.emit(SessionEvent::Error(e));
    }
}

/// The socket went away without the caller asking. Roll back to
/// `Authenticated` and surface the reason through the event queue.
fn handle_closed(shared: &Arc<Shared>, reason: Option<String>) {
    if shared.disposed.load(Ordering::SeqCst) {
        return;
    }
    {
        let mut inner = shared.inner.lock().unwrap();
        if !matches!(
            inner.state,
            SessionState::Connected | SessionState::Streaming
        ) {
            return;
        }
        inner.outbound = None;
        inner.conn_cancel = None;
        if let Some(packetizer) = inner.packetizer.as_mut() {
            packetizer.clear();
        }
        inner.state = SessionState::Authenticated;
    }
    log::warn!(
        "Session: Connection lost: {}",
        reason.as_deref().unwrap_or("unknown socket error")
    );
    shared.emit(SessionEvent::Error(SpeechError::transport(reason)));
    shared.emit(SessionEvent::State(SessionState::Authenticated));
}
