//! Interpreter session orchestration.
//!
//! Ties together:
//! - [`AudioCapture`] for the microphone
//! - [`PeerSession`] for transport and the "response" data channel
//! - [`TurnRouter`] for turning tagged events into two transcripts
//!
//! ## Architecture
//!
//! ```text
//! mic ─▸ AudioCapture ─▸ frames ─▸ PeerSession ─▸ interpreter service
//!                                       │
//!                     PeerEvent ────────┤
//!                         │             └─▸ RemoteAudio ─▸ caller
//!                         ▼
//!                  InterpreterSession ─▸ TurnRouter ─▸ SessionEvent ─▸ caller
//! ```
//!
//! The session runs as two background tasks:
//! 1. **Event pump**: drains [`PeerEvent`]s, drives the router, forwards
//!    [`SessionEvent`]s.
//! 2. **Tick timer**: once a second, reaps stale router state and reports
//!    stats.
//!
//! Both tasks hold only a [`Weak`] reference, so dropping the last strong
//! handle ends them.

use crate::capture::AudioCapture;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::events::SessionUpdate;
use crate::lang::LanguageCode;
use crate::peer::{PeerEvent, PeerSession, RemoteAudio};
use crate::prompt;
use crate::router::{RouterConfig, RouterStats, TurnRouter, TurnUpdate};
use crate::signaling::SignalingClient;
use crate::transcript::TranscriptPair;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;

// ── State and events ──────────────────────────────────────────────

/// Connection lifecycle of one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session, or a session that ended cleanly.
    Idle,
    /// Signaling and ICE in progress.
    Connecting,
    /// Data channel open and configured.
    Connected,
    /// Transport or configuration failure. A new start is required.
    Error,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Connected => "connected",
            SessionState::Error => "error",
        };
        f.write_str(s)
    }
}

/// Everything a frontend needs to render the session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(SessionState),
    /// One routing outcome: live text, commits, summaries.
    Turn(TurnUpdate),
    /// Decoded remote audio became available.
    RemoteAudio(RemoteAudio),
    /// Periodic router counters.
    Stats(RouterStats),
}

// ── Outbound frame seam ───────────────────────────────────────────

/// Where outbound configuration frames go. [`PeerSession`] in production,
/// a buffer in tests.
#[async_trait]
pub trait FrameSink: Send + Sync {
    async fn send_frame(&self, payload: &str) -> Result<()>;
}

#[async_trait]
impl FrameSink for PeerSession {
    async fn send_frame(&self, payload: &str) -> Result<()> {
        self.send_text(payload).await
    }
}

/// Build and send one `session.update` frame: interpreter instructions for
/// the current party languages plus turn-detection tuning.
pub async fn push_session_update(
    sink: &dyn FrameSink,
    config: &Config,
    party_a: LanguageCode,
    party_b: LanguageCode,
) -> Result<()> {
    let instructions = prompt::build_instructions(party_a, party_b);
    let update = SessionUpdate::new(instructions, &config.vad, &config.transcription_model);
    let payload = update
        .to_json()
        .map_err(|e| Error::Transport(format!("encoding session.update: {e}")))?;
    tracing::info!(
        party_a = party_a.as_str(),
        party_b = party_b.as_str(),
        "pushing session configuration"
    );
    sink.send_frame(&payload).await
}

// ── Session ───────────────────────────────────────────────────────

/// A running interpreter session: capture, peer, router.
///
/// All methods take `&self`; the session is shared between the caller and
/// its background tasks through an [`Arc`].
pub struct InterpreterSession {
    session_id: String,
    peer: PeerSession,
    capture: Mutex<AudioCapture>,
    router: Mutex<TurnRouter>,
    state: Mutex<SessionState>,
    config: Config,
    events: mpsc::Sender<SessionEvent>,
    stopping: AtomicBool,
}

impl InterpreterSession {
    /// Open the microphone, connect the peer, and spawn the background
    /// tasks. The data channel is usually not open yet when this returns;
    /// [`SessionEvent::StateChanged`] reports [`SessionState::Connected`]
    /// once configuration has been pushed.
    pub async fn start(
        config: Config,
        events: mpsc::Sender<SessionEvent>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let session_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            session_id = %session_id,
            party_a = config.party_a.as_str(),
            party_b = config.party_b.as_str(),
            "starting interpreter session"
        );
        let _ = events
            .send(SessionEvent::StateChanged(SessionState::Connecting))
            .await;

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<i16>>(64);
        let mut capture = AudioCapture::open(config.input_device.as_deref(), frame_tx)?;

        let (peer_tx, peer_rx) = mpsc::channel::<PeerEvent>(256);
        let signaling = SignalingClient::new(config.signal_url.clone());
        let peer = match PeerSession::connect(
            &signaling,
            config.party_a,
            config.party_b,
            frame_rx,
            peer_tx,
        )
        .await
        {
            Ok(peer) => peer,
            Err(e) => {
                capture.close();
                let _ = events
                    .send(SessionEvent::StateChanged(SessionState::Error))
                    .await;
                return Err(e);
            }
        };

        let router = TurnRouter::new(RouterConfig::from(&config));
        let session = Arc::new(Self {
            session_id,
            peer,
            capture: Mutex::new(capture),
            router: Mutex::new(router),
            state: Mutex::new(SessionState::Connecting),
            config,
            events,
            stopping: AtomicBool::new(false),
        });

        tokio::spawn(Self::event_pump(peer_rx, Arc::downgrade(&session)));
        tokio::spawn(Self::tick_timer(Arc::downgrade(&session)));

        Ok(session)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.lock()
    }

    /// Gate the microphone. The device stays open; disabled capture sends
    /// nothing, so the service hears silence.
    pub fn set_microphone(&self, on: bool) {
        self.capture.lock().set_enabled(on);
    }

    pub fn microphone_enabled(&self) -> bool {
        self.capture.lock().is_enabled()
    }

    /// Name of the input device actually opened.
    pub fn device_name(&self) -> String {
        self.capture.lock().device_name().to_owned()
    }

    /// Languages currently in effect, `(party_a, party_b)`.
    pub fn languages(&self) -> (LanguageCode, LanguageCode) {
        let router = self.router.lock();
        (router.config().party_a, router.config().party_b)
    }

    /// Switch party languages mid-session. The router is hard reset first
    /// so nothing buffered under the old pair can leak into the new one,
    /// then the service gets fresh instructions.
    pub async fn set_languages(&self, party_a: LanguageCode, party_b: LanguageCode) -> Result<()> {
        {
            let mut router = self.router.lock();
            router.hard_reset();
            router.set_languages(party_a, party_b);
        }
        tracing::info!(
            session_id = %self.session_id,
            party_a = party_a.as_str(),
            party_b = party_b.as_str(),
            "language change, routing state reset"
        );
        push_session_update(&self.peer, &self.config, party_a, party_b).await
    }

    /// Snapshot of both transcripts.
    pub fn transcripts(&self) -> TranscriptPair {
        self.router.lock().transcripts().clone()
    }

    /// Snapshot of the router counters.
    pub fn stats(&self) -> RouterStats {
        self.router.lock().stats().clone()
    }

    /// Stop capture and tear the peer down. Idempotent.
    pub async fn stop(&self) {
        self.shutdown(SessionState::Idle).await;
    }

    /// Release every session resource and land on `terminal`: stop capture,
    /// drop in-flight routing state, close channel and connection. Runs at
    /// most once; transport events caused by our own close are suppressed
    /// by the stopping flag. Committed transcripts survive for export.
    async fn shutdown(&self, terminal: SessionState) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(
            session_id = %self.session_id,
            state = %terminal,
            "shutting down session"
        );
        self.capture.lock().close();
        self.router.lock().hard_reset();
        self.peer.close().await;
        self.transition(terminal).await;
    }

    // ── Internal: peer event handling ─────────────────────────────

    async fn handle_peer_event(&self, event: PeerEvent) {
        if self.stopping.load(Ordering::Relaxed) {
            return;
        }
        match event {
            PeerEvent::ChannelOpen => {
                let (party_a, party_b) = self.languages();
                match push_session_update(&self.peer, &self.config, party_a, party_b).await {
                    Ok(()) => self.transition(SessionState::Connected).await,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to push session configuration");
                        self.transition(SessionState::Error).await;
                    }
                }
            }
            PeerEvent::Frame(raw) => {
                let updates = self.router.lock().on_frame(&raw);
                self.forward_updates(updates).await;
            }
            PeerEvent::ChannelClosed => {
                tracing::info!("data channel closed by remote");
                self.shutdown(SessionState::Idle).await;
            }
            PeerEvent::TransportFailed(reason) => {
                tracing::error!(reason = %reason, "transport failed");
                self.shutdown(SessionState::Error).await;
            }
            PeerEvent::RemoteAudio(handle) => {
                let _ = self.events.send(SessionEvent::RemoteAudio(handle)).await;
            }
        }
    }

    async fn transition(&self, next: SessionState) {
        {
            let mut state = self.state.lock();
            if *state == next {
                return;
            }
            *state = next;
        }
        tracing::info!(session_id = %self.session_id, state = %next, "session state");
        let _ = self.events.send(SessionEvent::StateChanged(next)).await;
    }

    async fn forward_updates(&self, updates: Vec<TurnUpdate>) {
        for update in updates {
            let _ = self.events.send(SessionEvent::Turn(update)).await;
        }
    }

    // ── Internal: background tasks ────────────────────────────────

    /// Drains peer events for the whole session. Ends when every sender is
    /// gone, which happens when the peer connection is dropped.
    async fn event_pump(mut peer_rx: mpsc::Receiver<PeerEvent>, session: Weak<Self>) {
        while let Some(event) = peer_rx.recv().await {
            let Some(session) = session.upgrade() else {
                break;
            };
            session.handle_peer_event(event).await;
        }
        tracing::debug!("peer event pump stopped");
    }

    /// Once a second: reap stale router buffers, report counters.
    async fn tick_timer(session: Weak<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            let Some(session) = session.upgrade() else {
                break;
            };
            if session.stopping.load(Ordering::Relaxed) {
                break;
            }
            let (updates, stats) = {
                let mut router = session.router.lock();
                (router.tick(), router.stats().clone())
            };
            session.forward_updates(updates).await;
            let _ = session.events.send(SessionEvent::Stats(stats)).await;
        }
        tracing::debug!("tick timer stopped");
    }
}

// ── Facade ────────────────────────────────────────────────────────

/// Owns at most one running [`InterpreterSession`] and the event channel
/// its consumers read from.
pub struct Interpreter {
    config: Config,
    events: mpsc::Sender<SessionEvent>,
    active: tokio::sync::Mutex<Option<Arc<InterpreterSession>>>,
}

impl Interpreter {
    /// Build the interpreter and hand back the event stream.
    pub fn new(config: Config) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, event_rx) = mpsc::channel(256);
        (
            Self {
                config,
                events,
                active: tokio::sync::Mutex::new(None),
            },
            event_rx,
        )
    }

    /// Start a session. Starting while one is already running is a no-op.
    pub async fn start(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        if active.is_some() {
            tracing::warn!("session already running, ignoring start");
            return Ok(());
        }
        let session = InterpreterSession::start(self.config.clone(), self.events.clone()).await?;
        *active = Some(session);
        Ok(())
    }

    /// Stop and drop the running session, if any.
    pub async fn stop(&self) {
        let mut active = self.active.lock().await;
        if let Some(session) = active.take() {
            session.stop().await;
        }
    }

    /// Handle to the running session, if any.
    pub async fn session(&self) -> Option<Arc<InterpreterSession>> {
        self.active.lock().await.clone()
    }
}

// ── Tests ─────────────────────────────────────────────────────────
