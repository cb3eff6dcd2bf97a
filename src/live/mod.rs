//! Live bidirectional audio session: state machine, event dispatch, and
//! the async runtime that owns the WebSocket, microphone, and speaker.

pub mod protocol;
mod runtime;

pub use runtime::{run_session, LiveConfig};

use crate::capture::CaptureError;
use crate::pcm::{self, AudioBuffer};
use crate::playback::{PlaybackError, PlaybackScheduler, ScheduledSource};
use crate::transcript::{TranscriptAggregator, TranscriptEntry};
use protocol::ServerContent;
use strum::Display;
use thiserror::Error;

/// Default live model id.
pub const DEFAULT_LIVE_MODEL: &str = "gemini-2.5-flash-native-audio-preview-12-2025";
/// Default prebuilt voice for synthesized speech.
pub const DEFAULT_VOICE: &str = "Puck";

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Missing API credential: {0}")]
    CredentialMissing(String),
    #[error("Microphone permission denied: {0}")]
    PermissionDenied(String),
    #[error("Session already active (state: {0})")]
    AlreadyActive(SessionState),
    #[error("WebSocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Remote session error: {0}")]
    Remote(String),
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("Playback error: {0}")]
    Playback(#[from] PlaybackError),
    #[error("Audio capture error: {0}")]
    Capture(String),
}

impl From<CaptureError> for SessionError {
    fn from(err: CaptureError) -> Self {
        match err {
            CaptureError::PermissionDenied(msg) => SessionError::PermissionDenied(msg),
            other => SessionError::Capture(other.to_string()),
        }
    }
}

/// Connection state of the live session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum SessionState {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Error,
}

impl SessionState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Connecting | SessionState::Listening | SessionState::Speaking
        )
    }
}

/// Session mode. Differs only in system instruction and whether
/// synthesized audio is decoded and played back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Mode {
    Conversation,
    Transcription,
}

impl Mode {
    pub fn system_instruction(&self) -> &'static str {
        match self {
            Mode::Conversation => {
                "You are a helpful voice assistant. Keep your responses short and \
                 conversational, as they will be spoken aloud."
            }
            Mode::Transcription => {
                "You are a silent transcription service. Listen to the audio and do \
                 not respond or engage in conversation."
            }
        }
    }

    /// Whether inline synthesized audio should be decoded and played.
    pub fn plays_audio(&self) -> bool {
        matches!(self, Mode::Conversation)
    }
}

/// Side effect requested by the state machine, executed by the runtime.
#[derive(Debug)]
pub enum SessionEvent {
    /// In-progress user transcript changed.
    UserTranscript(String),
    /// In-progress assistant transcript changed.
    AssistantTranscript(String),
    /// A turn completed; carries the entries appended to the history
    /// (possibly none, in which case the live display just clears).
    TurnFinalized(Vec<TranscriptEntry>),
    /// A decoded buffer was scheduled for playback.
    PlayAudio {
        source: ScheduledSource,
        buffer: AudioBuffer,
    },
    /// Force-stop all scheduled playback.
    StopPlayback,
    /// Release microphone, speaker, and socket.
    Teardown,
}

/// Owns the lifecycle of one live session.
///
/// The controller is a synchronous state machine: the async runtime feeds
/// it server messages and playback-completion notices, and executes the
/// [`SessionEvent`]s it returns. All cursor and active-set mutation
/// happens inside these synchronous calls.
pub struct SessionController {
    state: SessionState,
    mode: Mode,
    scheduler: PlaybackScheduler,
    aggregator: TranscriptAggregator,
}

impl SessionController {
    pub fn new(mode: Mode) -> Self {
        Self {
            state: SessionState::Idle,
            mode,
            scheduler: PlaybackScheduler::new(),
            aggregator: TranscriptAggregator::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn history(&self) -> &[TranscriptEntry] {
        self.aggregator.history()
    }

    pub fn into_history(self) -> Vec<TranscriptEntry> {
        self.aggregator.into_history()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }

    /// Switch mode. Only honored while idle; returns whether it took effect.
    pub fn set_mode(&mut self, mode: Mode) -> bool {
        if self.state != SessionState::Idle {
            log::warn!(
                "Session: ignoring mode switch while {} - stop the session first",
                self.state
            );
            return false;
        }
        self.mode = mode;
        true
    }

    /// Begin connecting. Valid only from idle.
    pub fn begin_connect(&mut self) -> Result<(), SessionError> {
        if self.state != SessionState::Idle {
            return Err(SessionError::AlreadyActive(self.state));
        }
        self.state = SessionState::Connecting;
        Ok(())
    }

    /// The remote session acknowledged setup; streaming may begin.
    pub fn connected(&mut self) {
        if self.state == SessionState::Connecting {
            self.state = SessionState::Listening;
        } else {
            log::warn!("Session: connected() while {}", self.state);
        }
    }

    /// Dispatch one inbound server content message. `now` is the playback
    /// clock in seconds since the session epoch.
    pub fn handle_message(&mut self, content: &ServerContent, now: f64) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        if !matches!(self.state, SessionState::Listening | SessionState::Speaking) {
            log::debug!("Session: dropping server content while {}", self.state);
            return events;
        }

        if content.interrupted == Some(true) {
            let stopped = self.scheduler.stop_all();
            if !stopped.is_empty() {
                log::debug!("Session: interrupted, stopping {} sources", stopped.len());
                events.push(SessionEvent::StopPlayback);
            }
            if self.state == SessionState::Speaking {
                self.state = SessionState::Listening;
            }
        }

        if let Some(text) = content
            .input_transcription
            .as_ref()
            .and_then(|t| t.text.as_deref())
        {
            self.aggregator.push_user_fragment(text);
            events.push(SessionEvent::UserTranscript(
                self.aggregator.current_user().to_string(),
            ));
        }

        if let Some(text) = content
            .output_transcription
            .as_ref()
            .and_then(|t| t.text.as_deref())
        {
            self.aggregator.push_assistant_fragment(text);
            events.push(SessionEvent::AssistantTranscript(
                self.aggregator.current_assistant().to_string(),
            ));
            if self.mode.plays_audio() && self.state == SessionState::Listening {
                self.state = SessionState::Speaking;
            }
        }

        if let Some(turn) = &content.model_turn {
            if self.mode.plays_audio() {
                for part in &turn.parts {
                    let Some(inline) = &part.inline_data else {
                        continue;
                    };
                    if !inline.mime_type.starts_with("audio/pcm") {
                        log::debug!("Session: skipping non-PCM part: {}", inline.mime_type);
                        continue;
                    }
                    match pcm::decode_base64_pcm(&inline.data, pcm::OUTPUT_SAMPLE_RATE, 1) {
                        Ok(buffer) => {
                            let source = self.scheduler.schedule(buffer.duration_secs(), now);
                            events.push(SessionEvent::PlayAudio { source, buffer });
                        }
                        Err(e) => {
                            // A malformed payload aborts only this playback.
                            log::warn!("Session: dropping undecodable audio payload: {}", e);
                        }
                    }
                }
            }
        }

        if content.turn_complete == Some(true) {
            let appended = self.aggregator.finalize_turn(self.mode.plays_audio());
            events.push(SessionEvent::TurnFinalized(appended));
        }

        events
    }

    /// A scheduled source finished playing naturally.
    pub fn playback_finished(&mut self, id: u64) {
        if self.scheduler.finish(id) && self.state == SessionState::Speaking {
            self.state = SessionState::Listening;
        }
    }

    /// Transition to the error state and request teardown.
    pub fn fail(&mut self) -> Vec<SessionEvent> {
        let events = self.teardown_events();
        self.state = SessionState::Error;
        events
    }

    /// Stop the session and request teardown. Idempotent; calling while
    /// already idle is a no-op.
    pub fn stop(&mut self) -> Vec<SessionEvent> {
        if self.state == SessionState::Idle {
            return Vec::new();
        }
        let events = self.teardown_events();
        self.state = SessionState::Idle;
        events
    }

    fn teardown_events(&mut self) -> Vec<SessionEvent> {
        let stopped = self.scheduler.stop_all();
        if !stopped.is_empty() {
            log::debug!("Session: force-stopping {} scheduled sources", stopped.len());
        }
        self.aggregator.clear_live();
        vec![SessionEvent::StopPlayback, SessionEvent::Teardown]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_connect_only_from_idle() {
        let mut session = SessionController::new(Mode::Conversation);
        assert_eq!(session.state(), SessionState::Idle);

        session.begin_connect().unwrap();
        assert_eq!(session.state(), SessionState::Connecting);
        assert!(matches!(
            session.begin_connect(),
            Err(SessionError::AlreadyActive(SessionState::Connecting))
        ));
    }

    #[test]
    fn test_connected_transitions_to_listening() {
        let mut session = SessionController::new(Mode::Conversation);
        session.begin_connect().unwrap();
        session.connected();
        assert_eq!(session.state(), SessionState::Listening);
    }

    #[test]
    fn test_fail_reaches_error_from_active_states() {
        let mut session = SessionController::new(Mode::Conversation);
        session.begin_connect().unwrap();
        let events = session.fail();
        assert_eq!(session.state(), SessionState::Error);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::Teardown)));
    }

    #[test]
    fn test_stop_from_error_returns_to_idle() {
        let mut session = SessionController::new(Mode::Conversation);
        session.begin_connect().unwrap();
        session.fail();
        session.stop();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_mode_display_strings() {
        assert_eq!(SessionState::Listening.to_string(), "listening");
        assert_eq!(SessionState::Idle.to_string(), "idle");
    }
}
