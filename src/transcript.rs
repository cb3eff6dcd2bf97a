use chrono::{DateTime, Utc};
use strum::Display;

/// Who said a finalized utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Speaker {
    #[strum(serialize = "You")]
    User,
    #[strum(serialize = "Assistant")]
    Assistant,
}

/// One finalized utterance. Immutable once appended to the history.
#[derive(Debug, Clone)]
pub struct TranscriptEntry {
    pub speaker: Speaker,
    pub text: String,
    pub completed_at: DateTime<Utc>,
}

/// Accumulates streaming transcript fragments into finalized entries.
///
/// One in-progress buffer per direction; both are cleared when a turn
/// completes. Entries land in the history in turn-completion order, the
/// user entry before the assistant entry within a turn.
#[derive(Debug, Default)]
pub struct TranscriptAggregator {
    user_buffer: String,
    assistant_buffer: String,
    history: Vec<TranscriptEntry>,
}

impl TranscriptAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_user_fragment(&mut self, fragment: &str) {
        self.user_buffer.push_str(fragment);
    }

    pub fn push_assistant_fragment(&mut self, fragment: &str) {
        self.assistant_buffer.push_str(fragment);
    }

    /// The not-yet-finalized user transcript for live display.
    pub fn current_user(&self) -> &str {
        &self.user_buffer
    }

    /// The not-yet-finalized assistant transcript for live display.
    pub fn current_assistant(&self) -> &str {
        &self.assistant_buffer
    }

    /// Finalize the current turn. Non-empty trimmed buffers become history
    /// entries; the assistant buffer is only kept when `keep_assistant` is
    /// set (conversation mode). Both buffers are cleared either way.
    ///
    /// Returns the entries appended by this turn.
    pub fn finalize_turn(&mut self, keep_assistant: bool) -> Vec<TranscriptEntry> {
        let mut appended = Vec::new();
        let completed_at = Utc::now();

        let user_text = self.user_buffer.trim();
        if !user_text.is_empty() {
            appended.push(TranscriptEntry {
                speaker: Speaker::User,
                text: user_text.to_string(),
                completed_at,
            });
        }

        let assistant_text = self.assistant_buffer.trim();
        if keep_assistant && !assistant_text.is_empty() {
            appended.push(TranscriptEntry {
                speaker: Speaker::Assistant,
                text: assistant_text.to_string(),
                completed_at,
            });
        }

        self.user_buffer.clear();
        self.assistant_buffer.clear();
        self.history.extend(appended.iter().cloned());
        appended
    }

    /// Drop any in-progress fragments without finalizing them.
    pub fn clear_live(&mut self) {
        self.user_buffer.clear();
        self.assistant_buffer.clear();
    }

    pub fn history(&self) -> &[TranscriptEntry] {
        &self.history
    }

    pub fn into_history(self) -> Vec<TranscriptEntry> {
        self.history
    }
}
