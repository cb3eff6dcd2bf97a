//! Serde types for the live bidirectional session.
//!
//! Client messages: a one-time `setup` frame followed by `realtimeInput`
//! audio frames. Server messages: a `setupComplete` ack, then
//! `serverContent` frames carrying transcription fragments, inline
//! synthesized audio, and turn lifecycle flags.

use crate::pcm::PcmBlob;
use serde::{Deserialize, Serialize};

/// Base endpoint of the live WebSocket API.
pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

// ── Client → server ─────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct SetupMessage {
    pub setup: Setup,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Setup {
    pub model: String,
    pub generation_config: GenerationConfig,
    pub system_instruction: Content,
    /// Empty objects: presence enables transcription for that direction.
    pub input_audio_transcription: TranscriptionConfig,
    pub output_audio_transcription: TranscriptionConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub response_modalities: Vec<String>,
    pub speech_config: SpeechConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeechConfig {
    pub voice_config: VoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceConfig {
    pub prebuilt_voice_config: PrebuiltVoiceConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrebuiltVoiceConfig {
    pub voice_name: String,
}

#[derive(Debug, Default, Serialize)]
pub struct TranscriptionConfig {}

impl SetupMessage {
    pub fn new(model: &str, voice: &str, system_instruction: &str) -> Self {
        Self {
            setup: Setup {
                model: format!("models/{}", model),
                generation_config: GenerationConfig {
                    response_modalities: vec!["AUDIO".to_string()],
                    speech_config: SpeechConfig {
                        voice_config: VoiceConfig {
                            prebuilt_voice_config: PrebuiltVoiceConfig {
                                voice_name: voice.to_string(),
                            },
                        },
                    },
                },
                system_instruction: Content {
                    parts: vec![Part {
                        text: Some(system_instruction.to_string()),
                        inline_data: None,
                    }],
                },
                input_audio_transcription: TranscriptionConfig {},
                output_audio_transcription: TranscriptionConfig {},
            },
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInputMessage {
    pub realtime_input: RealtimeInput,
}

#[derive(Debug, Serialize)]
pub struct RealtimeInput {
    pub audio: MediaBlob,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaBlob {
    pub mime_type: String,
    pub data: String,
}

impl RealtimeInputMessage {
    pub fn from_blob(blob: &PcmBlob) -> Self {
        Self {
            realtime_input: RealtimeInput {
                audio: MediaBlob {
                    mime_type: blob.mime_type.to_string(),
                    data: blob.to_base64(),
                },
            },
        }
    }
}

// ── Server → client ─────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerMessage {
    pub setup_complete: Option<SetupComplete>,
    pub server_content: Option<ServerContent>,
}

#[derive(Debug, Deserialize)]
pub struct SetupComplete {}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerContent {
    pub input_transcription: Option<Transcription>,
    pub output_transcription: Option<Transcription>,
    pub model_turn: Option<Content>,
    pub turn_complete: Option<bool>,
    pub interrupted: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct Transcription {
    pub text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    pub data: String,
}
