//! One-shot calls to the non-streaming generation endpoint: audio file
//! transcription and conversation summarization. Simple request/response
//! with no retry or chunking; failures are recovered by the caller.

use crate::config::DEFAULT_GENERATE_MODEL;
use crate::transcript::TranscriptEntry;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const TRANSCRIBE_INSTRUCTION: &str =
    "Transcribe this audio recording verbatim. Return only the transcript text, \
     with no commentary or formatting.";

const SUMMARY_INSTRUCTION: &str =
    "Summarize the following conversation between a user and a voice assistant \
     in a few short sentences:";

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {status} - {message}")]
    ApiError { status: u16, message: String },
    #[error("Response contained no text")]
    EmptyResponse,
    #[error("Failed to read audio file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Nothing to summarize: transcript history is empty")]
    EmptyHistory,
}

/// Client for the one-shot generation endpoint.
pub struct GenerationClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl GenerationClient {
    pub fn new(api_key: String) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            base_url: BASE_URL.to_string(),
            model: DEFAULT_GENERATE_MODEL.to_string(),
        }
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    /// Override the endpoint base URL (for tests against a local server).
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Transcribe an audio file in one request.
    ///
    /// The file is read fully into memory and sent inline as base64 with a
    /// fixed instruction; the response text is returned verbatim.
    pub async fn transcribe_file(&self, path: &Path) -> Result<String, GenerationError> {
        let bytes = tokio::fs::read(path).await?;
        let mime_type = mime_for_path(path);
        log::info!(
            "Transcribing {} ({} bytes, {})",
            path.display(),
            bytes.len(),
            mime_type
        );

        let parts = json!([
            {
                "inlineData": {
                    "mimeType": mime_type,
                    "data": BASE64.encode(&bytes),
                }
            },
            { "text": TRANSCRIBE_INSTRUCTION },
        ]);

        self.generate(parts).await
    }

    /// Summarize a finished conversation in one request.
    pub async fn summarize(&self, history: &[TranscriptEntry]) -> Result<String, GenerationError> {
        if history.is_empty() {
            return Err(GenerationError::EmptyHistory);
        }

        let parts = json!([{ "text": summary_prompt(history) }]);
        self.generate(parts).await
    }

    async fn generate(&self, parts: serde_json::Value) -> Result<String, GenerationError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, self.model, self.api_key
        );

        let payload = json!({
            "contents": [{ "parts": parts }],
        });

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(GenerationError::ApiError {
                status: status.as_u16(),
                message: error_text,
            });
        }

        let body: serde_json::Value = response.json().await?;
        extract_text(&body).ok_or(GenerationError::EmptyResponse)
    }
}

/// Pull the concatenated text parts out of the first candidate.
fn extract_text(body: &serde_json::Value) -> Option<String> {
    let parts = body["candidates"][0]["content"]["parts"].as_array()?;
    let text: String = parts
        .iter()
        .filter_map(|part| part["text"].as_str())
        .collect();

    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn summary_prompt(history: &[TranscriptEntry]) -> String {
    let mut prompt = String::from(SUMMARY_INSTRUCTION);
    prompt.push_str("\n\n");
    for entry in history {
        prompt.push_str(&format!("{}: {}\n", entry.speaker, entry.text));
    }
    prompt
}

/// Best-effort MIME guess from the file extension. The platform file
/// picker accepted any audio type, so unknown extensions fall back to a
/// generic audio MIME rather than failing.
fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg" | "oga") => "audio/ogg",
        Some("flac") => "audio/flac",
        Some("m4a" | "aac") => "audio/aac",
        Some("webm") => "audio/webm",
        _ => "audio/mpeg",
    }
}
