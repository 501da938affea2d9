//! Speech-to-text over an OpenAI-compatible transcription endpoint

use secrecy::{ExposeSecret, SecretString};

use crate::error::RecognitionError;

/// Response from a Whisper-style transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    text: String,
}

/// Transcribes WAV segments to text
pub struct SpeechToText {
    client: reqwest::Client,
    url: String,
    api_key: SecretString,
    model: String,
}

impl SpeechToText {
    /// Create a transcriber for `url` (e.g. `https://api.openai.com/v1/audio/transcriptions`)
    #[must_use]
    pub fn new(url: String, api_key: SecretString, model: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            api_key,
            model,
        }
    }

    /// Transcribe WAV audio bytes.
    ///
    /// `language` is a BCP-47 tag such as `fa-IR`; only the primary subtag is
    /// sent upstream.
    ///
    /// # Errors
    ///
    /// Returns `Network` if the endpoint is unreachable and
    /// `ServiceUnavailable` if it rejects the request
    pub async fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, RecognitionError> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let part = reqwest::multipart::Part::bytes(audio.to_vec())
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| RecognitionError::ServiceUnavailable(e.to_string()))?;

        let primary = language.split(['-', '_']).next().unwrap_or(language);
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("language", primary.to_string());

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(self.api_key.expose_secret())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                RecognitionError::Network(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            if matches!(status.as_u16(), 401 | 403) {
                return Err(RecognitionError::PermissionDenied);
            }
            return Err(RecognitionError::ServiceUnavailable(format!("{status}: {body}")));
        }

        let result: WhisperResponse = response
            .json()
            .await
            .map_err(|e| RecognitionError::ServiceUnavailable(e.to_string()))?;

        tracing::info!(transcript = %result.text, "transcription complete");
        Ok(result.text)
    }
}
