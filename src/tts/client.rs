//! Speech synthesis client
//!
//! One call per chunk of text. Retrying is the caller's job; errors are
//! classified so the caller can tell a dead network from a failing server.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::error::SynthesisError;

/// Where the synthesized audio can be found
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Audio bytes delivered with the response
    Inline(Vec<u8>),
    /// Audio to fetch; `fallback` is tried if `primary` fails to load
    Url {
        primary: String,
        fallback: Option<String>,
    },
}

/// Result of synthesizing one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Synthesis {
    pub source: AudioSource,
    pub checksum: Option<String>,
}

/// Converts text to speech audio
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str) -> Result<Synthesis, SynthesisError>;
}

/// Client for the upstream synthesis gateway
pub struct UpstreamSynthesizer {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
    speaker: String,
}

impl UpstreamSynthesizer {
    /// Create a client for `url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        url: String,
        token: Option<SecretString>,
        speaker: String,
        timeout: Duration,
    ) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;

        tracing::debug!(url = %url, token_present = token.is_some(), "synthesis client initialized");

        Ok(Self {
            client,
            url,
            token,
            speaker,
        })
    }
}

#[derive(serde::Serialize)]
struct UpstreamRequest<'a> {
    data: &'a str,
    #[serde(rename = "filePath")]
    file_path: &'a str,
    base64: &'a str,
    checksum: &'a str,
    speaker: &'a str,
}

#[derive(Debug, Deserialize)]
struct UpstreamEnvelope {
    data: Option<UpstreamResult>,
}

#[derive(Debug, Deserialize)]
struct UpstreamResult {
    status: Option<String>,
    data: Option<UpstreamAudio>,
}

#[derive(Debug, Deserialize)]
struct UpstreamAudio {
    #[serde(rename = "filePath")]
    file_path: Option<String>,
    checksum: Option<serde_json::Value>,
    base64: Option<String>,
}

#[async_trait]
impl Synthesizer for UpstreamSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Synthesis, SynthesisError> {
        tracing::debug!(chars = text.chars().count(), "requesting synthesis");

        let body = UpstreamRequest {
            data: text,
            file_path: "true",
            base64: "0",
            checksum: "1",
            speaker: &self.speaker,
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.token {
            request = request.header("gateway-token", token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            tracing::warn!(error = %e, "synthesis request failed");
            SynthesisError::from_transport(&e)
        })?;

        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Server {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(SynthesisError::InvalidResponse(format!("upstream status {status}")));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| SynthesisError::InvalidResponse(e.to_string()))?;

        let synthesis = parse_upstream_response(value)?;
        tracing::debug!(inline = matches!(synthesis.source, AudioSource::Inline(_)), "synthesis ready");
        Ok(synthesis)
    }
}

/// Interpret the upstream gateway's JSON body
///
/// # Errors
///
/// Returns `InvalidResponse` unless the body reports success with a file path
pub fn parse_upstream_response(value: serde_json::Value) -> Result<Synthesis, SynthesisError> {
    let envelope: UpstreamEnvelope =
        serde_json::from_value(value).map_err(|e| SynthesisError::InvalidResponse(e.to_string()))?;

    let result = envelope
        .data
        .ok_or_else(|| SynthesisError::InvalidResponse("missing data".to_string()))?;

    if result.status.as_deref() != Some("success") {
        return Err(SynthesisError::InvalidResponse(format!(
            "upstream status {}",
            result.status.as_deref().unwrap_or("unknown")
        )));
    }

    let audio = result
        .data
        .ok_or_else(|| SynthesisError::InvalidResponse("missing audio data".to_string()))?;

    let file_path = audio
        .file_path
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| SynthesisError::InvalidResponse("missing file path".to_string()))?;

    let checksum = audio.checksum.and_then(|c| match c {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    });

    let source = match audio.base64.as_deref().map(str::trim) {
        Some(encoded) if !encoded.is_empty() => AudioSource::Inline(decode_base64_audio(encoded)?),
        _ => AudioSource::Url {
            primary: normalize_audio_url(&file_path),
            fallback: None,
        },
    };

    Ok(Synthesis { source, checksum })
}

/// Decode base64 audio, tolerating a `data:` URL prefix
///
/// # Errors
///
/// Returns `InvalidResponse` if the payload is not valid base64
pub fn decode_base64_audio(encoded: &str) -> Result<Vec<u8>, SynthesisError> {
    let payload = encoded
        .split_once("base64,")
        .map_or(encoded, |(_, data)| data);
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| SynthesisError::InvalidResponse(format!("bad base64 audio: {e}")))
}

/// Prefix `https://` on upstream file paths that carry no scheme
#[must_use]
pub fn normalize_audio_url(path: &str) -> String {
    let path = path.trim();
    if path.starts_with("http://") || path.starts_with("https://") {
        path.to_string()
    } else {
        format!("https://{}", path.trim_start_matches('/'))
    }
}
