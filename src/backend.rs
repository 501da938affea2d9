//! Client for a remote Robin HTTP backend
//!
//! Lets the voice loop run against `/api/ai/process` and `/api/tts/convert`
//! on another host instead of calling the upstream services itself.

use std::time::Duration;

use async_trait::async_trait;

use crate::api::ai::{HistoryEntry, ProcessRequest};
use crate::api::tts::{ConvertRequest, ConvertResponse};
use crate::error::{OrchestrationError, SynthesisError};
use crate::history::ChatTurn;
use crate::orchestrator::{TurnProcessor, TurnReply};
use crate::tts::client::decode_base64_audio;
use crate::tts::{AudioSource, Synthesis, Synthesizer};

/// HTTP client for a Robin backend
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();

        tracing::debug!(base_url = %base_url, "backend client initialized");

        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve a possibly relative URL from the backend against its base
    #[must_use]
    pub fn resolve_url(&self, url: &str) -> String {
        let url = url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base_url)
    }

    /// Turn a convert response into a playable source
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` when the body reports failure or carries no audio
    pub fn synthesis_from_response(&self, body: ConvertResponse) -> Result<Synthesis, SynthesisError> {
        if !body.success {
            return Err(SynthesisError::InvalidResponse(
                body.error.unwrap_or_else(|| "backend reported failure".to_string()),
            ));
        }

        if let Some(encoded) = body.audio_base64.as_deref().filter(|b| !b.trim().is_empty()) {
            return Ok(Synthesis {
                source: AudioSource::Inline(decode_base64_audio(encoded)?),
                checksum: body.checksum,
            });
        }

        let primary = body
            .audio_url
            .as_deref()
            .or(body.direct_url.as_deref())
            .filter(|u| !u.trim().is_empty())
            .map(|u| self.resolve_url(u))
            .ok_or_else(|| SynthesisError::InvalidResponse("no audio in response".to_string()))?;

        let fallback = body
            .direct_url
            .as_deref()
            .map(|u| self.resolve_url(u))
            .filter(|u| *u != primary);

        Ok(Synthesis {
            source: AudioSource::Url { primary, fallback },
            checksum: body.checksum,
        })
    }
}

#[async_trait]
impl TurnProcessor for BackendClient {
    async fn process(
        &self,
        user_text: &str,
        history: &[ChatTurn],
    ) -> Result<TurnReply, OrchestrationError> {
        let body = ProcessRequest {
            user_message: Some(user_text.to_string()),
            history: history.iter().map(HistoryEntry::from).collect(),
        };

        let response = self
            .client
            .post(self.endpoint("ai/process"))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    OrchestrationError::Timeout
                } else {
                    OrchestrationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, "backend rejected turn");
            return Err(OrchestrationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<TurnReply>()
            .await
            .map_err(|e| OrchestrationError::InvalidResponse(e.to_string()))
    }
}

#[async_trait]
impl Synthesizer for BackendClient {
    async fn synthesize(&self, text: &str) -> Result<Synthesis, SynthesisError> {
        let response = self
            .client
            .post(self.endpoint("tts/convert"))
            .json(&ConvertRequest {
                text: Some(text.to_string()),
            })
            .send()
            .await
            .map_err(|e| SynthesisError::from_transport(&e))?;

        let status = response.status();
        if status.is_server_error() {
            let message = response.text().await.unwrap_or_default();
            return Err(SynthesisError::Server {
                status: status.as_u16(),
                message,
            });
        }
        if !status.is_success() {
            return Err(SynthesisError::InvalidResponse(format!("backend status {status}")));
        }

        let body: ConvertResponse = response
            .json()
            .await
            .map_err(|e| SynthesisError::InvalidResponse(e.to_string()))?;

        self.synthesis_from_response(body)
    }
}
