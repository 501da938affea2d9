//! Chat-completion client
//!
//! Both the reply generator and the intent classifier are plain
//! OpenAI-compatible chat completions; OpenRouter is the default endpoint.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::error::OrchestrationError;

/// Default chat-completion endpoint
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Title sent to OpenRouter for attribution
const APP_TITLE: &str = "Dastyar Robin";

/// Speaker of a chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat-completion request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A chat-completion service
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete `messages`, returning the assistant's text
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OrchestrationError>;
}

/// Settings for [`OpenRouterClient`]
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<SecretString>,
    pub referer: String,
    pub timeout: Duration,
}

/// OpenAI-compatible chat-completion client
pub struct OpenRouterClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<SecretString>,
    referer: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

impl OpenRouterClient {
    /// Build a client
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(settings: ChatSettings) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()?;

        tracing::debug!(
            endpoint = %settings.endpoint,
            model = %settings.model,
            api_key_present = settings.api_key.is_some(),
            "chat client initialized"
        );

        Ok(Self {
            client,
            endpoint: settings.endpoint,
            model: settings.model,
            api_key: settings.api_key,
            referer: settings.referer,
        })
    }
}

#[async_trait]
impl ChatBackend for OpenRouterClient {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OrchestrationError> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(OrchestrationError::MissingCredentials("OPENROUTER_API_KEY"))?;

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.expose_secret())
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", APP_TITLE)
            .json(&CompletionRequest {
                model: &self.model,
                messages,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "chat completion request failed");
                if e.is_timeout() {
                    OrchestrationError::Timeout
                } else {
                    OrchestrationError::Network(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "chat completion API error");
            return Err(OrchestrationError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                OrchestrationError::Timeout
            } else {
                OrchestrationError::InvalidResponse(e.to_string())
            }
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| OrchestrationError::InvalidResponse("no choices".to_string()))
    }
}
