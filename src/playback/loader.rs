//! Fetching synthesized audio by URL

use std::time::Duration;

use async_trait::async_trait;

use crate::error::PlaybackError;

/// Fetches audio bytes from a URL
#[async_trait]
pub trait AudioLoader: Send + Sync {
    async fn load(&self, url: &str) -> Result<Vec<u8>, PlaybackError>;
}

/// HTTP loader with a whole-request timeout
pub struct HttpAudioLoader {
    client: reqwest::Client,
}

impl HttpAudioLoader {
    /// Create a loader that gives up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> crate::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl AudioLoader for HttpAudioLoader {
    async fn load(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                PlaybackError::LoadTimeout
            } else {
                PlaybackError::Load(e.to_string())
            }
        };

        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PlaybackError::Load(format!("{url} answered {status}")));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        tracing::debug!(bytes = bytes.len(), "audio loaded");
        Ok(bytes.to_vec())
    }
}
