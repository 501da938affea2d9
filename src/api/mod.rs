//! HTTP API server for Robin
//!
//! Everything is mounted under `/api`: turn processing, synthesis with an
//! audio proxy, and a health probe.

pub mod ai;
pub mod health;
pub mod tts;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::error::OrchestrationError;
use crate::orchestrator::TurnProcessor;
use crate::tts::Synthesizer;

/// Shared state for API handlers
#[derive(Clone)]
pub struct ApiState {
    pub processor: Arc<dyn TurnProcessor>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Client for HEAD probes and the audio proxy
    pub http: reqwest::Client,
    /// Base URL clients use to reach this server
    pub public_url: String,
}

/// Longest gap allowed between two reads of proxied audio
const STREAM_READ_TIMEOUT: Duration = Duration::from_secs(20);

impl ApiState {
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(
        processor: Arc<dyn TurnProcessor>,
        synthesizer: Arc<dyn Synthesizer>,
        public_url: impl Into<String>,
    ) -> Result<Self> {
        Self::with_read_timeout(processor, synthesizer, public_url, STREAM_READ_TIMEOUT)
    }

    /// Like [`ApiState::new`], with a custom per-read timeout for the audio proxy.
    ///
    /// Proxied audio has no whole-request limit: a long file keeps streaming
    /// as long as upstream keeps sending.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn with_read_timeout(
        processor: Arc<dyn TurnProcessor>,
        synthesizer: Arc<dyn Synthesizer>,
        public_url: impl Into<String>,
        read_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .read_timeout(read_timeout)
            .build()?;

        Ok(Self {
            processor,
            synthesizer,
            http,
            public_url: public_url.into().trim_end_matches('/').to_string(),
        })
    }
}

/// Build the full router with CORS and request tracing
pub fn router(state: Arc<ApiState>) -> Router {
    let api = Router::new()
        .nest("/ai", ai::router(state.clone()))
        .nest("/tts", tts::router(state))
        .merge(health::router());

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .nest("/api", api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// HTTP API server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(state: ApiState, port: u16) -> Self {
        Self {
            state: Arc::new(state),
            port,
        }
    }

    /// Run the API server
    ///
    /// # Errors
    ///
    /// Returns error if server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind API server: {e}")))?;

        tracing::info!(port = self.port, "API server listening");

        axum::serve(listener, router(self.state))
            .await
            .map_err(|e| crate::Error::Config(format!("API server error: {e}")))?;

        Ok(())
    }

    /// Run the API server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

/// API errors, each with a fixed response body
#[derive(Debug)]
pub enum ApiError {
    BadRequest(&'static str),
    Orchestration(OrchestrationError),
    Synthesis(String),
    AudioUnavailable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Orchestration(e) => {
                tracing::error!(error = %e, "turn processing failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": OrchestrationError::USER_MESSAGE })),
                )
                    .into_response()
            }
            Self::Synthesis(detail) => {
                tracing::error!(error = %detail, "synthesis failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "success": false, "error": "خطا در تبدیل متن به صدا" })),
                )
                    .into_response()
            }
            Self::AudioUnavailable(detail) => {
                tracing::warn!(error = %detail, "audio proxy failed");
                (
                    StatusCode::BAD_GATEWAY,
                    Json(json!({
                        "error": "Failed to fetch audio",
                        "message": "سرور صوتی در دسترس نیست",
                    })),
                )
                    .into_response()
            }
        }
    }
}
