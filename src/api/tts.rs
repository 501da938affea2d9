//! Synthesis endpoint, same-origin audio proxy and synthesis diagnostics

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ApiError, ApiState};
use crate::tts::AudioSource;

/// How long the direct URL gets to answer a HEAD probe
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `/test-url` waits for a HEAD answer
const TEST_URL_TIMEOUT: Duration = Duration::from_secs(10);

/// Build TTS router
pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/convert", post(convert))
        .route("/stream", get(stream))
        .route("/debug/{text}", get(debug))
        .route("/test-url", get(test_url))
        .with_state(state)
}

/// Synthesis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConvertRequest {
    #[serde(default)]
    pub text: Option<String>,
}

/// Synthesis response, also returned (with `success: false`) on failure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConvertResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, alias = "base64", skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

async fn convert(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<ConvertRequest>,
) -> Result<Json<ConvertResponse>, ApiError> {
    let text = request
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or(ApiError::BadRequest("متن الزامی است"))?;

    let synthesis = state
        .synthesizer
        .synthesize(&text)
        .await
        .map_err(|e| ApiError::Synthesis(e.to_string()))?;

    let mut response = ConvertResponse {
        success: true,
        checksum: synthesis.checksum,
        ..ConvertResponse::default()
    };

    match synthesis.source {
        AudioSource::Inline(bytes) => {
            response.audio_base64 = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        }
        AudioSource::Url { primary, .. } => {
            let audio_url = if probe(&state.http, &primary).await {
                proxy_url(&state.public_url, &primary)
            } else {
                primary.clone()
            };
            response.audio_url = Some(audio_url);
            response.direct_url = Some(primary);
        }
    }

    Ok(Json(response))
}

/// Whether `url` answers a HEAD request in time
async fn probe(http: &reqwest::Client, url: &str) -> bool {
    match http.head(url).timeout(PROBE_TIMEOUT).send().await {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            tracing::debug!(status = %response.status(), "direct audio URL probe refused, not proxying");
            false
        }
        Err(e) => {
            tracing::debug!(error = %e, "direct audio URL probe failed, not proxying");
            false
        }
    }
}

/// Proxied stream URL for `direct` on this server
#[must_use]
pub fn proxy_url(public_url: &str, direct: &str) -> String {
    format!(
        "{}/api/tts/stream?u={}",
        public_url.trim_end_matches('/'),
        urlencoding::encode(direct)
    )
}

/// Parse a proxy target, accepting only `http` and `https`
#[must_use]
pub fn proxy_target(raw: &str) -> Option<url::Url> {
    let url = url::Url::parse(raw.trim()).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    u: Option<String>,
}

async fn stream(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let target = query
        .u
        .as_deref()
        .and_then(proxy_target)
        .ok_or(ApiError::BadRequest("Missing target URL"))?;

    let range = headers.get(header::RANGE).cloned();

    let mut request = state
        .http
        .get(target.as_str())
        .header(header::ACCEPT_ENCODING, "identity");
    if let Some(range) = &range {
        request = request.header(header::RANGE, range.clone());
    }

    let upstream = request
        .send()
        .await
        .map_err(|e| ApiError::AudioUnavailable(e.to_string()))?;

    let status = upstream.status();
    if !status.is_success() {
        return Err(ApiError::AudioUnavailable(format!("upstream answered {status}")));
    }

    let upstream_headers = upstream.headers().clone();
    // Upstream may ignore the range and send the whole file
    let ranged = status == StatusCode::PARTIAL_CONTENT;

    tracing::debug!(target = %target, requested_range = range.is_some(), ranged, "proxying audio");

    let content_type = upstream_headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("audio/mpeg"));

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, content_type);

    for name in [header::CONTENT_LENGTH, header::ACCEPT_RANGES] {
        if let Some(value) = upstream_headers.get(&name) {
            builder = builder.header(name, value.clone());
        }
    }
    if ranged && let Some(value) = upstream_headers.get(header::CONTENT_RANGE) {
        builder = builder.header(header::CONTENT_RANGE, value.clone());
    }

    builder
        .body(Body::from_stream(upstream.bytes_stream()))
        .map_err(|e| ApiError::AudioUnavailable(e.to_string()))
}

/// Diagnostic: synthesize `text` and describe what the backend returned
async fn debug(State(state): State<Arc<ApiState>>, Path(text): Path<String>) -> Response {
    tracing::debug!(chars = text.chars().count(), "debug synthesis");

    match state.synthesizer.synthesize(&text).await {
        Ok(synthesis) => {
            let source = match synthesis.source {
                AudioSource::Inline(bytes) => json!({ "kind": "inline", "bytes": bytes.len() }),
                AudioSource::Url { primary, fallback } => {
                    json!({ "kind": "url", "url": primary, "fallback": fallback })
                }
            };
            Json(json!({
                "success": true,
                "source": source,
                "checksum": synthesis.checksum,
            }))
            .into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "success": false, "error": e.to_string() })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TestUrlQuery {
    url: Option<String>,
}

/// Diagnostic: report whether an audio URL answers a HEAD request
async fn test_url(
    State(state): State<Arc<ApiState>>,
    Query(query): Query<TestUrlQuery>,
) -> Result<Json<Value>, ApiError> {
    let raw = query
        .url
        .filter(|u| !u.trim().is_empty())
        .ok_or(ApiError::BadRequest("URL parameter required"))?;

    let Some(target) = proxy_target(&raw) else {
        return Ok(Json(json!({
            "success": false,
            "error": "only http and https URLs can be tested",
            "accessible": false,
        })));
    };

    let report = match state.http.head(target.as_str()).timeout(TEST_URL_TIMEOUT).send().await {
        Ok(response) if response.status().is_success() => {
            let headers: serde_json::Map<String, Value> = response
                .headers()
                .iter()
                .filter_map(|(name, value)| {
                    value
                        .to_str()
                        .ok()
                        .map(|v| (name.as_str().to_string(), Value::String(v.to_string())))
                })
                .collect();
            json!({
                "success": true,
                "status": response.status().as_u16(),
                "headers": headers,
                "accessible": true,
            })
        }
        Ok(response) => json!({
            "success": false,
            "status": response.status().as_u16(),
            "error": format!("upstream answered {}", response.status()),
            "accessible": false,
        }),
        Err(e) => {
            tracing::debug!(target = %target, error = %e, "URL test failed");
            json!({ "success": false, "error": e.to_string(), "accessible": false })
        }
    };

    Ok(Json(report))
}
