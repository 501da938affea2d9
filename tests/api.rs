//! API endpoint integration tests

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tower::ServiceExt;

use robin_voice::api::{ApiState, router};
use robin_voice::api::tts::proxy_url;
use robin_voice::error::{OrchestrationError, SynthesisError};
use robin_voice::tts::{AudioSource, Synthesis, Synthesizer};
use robin_voice::{
    ActionRegistry, BackendClient, ChatTurn, IntentOrchestrator, RetryPolicy, TurnProcessor,
};

mod common;
use common::{FakeChat, FakeSynth, wav_bytes};

const PUBLIC_URL: &str = "http://robin.test";

/// Audio served by the stand-in upstream
const AUDIO: &[u8] = b"ID3audio";

fn orchestrator(chat: FakeChat) -> Arc<dyn TurnProcessor> {
    Arc::new(IntentOrchestrator::new(
        Arc::new(chat),
        ActionRegistry::default(),
        RetryPolicy::none(),
    ))
}

fn build_test_router(processor: Arc<dyn TurnProcessor>, synthesizer: Arc<dyn Synthesizer>) -> Router {
    let state = ApiState::new(processor, synthesizer, format!("{PUBLIC_URL}/")).unwrap();
    router(Arc::new(state))
}

fn default_router() -> Router {
    build_test_router(
        orchestrator(FakeChat::scripted("حتماً.", "گزارش خودم")),
        Arc::new(FakeSynth::new()),
    )
}

fn json_request(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}

/// Serve `app` on an ephemeral loopback port and return its base URL
async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

/// Upstream audio host honouring byte ranges on `/a.mp3`
fn audio_host() -> Router {
    async fn audio(headers: HeaderMap) -> Response {
        if headers.contains_key(header::RANGE) {
            (
                StatusCode::PARTIAL_CONTENT,
                [
                    (header::CONTENT_TYPE, "audio/mpeg"),
                    (header::ACCEPT_RANGES, "bytes"),
                    (header::CONTENT_RANGE, "bytes 0-3/8"),
                ],
                &AUDIO[..4],
            )
                .into_response()
        } else {
            (
                [(header::CONTENT_TYPE, "audio/mpeg"), (header::ACCEPT_RANGES, "bytes")],
                AUDIO,
            )
                .into_response()
        }
    }

    // Advertises ranges but always sends the whole file
    async fn whole() -> Response {
        (
            [(header::CONTENT_TYPE, "audio/mpeg"), (header::ACCEPT_RANGES, "bytes")],
            AUDIO,
        )
            .into_response()
    }

    Router::new()
        .route("/a.mp3", get(audio))
        .route("/whole.mp3", get(whole))
        .route("/gone.mp3", get(|| async { StatusCode::NOT_FOUND }))
}

/// Upstream that sends `chunks` four-byte pieces, one every `gap`
async fn trickle_host(chunks: usize, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut request = [0u8; 4096];
        let _ = socket.read(&mut request).await.unwrap();

        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: audio/mpeg\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
            chunks * 4
        );
        socket.write_all(head.as_bytes()).await.unwrap();
        for _ in 0..chunks {
            tokio::time::sleep(gap).await;
            socket.write_all(b"beat").await.unwrap();
        }
    });
    format!("http://{addr}/slow.mp3")
}

/// Synthesizer answering with a fixed audio URL
struct UrlSynth(String);

#[async_trait]
impl Synthesizer for UrlSynth {
    async fn synthesize(&self, _text: &str) -> Result<Synthesis, SynthesisError> {
        Ok(Synthesis {
            source: AudioSource::Url {
                primary: self.0.clone(),
                fallback: None,
            },
            checksum: Some("abc123".to_string()),
        })
    }
}

#[tokio::test]
async fn test_health_endpoint() {
    let response = default_router()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["status"], "OK");
    assert_eq!(json["message"], "دستیار رابین آماده است");
}

#[tokio::test]
async fn test_cors_exposes_headers() {
    let response = default_router()
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .header("origin", "http://localhost:5173")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}

#[tokio::test]
async fn test_process_requires_message() {
    for body in [
        serde_json::json!({}),
        serde_json::json!({ "userMessage": "   " }),
    ] {
        let response = default_router()
            .oneshot(json_request("/api/ai/process", body))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json = json_body(response).await;
        assert_eq!(json["error"], "پیام کاربر الزامی است");
    }
}

#[tokio::test]
async fn test_process_returns_merged_reply() {
    let response = default_router()
        .oneshot(json_request(
            "/api/ai/process",
            serde_json::json!({
                "userMessage": "گزارش خودم رو بده",
                "history": [{ "user": "سلام", "robin": "سلام! چطور کمکت کنم؟" }],
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["intent"], "گزارش خودم");
    assert_eq!(json["actionExecuted"], true);
    let text = json["response"].as_str().unwrap();
    assert!(text.starts_with("حتماً.\nگزارش آماده است:"), "{text}");
}

#[tokio::test]
async fn test_process_failure_hides_details() {
    let chat = FakeChat::new(Duration::from_millis(1), |_| {
        Err(OrchestrationError::Http {
            status: 401,
            body: "invalid api key".to_string(),
        })
    });
    let app = build_test_router(orchestrator(chat), Arc::new(FakeSynth::new()));

    let response = app
        .oneshot(json_request(
            "/api/ai/process",
            serde_json::json!({ "userMessage": "سلام" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json, serde_json::json!({ "error": OrchestrationError::USER_MESSAGE }));
}

#[tokio::test]
async fn test_convert_requires_text() {
    let response = default_router()
        .oneshot(json_request("/api/tts/convert", serde_json::json!({ "text": "" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "متن الزامی است");
}

#[tokio::test]
async fn test_convert_inline_audio() {
    use base64::Engine;

    let response = default_router()
        .oneshot(json_request("/api/tts/convert", serde_json::json!({ "text": "سلام" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert!(json.get("audioUrl").is_none());

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(json["audioBase64"].as_str().unwrap())
        .unwrap();
    assert_eq!(decoded, wav_bytes());
}

#[tokio::test]
async fn test_convert_failure_body() {
    let synth = FakeSynth::new().failing_on(
        "سلام",
        SynthesisError::Server {
            status: 500,
            message: "down".to_string(),
        },
    );
    let app = build_test_router(
        orchestrator(FakeChat::scripted("x", "null")),
        Arc::new(synth),
    );

    let response = app
        .oneshot(json_request("/api/tts/convert", serde_json::json!({ "text": "سلام" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert_eq!(json["error"], "خطا در تبدیل متن به صدا");
}

#[tokio::test]
async fn test_convert_proxies_reachable_audio() {
    let host = serve(audio_host()).await;
    let direct = format!("{host}/a.mp3");
    let app = build_test_router(
        orchestrator(FakeChat::scripted("x", "null")),
        Arc::new(UrlSynth(direct.clone())),
    );

    let response = app
        .oneshot(json_request("/api/tts/convert", serde_json::json!({ "text": "سلام" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["audioUrl"], proxy_url(PUBLIC_URL, &direct));
    assert_eq!(json["directUrl"], direct);
    assert_eq!(json["checksum"], "abc123");
}

#[tokio::test]
async fn test_convert_keeps_direct_url_when_head_check_fails() {
    let host = serve(audio_host()).await;
    let direct = format!("{host}/gone.mp3");
    let app = build_test_router(
        orchestrator(FakeChat::scripted("x", "null")),
        Arc::new(UrlSynth(direct.clone())),
    );

    let response = app
        .oneshot(json_request("/api/tts/convert", serde_json::json!({ "text": "سلام" })))
        .await
        .unwrap();

    let json = json_body(response).await;
    assert_eq!(json["audioUrl"], direct);
    assert_eq!(json["directUrl"], direct);
}

#[tokio::test]
async fn test_stream_rejects_bad_targets() {
    for uri in [
        "/api/tts/stream",
        "/api/tts/stream?u=file%3A%2F%2F%2Fetc%2Fpasswd",
        "/api/tts/stream?u=nonsense",
    ] {
        let response = default_router()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let json = json_body(response).await;
        assert_eq!(json["error"], "Missing target URL");
    }
}

#[tokio::test]
async fn test_stream_forwards_ranges() {
    let host = serve(audio_host()).await;
    let uri = format!(
        "/api/tts/stream?u={}",
        urlencoding::encode(&format!("{host}/a.mp3"))
    );

    let response = default_router()
        .oneshot(
            Request::builder()
                .uri(&uri)
                .header(header::RANGE, "bytes=0-3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 0-3/8");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], &AUDIO[..4]);
}

#[tokio::test]
async fn test_stream_full_body_without_range() {
    let host = serve(audio_host()).await;
    let uri = format!(
        "/api/tts/stream?u={}",
        urlencoding::encode(&format!("{host}/a.mp3"))
    );

    let response = default_router()
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], AUDIO);
}

#[tokio::test]
async fn test_stream_passes_through_ignored_range() {
    let host = serve(audio_host()).await;
    let uri = format!(
        "/api/tts/stream?u={}",
        urlencoding::encode(&format!("{host}/whole.mp3"))
    );

    let response = default_router()
        .oneshot(
            Request::builder()
                .uri(&uri)
                .header(header::RANGE, "bytes=0-3")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::ACCEPT_RANGES], "bytes");
    assert!(response.headers().get(header::CONTENT_RANGE).is_none());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], AUDIO);
}

#[tokio::test]
async fn test_stream_outlasts_read_timeout_while_data_flows() {
    let target = trickle_host(6, Duration::from_millis(150)).await;
    let state = ApiState::with_read_timeout(
        orchestrator(FakeChat::scripted("x", "null")),
        Arc::new(FakeSynth::new()),
        PUBLIC_URL,
        Duration::from_millis(400),
    )
    .unwrap();
    let uri = format!("/api/tts/stream?u={}", urlencoding::encode(&target));

    let started = std::time::Instant::now();
    let response = router(Arc::new(state))
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert_eq!(&body[..], b"beat".repeat(6).as_slice());
    assert!(started.elapsed() > Duration::from_millis(400));
}

#[tokio::test]
async fn test_stream_upstream_failure_is_bad_gateway() {
    let host = serve(audio_host()).await;
    let uri = format!(
        "/api/tts/stream?u={}",
        urlencoding::encode(&format!("{host}/gone.mp3"))
    );

    let response = default_router()
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let json = json_body(response).await;
    assert_eq!(json["error"], "Failed to fetch audio");
    assert_eq!(json["message"], "سرور صوتی در دسترس نیست");
}

#[tokio::test]
async fn test_backend_client_round_trip() {
    let base = serve(default_router()).await;
    let backend = BackendClient::new(base, Duration::from_secs(5)).unwrap();

    let history = vec![ChatTurn::new("سلام", "سلام!")];
    let reply = backend.process("گزارش خودم", &history).await.unwrap();
    assert!(reply.action_executed);
    assert_eq!(reply.intent_label, "گزارش خودم");

    let synthesis = backend.synthesize("سلام").await.unwrap();
    assert_eq!(synthesis.source, AudioSource::Inline(wav_bytes()));
}

#[tokio::test]
async fn test_backend_client_maps_failures() {
    let chat = FakeChat::new(Duration::from_millis(1), |_| Err(OrchestrationError::Timeout));
    let synth = FakeSynth::new().failing_on("سلام", SynthesisError::Network("reset".to_string()));
    let base = serve(build_test_router(orchestrator(chat), Arc::new(synth))).await;
    let backend = BackendClient::new(base, Duration::from_secs(5)).unwrap();

    let err = backend.process("سلام", &[]).await.unwrap_err();
    assert!(matches!(err, OrchestrationError::Http { status: 500, .. }));

    let err = backend.synthesize("سلام").await.unwrap_err();
    assert!(matches!(err, SynthesisError::Server { status: 500, .. }));
}

#[tokio::test]
async fn test_debug_describes_inline_synthesis() {
    let uri = format!("/api/tts/debug/{}", urlencoding::encode("سلام دنیا"));
    let response = default_router()
        .oneshot(Request::builder().uri(&uri).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["success"], true);
    assert_eq!(json["source"]["kind"], "inline");
    assert_eq!(json["source"]["bytes"], wav_bytes().len());
}

#[tokio::test]
async fn test_debug_describes_url_synthesis() {
    let app = build_test_router(
        orchestrator(FakeChat::scripted("x", "null")),
        Arc::new(UrlSynth("https://cdn.example.com/a.mp3".to_string())),
    );

    let response = app
        .oneshot(Request::builder().uri("/api/tts/debug/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let json = json_body(response).await;
    assert_eq!(json["source"]["kind"], "url");
    assert_eq!(json["source"]["url"], "https://cdn.example.com/a.mp3");
    assert_eq!(json["checksum"], "abc123");
}

#[tokio::test]
async fn test_debug_reports_synthesis_error() {
    let synth = FakeSynth::new().failing_on("hello", SynthesisError::Network("reset".to_string()));
    let app = build_test_router(orchestrator(FakeChat::scripted("x", "null")), Arc::new(synth));

    let response = app
        .oneshot(Request::builder().uri("/api/tts/debug/hello").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let json = json_body(response).await;
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("reset"));
}

#[tokio::test]
async fn test_url_check_requires_url() {
    let response = default_router()
        .oneshot(Request::builder().uri("/api/tts/test-url").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    assert_eq!(json["error"], "URL parameter required");
}

#[tokio::test]
async fn test_url_check_reports_accessibility() {
    let host = serve(audio_host()).await;

    let check = |path: &str| {
        format!(
            "/api/tts/test-url?url={}",
            urlencoding::encode(&format!("{host}{path}"))
        )
    };

    let response = default_router()
        .oneshot(Request::builder().uri(check("/a.mp3")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json = json_body(response).await;
    assert_eq!(json["accessible"], true);
    assert_eq!(json["status"], 200);
    assert_eq!(json["headers"]["accept-ranges"], "bytes");

    let response = default_router()
        .oneshot(Request::builder().uri(check("/gone.mp3")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["accessible"], false);
    assert_eq!(json["status"], 404);
}
