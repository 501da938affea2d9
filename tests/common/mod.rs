//! Shared test utilities
//!
//! Fakes for every seam of the voice loop. All of them run on tokio time,
//! so tests can use `start_paused = true`.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use robin_voice::audio::{AudioClip, AudioSink, samples_to_wav};
use robin_voice::error::{OrchestrationError, PlaybackError, RecognitionError, SynthesisError};
use robin_voice::llm::{ChatBackend, ChatMessage};
use robin_voice::playback::AudioLoader;
use robin_voice::speech::{RecognitionEvent, RecognitionSession, SpeechRecognizer};
use robin_voice::tts::{AudioSource, Synthesis, Synthesizer};
use robin_voice::{DbPool, db};

/// Set up an in-memory test database
#[must_use]
pub fn setup_test_db() -> DbPool {
    db::init_memory().expect("failed to init test db")
}

/// A short silent WAV clip
#[must_use]
pub fn wav_bytes() -> Vec<u8> {
    samples_to_wav(&vec![0.0; 1600], 16000).expect("failed to encode wav")
}

/// One scripted recognizer event, sent after `delay`
pub type Step = (Duration, RecognitionEvent);

/// Recognizer that replays one script per session.
///
/// Once the scripts run out, sessions stay silent. Every session sends
/// `End` when stopped, after `flush_delay`, unless the capture has already
/// gone away.
pub struct FakeRecognizer {
    scripts: Mutex<VecDeque<Vec<Step>>>,
    starts: AtomicUsize,
    start_error: Mutex<Option<RecognitionError>>,
    flush_delay: Duration,
    abandoned: Arc<AtomicUsize>,
}

impl FakeRecognizer {
    pub fn new(scripts: Vec<Vec<Step>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            starts: AtomicUsize::new(0),
            start_error: Mutex::new(None),
            flush_delay: Duration::ZERO,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Take `delay` to flush after being stopped
    pub fn with_flush_delay(mut self, delay: Duration) -> Self {
        self.flush_delay = delay;
        self
    }

    /// Sessions whose flush was cut short because nobody was listening
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub fn silent() -> Self {
        Self::new(Vec::new())
    }

    /// Fail the next `start` with `error`
    pub fn fail_next_start(&self, error: RecognitionError) {
        *self.start_error.lock().unwrap() = Some(error);
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SpeechRecognizer for FakeRecognizer {
    async fn start(&self, _language: &str) -> Result<RecognitionSession, RecognitionError> {
        if let Some(error) = self.start_error.lock().unwrap().take() {
            return Err(error);
        }
        self.starts.fetch_add(1, Ordering::SeqCst);

        let script = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(16);
        let stop = CancellationToken::new();
        let session_stop = stop.clone();
        let flush_delay = self.flush_delay;
        let abandoned = Arc::clone(&self.abandoned);

        tokio::spawn(async move {
            for (delay, event) in script {
                tokio::select! {
                    () = session_stop.cancelled() => break,
                    () = tokio::time::sleep(delay) => {
                        let terminal = matches!(event, RecognitionEvent::Error(_) | RecognitionEvent::End);
                        if tx.send(event).await.is_err() || terminal {
                            return;
                        }
                    }
                }
            }
            session_stop.cancelled().await;
            tokio::select! {
                () = tokio::time::sleep(flush_delay) => {
                    let _ = tx.send(RecognitionEvent::End).await;
                }
                () = tx.closed() => {
                    abandoned.fetch_add(1, Ordering::SeqCst);
                }
            }
        });

        Ok(RecognitionSession { events: rx, stop })
    }
}

type ChatFn = dyn Fn(&[ChatMessage]) -> Result<String, OrchestrationError> + Send + Sync;

/// Chat backend answering through a closure after a fixed latency
pub struct FakeChat {
    respond: Box<ChatFn>,
    latency: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeChat {
    pub fn new(
        latency: Duration,
        respond: impl Fn(&[ChatMessage]) -> Result<String, OrchestrationError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            respond: Box::new(respond),
            latency,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Reply with `reply` and classify as `label`
    pub fn scripted(reply: &'static str, label: &'static str) -> Self {
        Self::new(Duration::from_millis(100), move |messages| {
            if is_classification(messages) {
                Ok(label.to_string())
            } else {
                Ok(reply.to_string())
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Whether `messages` is the intent classification request
pub fn is_classification(messages: &[ChatMessage]) -> bool {
    messages.len() == 1 && messages[0].content.contains("لیست دستورات")
}

#[async_trait]
impl ChatBackend for FakeChat {
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, OrchestrationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.latency).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        (self.respond)(messages)
    }
}

/// Synthesizer returning inline WAV, failing for chosen texts
pub struct FakeSynth {
    failing: Vec<(String, SynthesisError)>,
    url_mode: bool,
    requests: Mutex<Vec<String>>,
}

impl FakeSynth {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            url_mode: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always fail for `text` with `error`
    pub fn failing_on(mut self, text: &str, error: SynthesisError) -> Self {
        self.failing.push((text.to_string(), error));
        self
    }

    /// Answer with a proxied URL and a direct fallback instead of inline audio
    pub fn with_urls(mut self) -> Self {
        self.url_mode = true;
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn attempts_for(&self, text: &str) -> usize {
        self.requests().iter().filter(|t| *t == text).count()
    }
}

#[async_trait]
impl Synthesizer for FakeSynth {
    async fn synthesize(&self, text: &str) -> Result<Synthesis, SynthesisError> {
        self.requests.lock().unwrap().push(text.to_string());
        tokio::time::sleep(Duration::from_millis(10)).await;

        if let Some((_, error)) = self.failing.iter().find(|(t, _)| t == text) {
            return Err(error.clone());
        }

        let source = if self.url_mode {
            AudioSource::Url {
                primary: "http://proxy.test/stream".to_string(),
                fallback: Some("http://cdn.test/direct.wav".to_string()),
            }
        } else {
            AudioSource::Inline(wav_bytes())
        };

        Ok(Synthesis {
            source,
            checksum: None,
        })
    }
}

/// Loader serving WAV bytes, failing for chosen URLs
pub struct FakeLoader {
    failing: Vec<String>,
    loaded: Mutex<Vec<String>>,
}

impl FakeLoader {
    pub fn new() -> Self {
        Self {
            failing: Vec::new(),
            loaded: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(mut self, url: &str) -> Self {
        self.failing.push(url.to_string());
        self
    }

    pub fn loaded(&self) -> Vec<String> {
        self.loaded.lock().unwrap().clone()
    }
}

#[async_trait]
impl AudioLoader for FakeLoader {
    async fn load(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        self.loaded.lock().unwrap().push(url.to_string());
        if self.failing.iter().any(|u| u == url) {
            return Err(PlaybackError::Load(format!("{url} unavailable")));
        }
        Ok(wav_bytes())
    }
}

/// Sink that "plays" each clip for a fixed time
pub struct FakeSink {
    play_time: Duration,
    blocked: Mutex<usize>,
    played: AtomicUsize,
    unlocks: AtomicUsize,
}

impl FakeSink {
    pub fn new(play_time: Duration) -> Self {
        Self {
            play_time,
            blocked: Mutex::new(0),
            played: AtomicUsize::new(0),
            unlocks: AtomicUsize::new(0),
        }
    }

    /// Refuse the next `n` unlock/play calls with `AutoplayBlocked`
    pub fn blocked_for(self, n: usize) -> Self {
        *self.blocked.lock().unwrap() = n;
        self
    }

    pub fn played(&self) -> usize {
        self.played.load(Ordering::SeqCst)
    }

    pub fn unlocks(&self) -> usize {
        self.unlocks.load(Ordering::SeqCst)
    }

    fn take_block(&self) -> bool {
        let mut blocked = self.blocked.lock().unwrap();
        if *blocked > 0 {
            *blocked -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn unlock(&self) -> Result<(), PlaybackError> {
        self.unlocks.fetch_add(1, Ordering::SeqCst);
        if self.take_block() {
            return Err(PlaybackError::AutoplayBlocked);
        }
        Ok(())
    }

    async fn play(&self, _clip: &AudioClip, cancel: &CancellationToken) -> Result<(), PlaybackError> {
        if self.take_block() {
            return Err(PlaybackError::AutoplayBlocked);
        }
        tokio::select! {
            () = tokio::time::sleep(self.play_time) => {
                self.played.fetch_add(1, Ordering::SeqCst);
            }
            () = cancel.cancelled() => {}
        }
        Ok(())
    }
}

/// Collect everything currently buffered in a broadcast receiver
pub fn drain<T: Clone>(rx: &mut tokio::sync::broadcast::Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
        out.push(item);
    }
    out
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
