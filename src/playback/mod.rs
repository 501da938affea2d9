//! Reply playback
//!
//! [`AudioPlaybackEngine::play_reply`] splits a reply into chunks and walks
//! each one through `Fetching → Decodable → Playing → Ended`, strictly in
//! order. Synthesis is retried per chunk; a chunk that still fails is
//! skipped so the rest of the reply is heard. At most one reply plays at a
//! time: starting another, or calling [`AudioPlaybackEngine::abort`], cancels
//! the current one and discards its queued chunks.

mod loader;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use loader::{AudioLoader, HttpAudioLoader};

use crate::audio::{AudioSession, AudioSink, decode_audio};
use crate::error::PlaybackError;
use crate::retry::{RetryPolicy, retry};
use crate::speech::{DEFAULT_MAX_LEN, split_text};
use crate::tts::{AudioSource, Synthesizer};

/// Playback tunables
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Maximum characters per synthesis chunk
    pub max_chunk_len: usize,
    /// Pause between consecutive chunks
    pub inter_chunk_pause: Duration,
    /// Synthesis retry policy, applied per chunk
    pub retry: RetryPolicy,
    /// How long a blocked chunk waits for a user interaction
    pub unlock_timeout: Duration,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            max_chunk_len: DEFAULT_MAX_LEN,
            inter_chunk_pause: Duration::from_millis(300),
            retry: RetryPolicy::default(),
            unlock_timeout: Duration::from_secs(30),
        }
    }
}

/// One bounded slice of reply text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthesisChunk {
    pub text: String,
    pub index: usize,
    pub total: usize,
}

/// Lifecycle of one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkState {
    Fetching,
    Decodable,
    /// Output refused to start; waiting for a user interaction
    AutoplayBlocked,
    Playing,
    Ended,
    /// Failed after all retries; the next chunk follows
    Skipped,
}

/// Progress notification for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEvent {
    pub session: Uuid,
    pub index: usize,
    pub total: usize,
    pub state: ChunkState,
}

/// Summary of one `play_reply` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlaybackReport {
    pub total: usize,
    pub played: usize,
    pub skipped: usize,
    pub aborted: bool,
}

enum ChunkOutcome {
    Ended,
    Aborted,
}

/// Current playback session: its id and interruption token
struct ActiveSession {
    id: Uuid,
    cancel: CancellationToken,
}

/// Plays replies chunk by chunk
pub struct AudioPlaybackEngine {
    synthesizer: Arc<dyn Synthesizer>,
    loader: Arc<dyn AudioLoader>,
    sink: Arc<dyn AudioSink>,
    audio: Arc<AudioSession>,
    config: PlaybackConfig,
    active: Mutex<Option<ActiveSession>>,
    events: broadcast::Sender<PlaybackEvent>,
}

impl AudioPlaybackEngine {
    #[must_use]
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        loader: Arc<dyn AudioLoader>,
        sink: Arc<dyn AudioSink>,
        audio: Arc<AudioSession>,
        config: PlaybackConfig,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            synthesizer,
            loader,
            sink,
            audio,
            config,
            active: Mutex::new(None),
            events,
        }
    }

    /// Subscribe to per-chunk progress
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    /// Whether a reply is currently playing
    #[must_use]
    pub fn is_playing(&self) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Stop the current reply, if any. Queued chunks are discarded.
    pub fn abort(&self) {
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(session) = previous {
            tracing::debug!(session = %session.id, "playback aborted");
            session.cancel.cancel();
        }
    }

    /// Play `text` to completion.
    ///
    /// Resolves once every chunk has ended or been skipped, or when the
    /// session is aborted.
    ///
    /// # Errors
    ///
    /// Returns `PlaybackError::Exhausted` if the reply had chunks and none of
    /// them could be played
    pub async fn play_reply(&self, text: &str) -> Result<PlaybackReport, PlaybackError> {
        let (id, cancel) = self.begin_session();
        let result = self.play_chunks(id, text, &cancel).await;
        self.end_session(id);
        result
    }

    fn begin_session(&self) -> (Uuid, CancellationToken) {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let previous = self
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(ActiveSession {
                id,
                cancel: cancel.clone(),
            });
        if let Some(previous) = previous {
            tracing::debug!(session = %previous.id, "superseded by new reply");
            previous.cancel.cancel();
        }
        (id, cancel)
    }

    fn end_session(&self, id: Uuid) {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if active.as_ref().is_some_and(|s| s.id == id) {
            *active = None;
        }
    }

    fn emit(&self, session: Uuid, chunk: &SynthesisChunk, state: ChunkState) {
        let _ = self.events.send(PlaybackEvent {
            session,
            index: chunk.index,
            total: chunk.total,
            state,
        });
    }

    async fn play_chunks(
        &self,
        session: Uuid,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<PlaybackReport, PlaybackError> {
        let texts: Vec<String> = split_text(text, self.config.max_chunk_len)
            .into_iter()
            .filter(|t| !t.trim().is_empty())
            .collect();

        let total = texts.len();
        let mut report = PlaybackReport {
            total,
            ..PlaybackReport::default()
        };
        if total == 0 {
            return Ok(report);
        }

        tracing::info!(session = %session, chunks = total, "playing reply");

        for (index, text) in texts.into_iter().enumerate() {
            if cancel.is_cancelled() {
                report.aborted = true;
                break;
            }

            let chunk = SynthesisChunk { text, index, total };
            match self.play_chunk(session, &chunk, cancel).await {
                Ok(ChunkOutcome::Ended) => report.played += 1,
                Ok(ChunkOutcome::Aborted) => {
                    report.aborted = true;
                    break;
                }
                Err(e) => {
                    tracing::warn!(session = %session, chunk = index, total, error = %e, "chunk skipped");
                    self.emit(session, &chunk, ChunkState::Skipped);
                    report.skipped += 1;
                }
            }

            if index + 1 < total {
                tokio::select! {
                    () = tokio::time::sleep(self.config.inter_chunk_pause) => {}
                    () = cancel.cancelled() => {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        tracing::info!(
            session = %session,
            played = report.played,
            skipped = report.skipped,
            aborted = report.aborted,
            "reply finished"
        );

        if report.played == 0 && !report.aborted {
            return Err(PlaybackError::Exhausted);
        }
        Ok(report)
    }

    async fn play_chunk(
        &self,
        session: Uuid,
        chunk: &SynthesisChunk,
        cancel: &CancellationToken,
    ) -> crate::Result<ChunkOutcome> {
        self.emit(session, chunk, ChunkState::Fetching);

        let synthesis = tokio::select! {
            result = retry(&self.config.retry, crate::error::SynthesisError::is_retryable, |_| {
                self.synthesizer.synthesize(&chunk.text)
            }) => result?,
            () = cancel.cancelled() => return Ok(ChunkOutcome::Aborted),
        };

        let bytes = tokio::select! {
            result = self.load(synthesis.source) => result?,
            () = cancel.cancelled() => return Ok(ChunkOutcome::Aborted),
        };

        let clip = decode_audio(&bytes)?;
        self.emit(session, chunk, ChunkState::Decodable);

        if !self.audio.is_unlocked() {
            match self.sink.unlock().await {
                Ok(()) => self.audio.mark_unlocked(),
                Err(PlaybackError::AutoplayBlocked) => {
                    tracing::debug!("unlock probe blocked");
                }
                Err(e) => tracing::warn!(error = %e, "unlock probe failed"),
            }
        }

        let mut waited_for_gesture = false;
        loop {
            self.emit(session, chunk, ChunkState::Playing);
            match self.sink.play(&clip, cancel).await {
                Ok(()) if cancel.is_cancelled() => return Ok(ChunkOutcome::Aborted),
                Ok(()) => {
                    self.audio.mark_unlocked();
                    self.emit(session, chunk, ChunkState::Ended);
                    return Ok(ChunkOutcome::Ended);
                }
                Err(PlaybackError::AutoplayBlocked) if !waited_for_gesture => {
                    self.emit(session, chunk, ChunkState::AutoplayBlocked);
                    tracing::info!(chunk = chunk.index, "autoplay blocked, waiting for user interaction");

                    let woke = self
                        .audio
                        .wait_for_interaction(self.config.unlock_timeout, cancel)
                        .await;
                    if cancel.is_cancelled() {
                        return Ok(ChunkOutcome::Aborted);
                    }
                    if !woke {
                        return Err(PlaybackError::AutoplayBlocked.into());
                    }
                    waited_for_gesture = true;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolve an audio source to bytes, falling back to the secondary URL
    async fn load(&self, source: AudioSource) -> Result<Vec<u8>, PlaybackError> {
        match source {
            AudioSource::Inline(bytes) => Ok(bytes),
            AudioSource::Url { primary, fallback } => match self.loader.load(&primary).await {
                Ok(bytes) => Ok(bytes),
                Err(e) => {
                    let Some(fallback) = fallback else {
                        return Err(e);
                    };
                    tracing::warn!(error = %e, "primary audio URL failed, trying direct URL");
                    self.loader.load(&fallback).await
                }
            },
        }
    }
}
