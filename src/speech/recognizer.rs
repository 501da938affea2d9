//! Speech recognition backends
//!
//! A [`SpeechRecognizer`] opens one recognition session per listen. The
//! session reports raw events; endpointing (silence and the listening
//! ceiling) is layered on top by [`super::SpeechCapture`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;

use super::stt::SpeechToText;
use super::vad::{SpeechSegmenter, VadOutcome};
use crate::audio::{MicrophoneCapture, SAMPLE_RATE, probe_input_device, samples_to_wav};
use crate::error::RecognitionError;

/// Raw event from a recognition session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognitionEvent {
    /// Provisional text for the utterance in progress; replaces the previous interim
    Interim(String),
    /// Confirmed text fragment; appended to earlier finals
    Final(String),
    /// Audio activity without text yet
    Activity,
    /// The session failed; no further events follow
    Error(RecognitionError),
    /// The session ended normally
    End,
}

/// A live recognition session
///
/// Cancelling `stop` asks the backend to finish: it flushes what it has and
/// then sends [`RecognitionEvent::End`]. Dropping `events` abandons the
/// session; backends should stop work once their sender reports closed.
#[derive(Debug)]
pub struct RecognitionSession {
    pub events: mpsc::Receiver<RecognitionEvent>,
    pub stop: CancellationToken,
}

/// Source of recognition sessions
#[async_trait]
pub trait SpeechRecognizer: Send + Sync {
    /// Open a recognition session for `language`
    async fn start(&self, language: &str) -> Result<RecognitionSession, RecognitionError>;

    /// Whether the backend decides on its own when an utterance is complete.
    ///
    /// When true, capture does not arm its silence and ceiling timers.
    fn manages_endpointing(&self) -> bool {
        false
    }
}

/// Microphone permission check
#[async_trait]
pub trait PermissionProbe: Send + Sync {
    /// Ask for (or verify) access to the microphone
    async fn request(&self) -> Result<(), RecognitionError>;
}

/// Probes the default input device
pub struct MicPermission;

#[async_trait]
impl PermissionProbe for MicPermission {
    async fn request(&self) -> Result<(), RecognitionError> {
        tokio::task::spawn_blocking(probe_input_device)
            .await
            .map_err(|e| RecognitionError::MicrophoneUnavailable(e.to_string()))?
    }
}

/// Grants immediately; used when input is not a microphone
pub struct AlwaysGranted;

#[async_trait]
impl PermissionProbe for AlwaysGranted {
    async fn request(&self) -> Result<(), RecognitionError> {
        Ok(())
    }
}

/// Microphone capture, energy segmentation and remote transcription
pub struct MicRecognizer {
    stt: Arc<SpeechToText>,
}

impl MicRecognizer {
    #[must_use]
    pub const fn new(stt: Arc<SpeechToText>) -> Self {
        Self { stt }
    }
}

#[async_trait]
impl SpeechRecognizer for MicRecognizer {
    async fn start(&self, language: &str) -> Result<RecognitionSession, RecognitionError> {
        let (frames_tx, frames_rx) = mpsc::channel(32);
        let mic = tokio::task::spawn_blocking(move || MicrophoneCapture::start(frames_tx))
            .await
            .map_err(|e| RecognitionError::MicrophoneUnavailable(e.to_string()))??;

        let (tx, rx) = mpsc::channel(32);
        let stop = CancellationToken::new();

        tokio::spawn(run_mic_session(
            mic,
            frames_rx,
            tx,
            stop.clone(),
            Arc::clone(&self.stt),
            language.to_string(),
        ));

        Ok(RecognitionSession { events: rx, stop })
    }
}

async fn run_mic_session(
    mut mic: MicrophoneCapture,
    mut frames: mpsc::Receiver<Vec<f32>>,
    tx: mpsc::Sender<RecognitionEvent>,
    stop: CancellationToken,
    stt: Arc<SpeechToText>,
    language: String,
) {
    let mut segmenter = SpeechSegmenter::new();

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            frame = frames.recv() => {
                let Some(samples) = frame else {
                    let _ = tx
                        .send(RecognitionEvent::Error(RecognitionError::MicrophoneUnavailable(
                            "input stream closed".to_string(),
                        )))
                        .await;
                    return;
                };

                match segmenter.process(&samples) {
                    VadOutcome::Silence => {}
                    VadOutcome::Speech => {
                        let _ = tx.send(RecognitionEvent::Activity).await;
                    }
                    VadOutcome::SegmentComplete(segment) => {
                        let result = tokio::select! {
                            result = transcribe_segment(&stt, &segment, &language, &tx) => result,
                            () = tx.closed() => break,
                        };
                        if let Err(e) = result {
                            let _ = tx.send(RecognitionEvent::Error(e)).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    mic.stop();

    if tx.is_closed() {
        tracing::debug!("recognition abandoned, skipping flush");
        return;
    }

    // Trailing speech that never hit a silence gap
    if let Some(segment) = segmenter.flush() {
        let result = tokio::select! {
            result = transcribe_segment(&stt, &segment, &language, &tx) => result,
            () = tx.closed() => {
                tracing::debug!("recognition abandoned during flush");
                return;
            }
        };
        if let Err(e) = result {
            let _ = tx.send(RecognitionEvent::Error(e)).await;
            return;
        }
    }

    let _ = tx.send(RecognitionEvent::End).await;
}

async fn transcribe_segment(
    stt: &SpeechToText,
    segment: &[f32],
    language: &str,
    tx: &mpsc::Sender<RecognitionEvent>,
) -> Result<(), RecognitionError> {
    let wav = samples_to_wav(segment, SAMPLE_RATE)
        .map_err(|e| RecognitionError::MicrophoneUnavailable(e.to_string()))?;
    let text = stt.transcribe(&wav, language).await?;

    if !text.trim().is_empty() {
        let _ = tx.send(RecognitionEvent::Final(text)).await;
    }
    Ok(())
}

/// Lines typed on stdin, read on a dedicated thread
///
/// A blocking read cannot be cancelled, so it runs outside the runtime where
/// it cannot hold up shutdown. The channel closes at end of input.
#[must_use]
pub fn stdin_lines() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("robin-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                match line {
                    Ok(line) => {
                        if tx.blocking_send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "stdin read failed");
                        break;
                    }
                }
            }
        });

    if let Err(e) = spawned {
        tracing::error!(error = %e, "failed to start stdin reader");
    }
    rx
}

/// One typed line per session
///
/// Each line is a complete utterance, so endpointing is left to the user
/// pressing enter. End of input aborts the session and trips
/// [`ConsoleRecognizer::closed`]; later sessions fail straight away.
pub struct ConsoleRecognizer {
    lines: Arc<Mutex<mpsc::Receiver<String>>>,
    closed: CancellationToken,
}

impl ConsoleRecognizer {
    /// Read utterances from `lines`, e.g. [`stdin_lines`]
    #[must_use]
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines: Arc::new(Mutex::new(lines)),
            closed: CancellationToken::new(),
        }
    }

    /// Cancelled once the input has ended
    #[must_use]
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

#[async_trait]
impl SpeechRecognizer for ConsoleRecognizer {
    async fn start(&self, _language: &str) -> Result<RecognitionSession, RecognitionError> {
        if self.closed.is_cancelled() {
            return Err(RecognitionError::Aborted);
        }

        let (tx, rx) = mpsc::channel(4);
        let stop = CancellationToken::new();
        let lines = Arc::clone(&self.lines);
        let closed = self.closed.clone();
        let session_stop = stop.clone();

        tokio::spawn(async move {
            let mut lines = lines.lock().await;
            let line = tokio::select! {
                () = session_stop.cancelled() => {
                    let _ = tx.send(RecognitionEvent::End).await;
                    return;
                }
                line = lines.recv() => line,
            };

            if let Some(line) = line {
                let _ = tx.send(RecognitionEvent::Final(line)).await;
                let _ = tx.send(RecognitionEvent::End).await;
            } else {
                tracing::info!("console input closed");
                closed.cancel();
                let _ = tx.send(RecognitionEvent::Error(RecognitionError::Aborted)).await;
            }
        });

        Ok(RecognitionSession { events: rx, stop })
    }

    fn manages_endpointing(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn console_lines_become_finals_until_input_ends() {
        let (typing, lines) = mpsc::channel(4);
        let recognizer = ConsoleRecognizer::new(lines);
        let closed = recognizer.closed();

        typing.send("گزارش خودم".to_string()).await.unwrap();
        let mut session = recognizer.start("fa-IR").await.unwrap();
        assert_eq!(
            session.events.recv().await,
            Some(RecognitionEvent::Final("گزارش خودم".to_string()))
        );
        assert_eq!(session.events.recv().await, Some(RecognitionEvent::End));
        assert!(!closed.is_cancelled());

        drop(typing);
        let mut session = recognizer.start("fa-IR").await.unwrap();
        assert_eq!(
            session.events.recv().await,
            Some(RecognitionEvent::Error(RecognitionError::Aborted))
        );
        assert!(closed.is_cancelled());
        assert!(matches!(
            recognizer.start("fa-IR").await,
            Err(RecognitionError::Aborted)
        ));
    }

    #[tokio::test]
    async fn stopped_console_session_ends_quietly() {
        let (_typing, lines) = mpsc::channel(4);
        let recognizer = ConsoleRecognizer::new(lines);

        let mut session = recognizer.start("fa-IR").await.unwrap();
        session.stop.cancel();
        assert_eq!(session.events.recv().await, Some(RecognitionEvent::End));
        assert!(!recognizer.closed().is_cancelled());
    }
}
