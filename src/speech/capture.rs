//! Speech capture with silence endpointing
//!
//! Wraps one recognition session and turns its raw events into partial
//! transcripts plus exactly one terminal event. A silence timer decides when
//! the user has stopped talking; a hard ceiling bounds the whole session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::recognizer::{RecognitionEvent, RecognitionSession, SpeechRecognizer};
use crate::error::RecognitionError;

/// How long a stopping recognizer may take to flush before we finalize anyway
const END_GRACE: Duration = Duration::from_secs(5);

/// Endpointing settings for a capture
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// BCP-47 language tag passed to the recognizer
    pub language: String,
    /// Quiet interval that ends the utterance
    pub silence_timeout: Duration,
    /// Hard ceiling on one listening session
    pub max_duration: Duration,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            language: "fa-IR".to_string(),
            silence_timeout: Duration::from_millis(1200),
            max_duration: Duration::from_secs(10),
        }
    }
}

/// Event delivered to the owner of a capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    /// Running transcript, not yet final
    Partial(String),
    /// The utterance is complete; may be empty
    Final(String),
    /// Capture failed before any words were heard
    Error(RecognitionError),
}

impl CaptureEvent {
    /// Whether this event ends the session
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Final(_) | Self::Error(_))
    }
}

/// Starts endpointed capture sessions on a recognizer
pub struct SpeechCapture {
    recognizer: Arc<dyn SpeechRecognizer>,
    config: CaptureConfig,
}

impl SpeechCapture {
    #[must_use]
    pub fn new(recognizer: Arc<dyn SpeechRecognizer>, config: CaptureConfig) -> Self {
        Self { recognizer, config }
    }

    /// Open a session and begin listening
    ///
    /// # Errors
    ///
    /// Returns the recognizer's error if the session cannot be opened
    pub async fn start(&self) -> Result<CaptureHandle, RecognitionError> {
        let session = self.recognizer.start(&self.config.language).await?;
        let (tx, rx) = mpsc::channel(32);
        let stop = CancellationToken::new();
        let abort = CancellationToken::new();
        let id = Uuid::new_v4();

        let timers = (!self.recognizer.manages_endpointing()).then(|| {
            (self.config.silence_timeout, self.config.max_duration)
        });

        tracing::debug!(capture = %id, language = %self.config.language, "capture started");
        tokio::spawn(run_capture(
            session,
            tx,
            Signals {
                stop: stop.clone(),
                abort: abort.clone(),
            },
            timers,
            id,
        ));

        Ok(CaptureHandle {
            id,
            events: rx,
            stop,
            abort,
        })
    }
}

/// Owner's side of a running capture
///
/// Dropping the handle aborts the capture.
#[derive(Debug)]
pub struct CaptureHandle {
    id: Uuid,
    events: mpsc::Receiver<CaptureEvent>,
    stop: CancellationToken,
    abort: CancellationToken,
}

impl CaptureHandle {
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Next event, or `None` once the session is over
    pub async fn next_event(&mut self) -> Option<CaptureEvent> {
        self.events.recv().await
    }

    /// Ask the session to finish. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// End the session now, discarding anything the recognizer has not
    /// delivered yet. No terminal event follows.
    pub fn abort(&self) {
        self.abort.cancel();
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.abort.cancel();
    }
}

struct Signals {
    stop: CancellationToken,
    abort: CancellationToken,
}

/// Join two transcript fragments with a single space where needed
fn join_fragments(left: &str, right: &str) -> String {
    let (l, r) = (left.trim_end(), right.trim_start());
    match (l.is_empty(), r.is_empty()) {
        (true, _) => r.to_string(),
        (_, true) => l.to_string(),
        _ => format!("{l} {r}"),
    }
}

async fn run_capture(
    mut session: RecognitionSession,
    tx: mpsc::Sender<CaptureEvent>,
    signals: Signals,
    timers: Option<(Duration, Duration)>,
    id: Uuid,
) {
    let Signals { stop, abort } = signals;
    let endpointing = timers.is_some();
    let (silence_timeout, max_duration) = timers.unwrap_or((Duration::MAX, Duration::MAX));

    let deadline_after = |d: Duration| {
        let now = Instant::now();
        now.checked_add(d)
            .unwrap_or_else(|| now + Duration::from_secs(86_400 * 365))
    };

    let silence = sleep_until(deadline_after(silence_timeout));
    let ceiling = sleep_until(deadline_after(max_duration));
    let grace = sleep_until(Instant::now());
    tokio::pin!(silence, ceiling, grace);

    let mut finalized = String::new();
    let mut interim = String::new();
    let mut stopping = false;

    loop {
        tokio::select! {
            () = abort.cancelled() => {
                tracing::debug!(capture = %id, "capture aborted by owner");
                session.stop.cancel();
                // Dropping the session tells the recognizer nobody is listening
                return;
            }
            () = stop.cancelled(), if !stopping => {
                tracing::debug!(capture = %id, "capture stopped by owner");
                stopping = true;
                session.stop.cancel();
                grace.as_mut().reset(Instant::now() + END_GRACE);
            }
            () = &mut silence, if endpointing && !stopping => {
                tracing::debug!(capture = %id, "silence timeout");
                stopping = true;
                session.stop.cancel();
                grace.as_mut().reset(Instant::now() + END_GRACE);
            }
            () = &mut ceiling, if endpointing && !stopping => {
                tracing::debug!(capture = %id, "listening ceiling reached");
                stopping = true;
                session.stop.cancel();
                grace.as_mut().reset(Instant::now() + END_GRACE);
            }
            () = &mut grace, if stopping => {
                tracing::warn!(capture = %id, "recognizer did not end in time");
                break;
            }
            event = session.events.recv() => {
                let text_changed = match event {
                    Some(RecognitionEvent::Interim(text)) => {
                        interim = text;
                        true
                    }
                    Some(RecognitionEvent::Final(text)) => {
                        finalized = join_fragments(&finalized, &text);
                        interim.clear();
                        true
                    }
                    Some(RecognitionEvent::Activity) => false,
                    Some(RecognitionEvent::Error(e)) => {
                        tracing::warn!(capture = %id, error = %e, "recognition failed");
                        session.stop.cancel();
                        // Words already heard still make an utterance
                        if !join_fragments(&finalized, &interim).is_empty() {
                            break;
                        }
                        let _ = tx.send(CaptureEvent::Error(e)).await;
                        return;
                    }
                    Some(RecognitionEvent::End) | None => break,
                };

                if !stopping {
                    silence.as_mut().reset(deadline_after(silence_timeout));
                }

                let partial = join_fragments(&finalized, &interim);
                if text_changed && !partial.is_empty() {
                    let _ = tx.send(CaptureEvent::Partial(partial)).await;
                }
            }
        }
    }

    let text = join_fragments(&finalized, &interim);
    tracing::debug!(capture = %id, chars = text.chars().count(), "capture final");
    let _ = tx.send(CaptureEvent::Final(text)).await;
}
