//! Conversation controller
//!
//! Runs the listen → process → speak loop. The [`TurnMachine`] decides;
//! this runtime carries out its effects and feeds every result back through
//! a single input queue, one arrival at a time.

pub mod controls;
mod machine;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

pub use controls::{ControlCommand, run_controls};
pub use machine::{ControllerEvent, Effect, Input, Phase, RestartDelays, TurnMachine};

use crate::history::{ChatTurn, ConversationHistory};
use crate::orchestrator::TurnProcessor;
use crate::playback::AudioPlaybackEngine;
use crate::speech::{CaptureEvent, PermissionProbe, SpeechCapture};

/// Commands accepted from outside the loop
#[derive(Debug)]
enum Command {
    ListenNow,
    ClearHistory,
    Shutdown,
}

/// Collaborators the controller drives
pub struct ControllerParts {
    pub capture: Arc<SpeechCapture>,
    pub permission: Arc<dyn PermissionProbe>,
    pub processor: Arc<dyn TurnProcessor>,
    pub playback: Arc<AudioPlaybackEngine>,
    pub history: ConversationHistory,
    pub delays: RestartDelays,
}

/// Cloneable handle to a running controller
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ControllerHandle {
    /// Interrupt whatever is happening and listen now
    pub async fn listen_now(&self) {
        let _ = self.commands.send(Command::ListenNow).await;
    }

    /// Forget the conversation so far
    pub async fn clear_history(&self) {
        let _ = self.commands.send(Command::ClearHistory).await;
    }

    /// Stop the loop
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }

    /// Observe the loop
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }
}

/// The voice loop
pub struct ConversationController {
    capture: Arc<SpeechCapture>,
    permission: Arc<dyn PermissionProbe>,
    processor: Arc<dyn TurnProcessor>,
    playback: Arc<AudioPlaybackEngine>,
    history: ConversationHistory,
    machine: TurnMachine,
    inputs_tx: mpsc::Sender<Input>,
    inputs_rx: mpsc::Receiver<Input>,
    commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<ControllerEvent>,
    capture_stop: Option<CancellationToken>,
    shutdown: CancellationToken,
}

impl ConversationController {
    #[must_use]
    pub fn new(parts: ControllerParts) -> (Self, ControllerHandle) {
        let (inputs_tx, inputs_rx) = mpsc::channel(64);
        let (commands_tx, commands) = mpsc::channel(8);
        let (events, _) = broadcast::channel(128);

        let handle = ControllerHandle {
            commands: commands_tx,
            events: events.clone(),
        };

        let controller = Self {
            capture: parts.capture,
            permission: parts.permission,
            processor: parts.processor,
            playback: parts.playback,
            history: parts.history,
            machine: TurnMachine::new(parts.delays),
            inputs_tx,
            inputs_rx,
            commands,
            events,
            capture_stop: None,
            shutdown: CancellationToken::new(),
        };

        (controller, handle)
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Run until shut down. Never fails: every error returns the loop to listening.
    pub async fn run(mut self) {
        tracing::info!("conversation loop started");
        let mut playback_events = self.playback.subscribe();

        self.apply(Input::Start);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::ListenNow) => self.apply(Input::ListenNow),
                    Some(Command::ClearHistory) => {
                        if let Err(e) = self.history.clear() {
                            tracing::warn!(error = %e, "failed to clear history");
                        } else {
                            tracing::info!("history cleared");
                        }
                    }
                    Some(Command::Shutdown) | None => break,
                },
                Some(input) = self.inputs_rx.recv() => self.apply(input),
                event = playback_events.recv() => {
                    if let Ok(event) = event {
                        let _ = self.events.send(ControllerEvent::Playback(event));
                    }
                }
            }
        }

        self.shutdown.cancel();
        if let Some(stop) = self.capture_stop.take() {
            stop.cancel();
        }
        self.playback.abort();
        tracing::info!("conversation loop stopped");
    }

    fn apply(&mut self, input: Input) {
        tracing::trace!(?input, "controller input");
        for effect in self.machine.step(input) {
            self.execute(effect);
        }
    }

    fn execute(&mut self, effect: Effect) {
        match effect {
            Effect::RequestPermission => {
                let permission = Arc::clone(&self.permission);
                self.spawn_input(async move {
                    match permission.request().await {
                        Ok(()) => Input::PermissionGranted,
                        Err(e) => Input::PermissionDenied(e),
                    }
                });
            }
            Effect::SchedulePermissionRetry { delay } => {
                self.spawn_timer(delay, Input::PermissionRetry);
            }
            Effect::ScheduleRestart { epoch, delay } => {
                self.spawn_timer(delay, Input::RestartElapsed { epoch });
            }
            Effect::StartCapture { epoch } => self.start_capture(epoch),
            Effect::StopCapture => {
                if let Some(stop) = self.capture_stop.take() {
                    stop.cancel();
                }
            }
            Effect::Process { turn, user_text } => {
                let processor = Arc::clone(&self.processor);
                let history = self.history.turns();
                self.spawn_input(async move {
                    match processor.process(&user_text, &history).await {
                        Ok(reply) => Input::Replied {
                            turn,
                            user_text,
                            reply,
                        },
                        Err(error) => Input::OrchestrationFailed { turn, error },
                    }
                });
            }
            Effect::AppendHistory {
                user_text,
                reply_text,
            } => {
                if let Err(e) = self.history.append(ChatTurn::new(user_text, reply_text)) {
                    tracing::warn!(error = %e, "failed to persist history");
                }
            }
            Effect::Speak { turn, text } => {
                let playback = Arc::clone(&self.playback);
                self.spawn_input(async move {
                    let result = playback.play_reply(&text).await;
                    Input::PlaybackFinished { turn, result }
                });
            }
            Effect::StopPlayback => self.playback.abort(),
            Effect::Publish(event) => {
                let _ = self.events.send(event);
            }
        }
    }

    fn start_capture(&mut self, epoch: u64) {
        if let Some(previous) = self.capture_stop.take() {
            previous.cancel();
        }

        let stop = self.shutdown.child_token();
        self.capture_stop = Some(stop.clone());

        let capture = Arc::clone(&self.capture);
        let inputs = self.inputs_tx.clone();

        tokio::spawn(async move {
            let mut handle = match capture.start().await {
                Ok(handle) => handle,
                Err(error) => {
                    let _ = inputs.send(Input::CaptureFailed { epoch, error }).await;
                    return;
                }
            };

            loop {
                let event = tokio::select! {
                    () = stop.cancelled() => {
                        handle.abort();
                        return;
                    }
                    event = handle.next_event() => event,
                };

                let input = match event {
                    Some(CaptureEvent::Partial(text)) => Input::Partial { epoch, text },
                    Some(CaptureEvent::Final(text)) => Input::Final { epoch, text },
                    Some(CaptureEvent::Error(error)) => Input::CaptureFailed { epoch, error },
                    None => return,
                };
                let terminal = !matches!(input, Input::Partial { .. });
                if inputs.send(input).await.is_err() || terminal {
                    return;
                }
            }
        });
    }

    /// Run `work` in the background and queue its result
    fn spawn_input<F>(&self, work: F)
    where
        F: Future<Output = Input> + Send + 'static,
    {
        let inputs = self.inputs_tx.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {}
                input = work => {
                    let _ = inputs.send(input).await;
                }
            }
        });
    }

    fn spawn_timer(&self, delay: Duration, input: Input) {
        self.spawn_input(async move {
            tokio::time::sleep(delay).await;
            input
        });
    }
}
