//! Turn state machine
//!
//! Pure transition table: every input yields the effects the runtime must
//! perform. Captures and restart timers carry an epoch, turns carry a turn
//! number; inputs that refer to a superseded epoch are dropped.

use std::time::Duration;

use serde::Serialize;

use crate::error::{OrchestrationError, PlaybackError, RecognitionError};
use crate::orchestrator::TurnReply;
use crate::playback::{PlaybackEvent, PlaybackReport};

/// Top-level controller phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Listening,
    Processing,
    Speaking,
}

/// Delays before listening again
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartDelays {
    pub after_reply: Duration,
    pub after_empty: Duration,
    pub after_capture_error: Duration,
    pub after_orchestration_failure: Duration,
    pub after_permission: Duration,
}

impl Default for RestartDelays {
    fn default() -> Self {
        Self {
            after_reply: Duration::from_secs(1),
            after_empty: Duration::from_secs(2),
            after_capture_error: Duration::from_secs(2),
            after_orchestration_failure: Duration::from_secs(1),
            after_permission: Duration::from_secs(1),
        }
    }
}

/// Something that happened
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Controller started
    Start,
    PermissionGranted,
    PermissionDenied(RecognitionError),
    /// Time to probe the microphone again
    PermissionRetry,
    Partial { epoch: u64, text: String },
    Final { epoch: u64, text: String },
    CaptureFailed { epoch: u64, error: RecognitionError },
    Replied { turn: u64, user_text: String, reply: TurnReply },
    OrchestrationFailed { turn: u64, error: OrchestrationError },
    PlaybackFinished { turn: u64, result: Result<PlaybackReport, PlaybackError> },
    RestartElapsed { epoch: u64 },
    /// User asked to be heard immediately
    ListenNow,
}

/// Something observers may want to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControllerEvent {
    PhaseChanged(Phase),
    Partial(String),
    Transcript(String),
    Reply(TurnReply),
    /// Transient user-facing message
    Notice(String),
    Playback(PlaybackEvent),
}

/// Work for the runtime
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RequestPermission,
    SchedulePermissionRetry { delay: Duration },
    StartCapture { epoch: u64 },
    StopCapture,
    Process { turn: u64, user_text: String },
    AppendHistory { user_text: String, reply_text: String },
    Speak { turn: u64, text: String },
    StopPlayback,
    ScheduleRestart { epoch: u64, delay: Duration },
    Publish(ControllerEvent),
}

/// What the listening phase is doing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    None,
    /// Waiting for the restart timer of this epoch
    Waiting(u64),
    /// Capture of this epoch is live
    Active(u64),
}

/// The controller's transition table
#[derive(Debug, Clone)]
pub struct TurnMachine {
    phase: Phase,
    slot: Slot,
    epoch: u64,
    turn: u64,
    speaking_turn: Option<u64>,
    delays: RestartDelays,
}

impl TurnMachine {
    #[must_use]
    pub const fn new(delays: RestartDelays) -> Self {
        Self {
            phase: Phase::Idle,
            slot: Slot::None,
            epoch: 0,
            turn: 0,
            speaking_turn: None,
            delays,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a capture session is live
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        matches!(self.slot, Slot::Active(_))
    }

    /// Feed one input and collect the resulting effects
    pub fn step(&mut self, input: Input) -> Vec<Effect> {
        let mut effects = Vec::new();

        match input {
            Input::Start | Input::PermissionRetry => {
                if self.phase == Phase::Idle {
                    effects.push(Effect::RequestPermission);
                }
            }
            Input::PermissionGranted => {
                if self.phase == Phase::Idle {
                    tracing::info!("microphone permission granted");
                    self.enter_listening(self.delays.after_permission, &mut effects);
                }
            }
            Input::PermissionDenied(error) => {
                if self.phase == Phase::Idle {
                    effects.push(notice(&error));
                    effects.push(Effect::SchedulePermissionRetry {
                        delay: self.delays.after_capture_error,
                    });
                }
            }
            Input::RestartElapsed { epoch } => {
                if self.phase == Phase::Listening && self.slot == Slot::Waiting(epoch) {
                    self.start_capture(&mut effects);
                }
            }
            Input::Partial { epoch, text } => {
                if self.is_active(epoch) {
                    effects.push(Effect::Publish(ControllerEvent::Partial(text)));
                }
            }
            Input::Final { epoch, text } => {
                if self.is_active(epoch) {
                    self.on_final(text, &mut effects);
                }
            }
            Input::CaptureFailed { epoch, error } => {
                if self.is_active(epoch) {
                    self.on_capture_error(error, &mut effects);
                }
            }
            Input::Replied {
                turn,
                user_text,
                reply,
            } => self.on_reply(turn, user_text, reply, &mut effects),
            Input::OrchestrationFailed { turn, error } => {
                if self.phase == Phase::Processing && turn == self.turn {
                    tracing::warn!(turn, error = %error, "turn aborted");
                    effects.push(Effect::Publish(ControllerEvent::Notice(
                        OrchestrationError::USER_MESSAGE.to_string(),
                    )));
                    self.enter_listening(self.delays.after_orchestration_failure, &mut effects);
                } else {
                    tracing::debug!(turn, "stale orchestration failure ignored");
                }
            }
            Input::PlaybackFinished { turn, result } => {
                if self.phase == Phase::Speaking && self.speaking_turn == Some(turn) {
                    if let Err(e) = &result {
                        tracing::warn!(turn, error = %e, "reply could not be played");
                    }
                    self.speaking_turn = None;
                    self.enter_listening(self.delays.after_reply, &mut effects);
                }
            }
            Input::ListenNow => {
                if self.phase == Phase::Idle {
                    effects.push(Effect::RequestPermission);
                } else {
                    effects.push(Effect::StopCapture);
                    self.speaking_turn = None;
                    self.set_phase(Phase::Listening, &mut effects);
                    self.start_capture(&mut effects);
                }
            }
        }

        effects
    }

    const fn is_active(&self, epoch: u64) -> bool {
        matches!(self.phase, Phase::Listening) && matches!(self.slot, Slot::Active(e) if e == epoch)
    }

    fn set_phase(&mut self, phase: Phase, effects: &mut Vec<Effect>) {
        if self.phase != phase {
            tracing::debug!(from = ?self.phase, to = ?phase, "phase change");
            self.phase = phase;
            effects.push(Effect::Publish(ControllerEvent::PhaseChanged(phase)));
        }
    }

    /// Enter `Listening` and arm the restart timer
    fn enter_listening(&mut self, delay: Duration, effects: &mut Vec<Effect>) {
        self.set_phase(Phase::Listening, effects);
        self.epoch += 1;
        self.slot = Slot::Waiting(self.epoch);
        effects.push(Effect::ScheduleRestart {
            epoch: self.epoch,
            delay,
        });
    }

    fn start_capture(&mut self, effects: &mut Vec<Effect>) {
        self.epoch += 1;
        self.slot = Slot::Active(self.epoch);
        // A live capture and a live playback never coexist
        effects.push(Effect::StopPlayback);
        effects.push(Effect::StartCapture { epoch: self.epoch });
    }

    fn on_final(&mut self, text: String, effects: &mut Vec<Effect>) {
        let text = text.trim().to_string();
        if text.is_empty() {
            tracing::debug!("empty transcript, listening again");
            self.enter_listening(self.delays.after_empty, effects);
            return;
        }

        self.slot = Slot::None;
        self.turn += 1;
        effects.push(Effect::Publish(ControllerEvent::Transcript(text.clone())));
        self.set_phase(Phase::Processing, effects);
        effects.push(Effect::Process {
            turn: self.turn,
            user_text: text,
        });
    }

    fn on_capture_error(&mut self, error: RecognitionError, effects: &mut Vec<Effect>) {
        tracing::warn!(error = %error, "capture failed");
        effects.push(notice(&error));

        if error == RecognitionError::PermissionDenied {
            self.slot = Slot::None;
            self.set_phase(Phase::Idle, effects);
            effects.push(Effect::SchedulePermissionRetry {
                delay: self.delays.after_capture_error,
            });
            return;
        }

        self.enter_listening(self.delays.after_capture_error, effects);
    }

    fn on_reply(&mut self, turn: u64, user_text: String, reply: TurnReply, effects: &mut Vec<Effect>) {
        if self.phase == Phase::Idle {
            return;
        }
        if self.phase != Phase::Processing || turn != self.turn {
            tracing::warn!(turn, current = self.turn, phase = ?self.phase, "applying reply from an earlier turn");
        }

        if self.is_capturing() {
            effects.push(Effect::StopCapture);
        }
        self.slot = Slot::None;

        effects.push(Effect::AppendHistory {
            user_text,
            reply_text: reply.reply_text.clone(),
        });
        effects.push(Effect::Publish(ControllerEvent::Reply(reply.clone())));

        if reply.reply_text.trim().is_empty() {
            self.speaking_turn = None;
            self.enter_listening(self.delays.after_reply, effects);
            return;
        }

        self.speaking_turn = Some(turn);
        self.set_phase(Phase::Speaking, effects);
        effects.push(Effect::Speak {
            turn,
            text: reply.reply_text,
        });
    }
}

fn notice(error: &RecognitionError) -> Effect {
    Effect::Publish(ControllerEvent::Notice(error.user_message().to_string()))
}
