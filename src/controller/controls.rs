//! Terminal controls for a running voice loop
//!
//! While the microphone does the listening, stdin stays free for short
//! commands. Every line also counts as a user interaction, which is what
//! releases a reply blocked on audio unlock.

use std::sync::Arc;

use tokio::sync::mpsc;

use super::ControllerHandle;
use crate::audio::AudioSession;

/// Shown when a line is not understood
pub const HELP: &str = "enter: resume audio, l: listen now, c: clear history, q: quit";

/// A command typed at the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    /// Interaction only
    Resume,
    /// Stop speaking and listen immediately
    Listen,
    ClearHistory,
    Quit,
}

impl ControlCommand {
    #[must_use]
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "" => Some(Self::Resume),
            "l" | "listen" => Some(Self::Listen),
            "c" | "clear" => Some(Self::ClearHistory),
            "q" | "quit" | "exit" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Apply typed commands until input ends or asks to quit
pub async fn run_controls(
    mut lines: mpsc::Receiver<String>,
    handle: ControllerHandle,
    audio: Arc<AudioSession>,
) {
    while let Some(line) = lines.recv().await {
        audio.notify_interaction();

        match ControlCommand::parse(&line) {
            Some(ControlCommand::Resume) => {}
            Some(ControlCommand::Listen) => handle.listen_now().await,
            Some(ControlCommand::ClearHistory) => handle.clear_history().await,
            Some(ControlCommand::Quit) => {
                handle.shutdown().await;
                return;
            }
            None => tracing::info!(input = %line, "unknown command ({HELP})"),
        }
    }
    tracing::debug!("control input closed");
}
