//! Audio output session
//!
//! Owned once per process and shared by reference with the playback engine.
//! Records whether output has ever been unlocked and relays user interaction
//! events (key press, click) to a chunk waiting on an autoplay block.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Shared audio-output state
#[derive(Debug)]
pub struct AudioSession {
    unlocked: AtomicBool,
    interactions: watch::Sender<u64>,
}

impl Default for AudioSession {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioSession {
    /// Create a locked session
    #[must_use]
    pub fn new() -> Self {
        let (interactions, _) = watch::channel(0);
        Self {
            unlocked: AtomicBool::new(false),
            interactions,
        }
    }

    /// Whether audio has been successfully unlocked in this session
    #[must_use]
    pub fn is_unlocked(&self) -> bool {
        self.unlocked.load(Ordering::Acquire)
    }

    /// Record a successful unlock. Never reverts.
    pub fn mark_unlocked(&self) {
        if !self.unlocked.swap(true, Ordering::AcqRel) {
            tracing::info!("audio output unlocked");
        }
    }

    /// Report a user interaction (key press, click, touch)
    pub fn notify_interaction(&self) {
        self.interactions.send_modify(|count| *count = count.wrapping_add(1));
        tracing::debug!("user interaction recorded");
    }

    /// Wait for the next user interaction.
    ///
    /// Returns `false` on timeout or cancellation.
    pub async fn wait_for_interaction(&self, timeout: Duration, cancel: &CancellationToken) -> bool {
        let mut rx = self.interactions.subscribe();
        tokio::select! {
            changed = rx.changed() => changed.is_ok(),
            () = tokio::time::sleep(timeout) => false,
            () = cancel.cancelled() => false,
        }
    }
}
