//! Robin - hands-free spoken dialogue loop
//!
//! This library provides the pieces of the Robin voice assistant:
//! - Speech capture with silence/ceiling endpointing
//! - Reply generation with concurrent intent classification and actions
//! - Chunked speech synthesis and interruptible playback
//! - The conversation controller that ties them into a listen/speak loop
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              ConversationController                  │
//! │   Idle → Listening → Processing → Speaking → ...    │
//! └───────┬──────────────────┬──────────────────┬───────┘
//!         │                  │                  │
//! ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//! │ SpeechCapture │  │ TurnProcessor │  │   Playback    │
//! │  recognizer   │  │  orchestrator │  │ chunker, TTS  │
//! │  mic / stdin  │  │  or backend   │  │ loader, sink  │
//! └───────────────┘  └───────────────┘  └───────────────┘
//! ```

pub mod api;
pub mod audio;
pub mod backend;
pub mod config;
pub mod controller;
pub mod db;
pub mod error;
pub mod history;
pub mod intent;
pub mod llm;
pub mod orchestrator;
pub mod playback;
pub mod retry;
pub mod speech;
pub mod tts;

pub use backend::BackendClient;
pub use config::Config;
pub use controller::{ControllerHandle, ControllerParts, ConversationController, Phase};
pub use db::{DbConn, DbPool};
pub use error::{Error, Result};
pub use history::{ChatTurn, ConversationHistory, HistoryStore};
pub use intent::{ActionRegistry, Intent};
pub use orchestrator::{IntentOrchestrator, TurnProcessor, TurnReply};
pub use playback::{AudioPlaybackEngine, PlaybackConfig, PlaybackReport};
pub use retry::RetryPolicy;
