//! Speech input and text preparation
//!
//! Capture with endpointing, the recognizer backends behind it, and the
//! chunker that splits replies for synthesis.

pub mod capture;
pub mod chunker;
pub mod recognizer;
pub mod stt;
pub mod vad;

pub use capture::{CaptureConfig, CaptureEvent, CaptureHandle, SpeechCapture};
pub use chunker::{DEFAULT_MAX_LEN, split_text};
pub use recognizer::{
    AlwaysGranted, ConsoleRecognizer, MicPermission, MicRecognizer, PermissionProbe,
    RecognitionEvent, RecognitionSession, SpeechRecognizer, stdin_lines,
};
pub use stt::SpeechToText;
pub use vad::{SpeechSegmenter, VadOutcome};
