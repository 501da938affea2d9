//! Text-to-speech
//!
//! The upstream gateway answers with a file path (and optionally inline
//! base64 audio); see [`client::parse_upstream_response`].

pub mod client;

pub use client::{AudioSource, Synthesis, Synthesizer, UpstreamSynthesizer, normalize_audio_url};
