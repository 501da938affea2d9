//! Audio devices, codecs and the shared output session

pub mod capture;
pub mod decode;
pub mod session;
pub mod sink;

pub use capture::{MicrophoneCapture, SAMPLE_RATE, probe_input_device};
pub use decode::{AudioClip, decode_audio, samples_to_wav};
pub use session::AudioSession;
pub use sink::{AudioSink, CpalSink};
