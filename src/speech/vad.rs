//! Energy-based voice activity detection
//!
//! Splits a stream of 16kHz frames into utterance segments: speech followed
//! by half a second of silence. Each segment is sent to STT as a unit.

/// Minimum audio energy threshold to consider speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Minimum duration of speech to keep a segment (in samples at 16kHz)
const MIN_SPEECH_SAMPLES: usize = 4800; // 0.3 seconds

/// Silence duration that closes a segment (in samples)
const SILENCE_SAMPLES: usize = 8000; // 0.5 seconds

/// Outcome of feeding one frame to the segmenter
#[derive(Debug, Clone, PartialEq)]
pub enum VadOutcome {
    /// Nothing of interest
    Silence,
    /// The frame carried speech
    Speech,
    /// A segment closed; the samples are ready for transcription
    SegmentComplete(Vec<f32>),
}

/// Accumulates speech frames into utterance segments
#[derive(Debug, Default)]
pub struct SpeechSegmenter {
    buffer: Vec<f32>,
    speaking: bool,
    silence_counter: usize,
}

impl SpeechSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame of samples
    pub fn process(&mut self, samples: &[f32]) -> VadOutcome {
        let energy = calculate_energy(samples);
        let is_speech = energy > ENERGY_THRESHOLD;

        if !self.speaking {
            if !is_speech {
                return VadOutcome::Silence;
            }
            self.speaking = true;
            self.buffer.clear();
            self.buffer.extend_from_slice(samples);
            self.silence_counter = 0;
            tracing::trace!(energy, "speech started");
            return VadOutcome::Speech;
        }

        self.buffer.extend_from_slice(samples);
        if is_speech {
            self.silence_counter = 0;
            return VadOutcome::Speech;
        }
        self.silence_counter += samples.len();

        if self.silence_counter > SILENCE_SAMPLES {
            let segment = std::mem::take(&mut self.buffer);
            let voiced = segment.len().saturating_sub(self.silence_counter);
            self.reset();

            if voiced >= MIN_SPEECH_SAMPLES {
                tracing::debug!(samples = segment.len(), "speech segment complete");
                return VadOutcome::SegmentComplete(segment);
            }
            tracing::trace!(voiced, "segment too short, dropped");
        }

        VadOutcome::Silence
    }

    /// Take whatever speech is buffered, closing the segment early.
    ///
    /// Returns `None` if nothing worth transcribing was captured.
    pub fn flush(&mut self) -> Option<Vec<f32>> {
        let segment = std::mem::take(&mut self.buffer);
        let voiced = segment.len().saturating_sub(self.silence_counter);
        let was_speaking = self.speaking;
        self.reset();

        (was_speaking && voiced >= MIN_SPEECH_SAMPLES).then_some(segment)
    }

    /// Whether a segment is currently open
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    fn reset(&mut self) {
        self.speaking = false;
        self.buffer.clear();
        self.silence_counter = 0;
    }
}

/// Calculate RMS energy of audio samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn calculate_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}
