//! Audio decoding and encoding
//!
//! Synthesis backends answer with WAV or MP3. Both are decoded to mono `f32`
//! samples; WAV encoding is used to upload microphone segments to STT.

use std::io::Cursor;

use crate::error::PlaybackError;
use crate::{Error, Result};

/// Decoded mono audio ready for output
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    /// Mono samples in `[-1.0, 1.0]`
    pub samples: Vec<f32>,
    /// Sample rate in Hz
    pub sample_rate: u32,
}

impl AudioClip {
    /// Playback duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> std::time::Duration {
        if self.sample_rate == 0 {
            return std::time::Duration::ZERO;
        }
        std::time::Duration::from_secs_f64(self.samples.len() as f64 / f64::from(self.sample_rate))
    }
}

/// Decode WAV or MP3 bytes, sniffing the container from the header
///
/// # Errors
///
/// Returns `PlaybackError::Decode` if the bytes are not playable audio
pub fn decode_audio(bytes: &[u8]) -> std::result::Result<AudioClip, PlaybackError> {
    if bytes.is_empty() {
        return Err(PlaybackError::Decode("empty audio payload".to_string()));
    }

    let is_wav = bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WAVE";
    if is_wav { decode_wav(bytes) } else { decode_mp3(bytes) }
}

/// Decode RIFF/WAV bytes, averaging channels to mono
fn decode_wav(bytes: &[u8]) -> std::result::Result<AudioClip, PlaybackError> {
    let mut reader =
        hound::WavReader::new(Cursor::new(bytes)).map_err(|e| PlaybackError::Decode(e.to_string()))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| PlaybackError::Decode(e.to_string()))?,
        hound::SampleFormat::Int => {
            #[allow(clippy::cast_precision_loss)]
            let scale = (1_i64 << (spec.bits_per_sample.clamp(1, 32) - 1)) as f32;
            #[allow(clippy::cast_precision_loss)]
            let samples = reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| PlaybackError::Decode(e.to_string()))?;
            samples
        }
    };

    Ok(AudioClip {
        samples: downmix(&interleaved, channels),
        sample_rate: spec.sample_rate,
    })
}

/// Decode MP3 bytes, averaging stereo to mono
fn decode_mp3(mp3_data: &[u8]) -> std::result::Result<AudioClip, PlaybackError> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = 0;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                sample_rate = u32::try_from(frame.sample_rate).unwrap_or(0);
                let pcm: Vec<f32> = frame.data.iter().map(|&s| f32::from(s) / 32768.0).collect();
                samples.extend(downmix(&pcm, frame.channels.max(1)));
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(PlaybackError::Decode(format!("MP3 decode error: {e}"))),
        }
    }

    if samples.is_empty() || sample_rate == 0 {
        return Err(PlaybackError::Decode("no audio frames found".to_string()));
    }

    Ok(AudioClip { samples, sample_rate })
}

/// Average interleaved frames down to one channel
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resampler, good enough for speech
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }

    let ratio = f64::from(from_rate) / f64::from(to_rate);
    let out_len = ((samples.len() as f64) / ratio).round() as usize;
    let last = samples.len() - 1;

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * ratio;
            let idx = (pos.floor() as usize).min(last);
            let next = (idx + 1).min(last);
            let frac = (pos - pos.floor()) as f32;
            samples[idx].mul_add(1.0 - frac, samples[next] * frac)
        })
        .collect()
}

/// Convert f32 samples to 16-bit mono WAV bytes
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
