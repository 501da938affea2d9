//! Audio output to speakers

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use tokio_util::sync::CancellationToken;

use super::decode::{AudioClip, resample_linear};
use crate::error::PlaybackError;
use crate::{Error, Result};

/// Rate used for the silent unlock probe
const PROBE_SAMPLE_RATE: u32 = 24000;

/// Where decoded clips are played
///
/// Implementations must return promptly once `cancel` fires; partially played
/// audio is cut off.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Prepare the output for playback.
    ///
    /// Returns `PlaybackError::AutoplayBlocked` if the output refuses to start
    /// without a user gesture.
    async fn unlock(&self) -> std::result::Result<(), PlaybackError>;

    /// Play one clip to completion or until `cancel` fires
    async fn play(
        &self,
        clip: &AudioClip,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), PlaybackError>;
}

/// Plays audio to the default output device
pub struct CpalSink {
    volume: f32,
}

impl CpalSink {
    /// Check that an output device exists and create the sink
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available
    pub fn new(volume: f32) -> Result<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            volume,
            "audio output initialized"
        );

        Ok(Self {
            volume: volume.clamp(0.0, 1.0),
        })
    }
}

#[async_trait]
impl AudioSink for CpalSink {
    async fn unlock(&self) -> std::result::Result<(), PlaybackError> {
        // 10ms of silence opens the stream once
        let probe = AudioClip {
            samples: vec![0.0; (PROBE_SAMPLE_RATE / 100) as usize],
            sample_rate: PROBE_SAMPLE_RATE,
        };
        self.play(&probe, &CancellationToken::new()).await
    }

    async fn play(
        &self,
        clip: &AudioClip,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), PlaybackError> {
        let samples = clip.samples.clone();
        let sample_rate = clip.sample_rate;
        let volume = self.volume;
        let cancel = cancel.clone();

        tokio::task::spawn_blocking(move || play_blocking(samples, sample_rate, volume, &cancel))
            .await
            .map_err(|e| PlaybackError::Output(e.to_string()))?
    }
}

/// Pick an output config at the clip's rate, resampling if the device can't
fn output_config(
    device: &cpal::Device,
    samples: Vec<f32>,
    sample_rate: u32,
) -> std::result::Result<(StreamConfig, Vec<f32>), PlaybackError> {
    let rate = SampleRate(sample_rate);
    let exact = device
        .supported_output_configs()
        .map_err(|e| PlaybackError::Output(e.to_string()))?
        .filter(|c| c.channels() <= 2)
        .find(|c| c.min_sample_rate() <= rate && c.max_sample_rate() >= rate);

    if let Some(supported) = exact {
        return Ok((supported.with_sample_rate(rate).config(), samples));
    }

    let fallback = device
        .default_output_config()
        .map_err(|e| PlaybackError::Output(e.to_string()))?
        .config();
    let resampled = resample_linear(&samples, sample_rate, fallback.sample_rate.0);
    tracing::debug!(
        from = sample_rate,
        to = fallback.sample_rate.0,
        "resampling clip for output device"
    );
    Ok((fallback, resampled))
}

fn play_blocking(
    samples: Vec<f32>,
    sample_rate: u32,
    volume: f32,
    cancel: &CancellationToken,
) -> std::result::Result<(), PlaybackError> {
    if samples.is_empty() || cancel.is_cancelled() {
        return Ok(());
    }

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| PlaybackError::Output("no output device".to_string()))?;

    let (config, samples) = output_config(&device, samples, sample_rate)?;
    let channels = usize::from(config.channels);
    let output_rate = config.sample_rate.0;
    let sample_count = samples.len();

    let samples = Arc::new(samples);
    let position = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicBool::new(false));

    let stream = {
        let samples = Arc::clone(&samples);
        let position = Arc::clone(&position);
        let finished = Arc::clone(&finished);

        device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    let mut pos = position.load(Ordering::Relaxed);
                    for frame in data.chunks_mut(channels) {
                        let sample = if let Some(s) = samples.get(pos) {
                            pos += 1;
                            s * volume
                        } else {
                            finished.store(true, Ordering::Relaxed);
                            0.0
                        };
                        frame.fill(sample);
                    }
                    position.store(pos, Ordering::Relaxed);
                },
                |err| {
                    tracing::error!(error = %err, "audio playback error");
                },
                None,
            )
            .map_err(|e| PlaybackError::Output(e.to_string()))?
    };

    stream
        .play()
        .map_err(|e| PlaybackError::Output(e.to_string()))?;

    let duration_ms = (sample_count as u64 * 1000) / u64::from(output_rate.max(1));
    let deadline = Instant::now() + Duration::from_millis(duration_ms + 500);

    while !finished.load(Ordering::Relaxed) {
        if cancel.is_cancelled() {
            drop(stream);
            tracing::debug!("playback interrupted");
            return Ok(());
        }
        if Instant::now() > deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    // Let the device drain its last buffer
    std::thread::sleep(Duration::from_millis(100));

    drop(stream);
    tracing::debug!(samples = sample_count, "playback complete");

    Ok(())
}
