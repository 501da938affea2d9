//! Audio capture from microphone
//!
//! cpal streams are not `Send`, so the stream lives on a dedicated thread that
//! forwards fixed-interval frames to async code over a channel.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::SampleRate;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::decode::{downmix, resample_linear};
use crate::error::RecognitionError;

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// How often buffered samples are forwarded
const FRAME_INTERVAL: Duration = Duration::from_millis(100);

/// Check that a default input device exists and can be queried
///
/// # Errors
///
/// Returns `MicrophoneUnavailable` if there is no usable input device
pub fn probe_input_device() -> Result<(), RecognitionError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecognitionError::MicrophoneUnavailable("no input device".to_string()))?;
    device
        .default_input_config()
        .map_err(|e| RecognitionError::MicrophoneUnavailable(e.to_string()))?;
    Ok(())
}

/// A running microphone capture
///
/// Frames of mono 16kHz samples arrive on the channel passed to
/// [`MicrophoneCapture::start`]. Dropping the capture stops the stream.
pub struct MicrophoneCapture {
    stop: CancellationToken,
    thread: Option<JoinHandle<()>>,
}

impl MicrophoneCapture {
    /// Open the default input device and start forwarding frames
    ///
    /// # Errors
    ///
    /// Returns `MicrophoneUnavailable` if the device or stream cannot be opened
    pub fn start(frames: mpsc::Sender<Vec<f32>>) -> Result<Self, RecognitionError> {
        let stop = CancellationToken::new();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();

        let thread = {
            let stop = stop.clone();
            std::thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || capture_thread(&frames, &stop, &ready_tx))
                .map_err(|e| RecognitionError::MicrophoneUnavailable(e.to_string()))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                stop,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => Err(RecognitionError::MicrophoneUnavailable(
                "capture thread exited".to_string(),
            )),
        }
    }

    /// Stop the stream. The capture thread exits within one frame interval.
    pub fn stop(&mut self) {
        self.stop.cancel();
        // Joined only if already finished; never block an async caller
        if self.thread.as_ref().is_some_and(JoinHandle::is_finished)
            && let Some(thread) = self.thread.take()
        {
            let _ = thread.join();
        }
    }
}

impl Drop for MicrophoneCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    frames: &mpsc::Sender<Vec<f32>>,
    stop: &CancellationToken,
    ready: &std::sync::mpsc::Sender<Result<(), RecognitionError>>,
) {
    let buffer = Arc::new(Mutex::new(Vec::new()));

    let stream = match open_stream(Arc::clone(&buffer)) {
        Ok(stream) => stream,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready.send(Err(RecognitionError::MicrophoneUnavailable(e.to_string())));
        return;
    }

    let _ = ready.send(Ok(()));
    tracing::debug!("audio capture started");

    while !stop.is_cancelled() {
        std::thread::sleep(FRAME_INTERVAL);

        let frame = buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default();

        if frame.is_empty() {
            continue;
        }
        if frames.blocking_send(frame).is_err() {
            break;
        }
    }

    drop(stream);
    tracing::debug!("audio capture stopped");
}

/// Build an input stream that appends mono 16kHz samples to `buffer`
fn open_stream(buffer: Arc<Mutex<Vec<f32>>>) -> Result<cpal::Stream, RecognitionError> {
    let unavailable = |e: &dyn std::fmt::Display| RecognitionError::MicrophoneUnavailable(e.to_string());

    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| RecognitionError::MicrophoneUnavailable("no input device".to_string()))?;

    let native = device
        .supported_input_configs()
        .map_err(|e| unavailable(&e))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    let config = match native {
        Some(supported) => supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config(),
        None => device.default_input_config().map_err(|e| unavailable(&e))?.config(),
    };

    let channels = usize::from(config.channels);
    let device_rate = config.sample_rate.0;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = device_rate,
        channels,
        "audio capture initialized"
    );

    device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix(data, channels);
                let samples = resample_linear(&mono, device_rate, SAMPLE_RATE);
                if let Ok(mut buf) = buffer.lock() {
                    buf.extend_from_slice(&samples);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| unavailable(&e))
}
