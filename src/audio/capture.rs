//! Microphone capture.
//!
//! Captures from the default input device, mixes down to mono, and forwards
//! fixed-size float frames into the async runtime over a bounded channel.
//! A second optional tap mirrors raw samples to the volume monitor,
//! independent of the send path.
//!
//! CPAL streams are not `Send`, so the stream lives on a dedicated thread
//! for the lifetime of the capture; `stop()` (or drop) shuts it down.
//! Echo cancellation, gain control and noise suppression are left to the OS
//! input pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};
use tokio::sync::mpsc;

use super::volume::VolumeSender;
use super::AudioError;

/// Samples per forwarded frame (mono, device rate). Balances latency
/// against per-frame overhead.
pub const CAPTURE_FRAME_SIZE: usize = 4096;

/// Sender type for captured mono frames.
pub type FrameSender = mpsc::Sender<Vec<f32>>;

/// Handle to a running microphone capture.
pub struct MicCapture {
    running: Arc<AtomicBool>,
    shutdown_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
    sample_rate: u32,
}

impl MicCapture {
    /// Open the default input device and start forwarding frames.
    ///
    /// Frames of [`CAPTURE_FRAME_SIZE`] mono samples at the device rate go
    /// to `frames_tx`; raw mono samples are mirrored to `volume_tx` when
    /// present. Frames are dropped (with a log) if a receiver lags.
    pub fn start(
        frames_tx: FrameSender,
        volume_tx: Option<VolumeSender>,
    ) -> Result<Self, AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<u32, AudioError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_running = running.clone();
        let thread = std::thread::spawn(move || {
            let stream = match build_input_stream(frames_tx, volume_tx, thread_running) {
                Ok((stream, rate)) => {
                    let _ = init_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            let _ = shutdown_rx.recv();
            drop(stream);
        });

        let sample_rate = match init_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::StreamCreationFailed(
                    "Audio capture thread exited during setup".to_string(),
                ))
            }
        };

        log::info!("Microphone capture started at {} Hz", sample_rate);

        Ok(Self {
            running,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
            sample_rate,
        })
    }

    /// Native sample rate of the capture device.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Stop capturing and join the audio thread. Safe to call twice.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            log::info!("Microphone capture stopped");
        }
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_input_stream(
    frames_tx: FrameSender,
    volume_tx: Option<VolumeSender>,
    running: Arc<AtomicBool>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or(AudioError::NoInputDevice)?;

    let supported = device
        .default_input_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Audio input device: {:?} ({} Hz, {} channels, {:?})",
        device.name(),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::I16 => {
            build_input_stream_typed::<i16>(&device, &config, frames_tx, volume_tx, running)?
        }
        SampleFormat::U16 => {
            build_input_stream_typed::<u16>(&device, &config, frames_tx, volume_tx, running)?
        }
        SampleFormat::F32 => {
            build_input_stream_typed::<f32>(&device, &config, frames_tx, volume_tx, running)?
        }
        _ => return Err(AudioError::NoSupportedConfig),
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, rate))
}

fn build_input_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    frames_tx: FrameSender,
    volume_tx: Option<VolumeSender>,
    running: Arc<AtomicBool>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::Sample,
    f32: cpal::FromSample<T>,
{
    let channels = config.channels as usize;
    let err_fn = |err| log::error!("Audio input stream error: {}", err);

    let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_FRAME_SIZE);

    let stream = device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                if !running.load(Ordering::SeqCst) {
                    return;
                }

                let mono = mixdown(data, channels);

                if let Some(tx) = &volume_tx {
                    if tx.try_send(mono.clone()).is_err() {
                        log::debug!("Volume tap lagging, dropping samples");
                    }
                }

                pending.extend_from_slice(&mono);
                while pending.len() >= CAPTURE_FRAME_SIZE {
                    let frame: Vec<f32> = pending.drain(..CAPTURE_FRAME_SIZE).collect();
                    if frames_tx.try_send(frame).is_err() {
                        log::warn!("Capture frame receiver lagging, dropping frame");
                    }
                }
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))?;

    Ok(stream)
}

/// Average interleaved channels down to mono f32.
fn mixdown<T>(data: &[T], channels: usize) -> Vec<f32>
where
    T: cpal::Sample,
    f32: cpal::FromSample<T>,
{
    if channels <= 1 {
        return data.iter().map(|&s| f32::from_sample(s)).collect();
    }

    data.chunks_exact(channels)
        .map(|frame| {
            let sum: f32 = frame.iter().map(|&s| f32::from_sample(s)).sum();
            sum / channels as f32
        })
        .collect()
}
