//! Audio pipeline for the interview session.
//!
//! This module handles microphone capture, sample-rate conversion, PCM wire
//! encoding, gapless playback scheduling and input loudness monitoring.
//! Uses CPAL for device I/O; streams live on dedicated audio threads and
//! exchange samples with the async runtime over channels.

pub mod capture;
pub mod pcm;
pub mod playback;
pub mod resample;
pub mod volume;

pub use capture::MicCapture;
pub use pcm::{decode_pcm16_base64, encode_pcm16_base64, DecodeError};
pub use playback::{AudioSink, CpalSink, PlaybackScheduler};
pub use resample::resample;
pub use volume::VolumeMonitor;

/// Sample rate of audio frames sent to the voice backend.
pub const SEND_SAMPLE_RATE: u32 = 16_000;

/// Sample rate of decoded audio received from the voice backend. The
/// 16 kHz-out / 24 kHz-in asymmetry is a fixed protocol property.
pub const PLAYBACK_SAMPLE_RATE: u32 = 24_000;

/// Errors that can occur in the audio pipeline.
#[derive(Debug, Clone)]
pub enum AudioError {
    NoInputDevice,
    NoOutputDevice,
    NoSupportedConfig,
    StreamCreationFailed(String),
}

impl std::fmt::Display for AudioError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AudioError::NoInputDevice => write!(f, "No audio input device found"),
            AudioError::NoOutputDevice => write!(f, "No audio output device found"),
            AudioError::NoSupportedConfig => write!(f, "No supported audio configuration"),
            AudioError::StreamCreationFailed(e) => {
                write!(f, "Failed to create audio stream: {}", e)
            }
        }
    }
}

impl std::error::Error for AudioError {}
