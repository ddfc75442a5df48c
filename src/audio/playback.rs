//! Gapless playback scheduling for decoded backend audio.
//!
//! Chunks arrive at unpredictable times and irregular sizes. The scheduler
//! keeps a single `next_play_time` cursor on the output clock: each chunk is
//! scheduled to start exactly where the previous one ends, and the cursor is
//! re-anchored to the current output time after an underrun so late chunks
//! do not stack up a backlog.
//!
//! The output device is abstracted behind [`AudioSink`] so the scheduling
//! policy is testable without hardware; [`CpalSink`] is the production sink,
//! owning a CPAL output stream on a dedicated audio thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Sample, SampleFormat};

use super::{resample, AudioError, PLAYBACK_SAMPLE_RATE};

/// An audio output timeline chunks can be scheduled onto.
pub trait AudioSink: Send {
    /// Current position of the output clock, in seconds.
    fn now(&self) -> f64;

    /// Schedule mono samples (at [`PLAYBACK_SAMPLE_RATE`]) to start playing
    /// at `start` seconds on the output clock.
    fn play_at(&self, start: f64, samples: Vec<f32>);

    /// Drop all scheduled audio that has not played yet.
    fn clear(&self);
}

/// Schedules decoded chunks for gapless sequential output.
pub struct PlaybackScheduler<S: AudioSink> {
    sink: S,
    /// Next scheduled start time in seconds; the playback clock cursor.
    next_play_time: f64,
}

impl<S: AudioSink> PlaybackScheduler<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            next_play_time: 0.0,
        }
    }

    /// Schedule one decoded chunk of mono samples at the playback rate.
    ///
    /// If the cursor has fallen behind the output clock (underrun), it is
    /// reset to the current output time before scheduling.
    pub fn enqueue(&mut self, samples: Vec<f32>) {
        if samples.is_empty() {
            return;
        }

        let current = self.sink.now();
        if self.next_play_time < current {
            self.next_play_time = current;
        }

        let duration = samples.len() as f64 / PLAYBACK_SAMPLE_RATE as f64;
        self.sink.play_at(self.next_play_time, samples);
        self.next_play_time += duration;
    }

    /// The backend reported the model's output was interrupted by user
    /// speech: reset the cursor and drop any audio that has not started.
    pub fn interrupt(&mut self) {
        self.next_play_time = 0.0;
        self.sink.clear();
    }

    #[cfg(test)]
    pub fn next_play_time(&self) -> f64 {
        self.next_play_time
    }
}

/// One scheduled run of samples on the device timeline.
struct ScheduledChunk {
    start_frame: u64,
    samples: Vec<f32>,
}

/// State shared between the output callback and the sink handle.
struct SinkShared {
    /// Chunks ordered by start frame (scheduling is monotonic).
    queue: VecDeque<ScheduledChunk>,
    /// Frames the device has consumed so far; the output clock.
    frames_elapsed: u64,
}

/// CPAL-backed output sink.
///
/// The stream is not `Send`, so it lives on a dedicated thread for the
/// lifetime of the sink; dropping the sink shuts the thread down.
pub struct CpalSink {
    shared: Arc<Mutex<SinkShared>>,
    device_rate: u32,
    shutdown_tx: Option<std::sync::mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl CpalSink {
    /// Open the default output device.
    pub fn open() -> Result<Self, AudioError> {
        let shared = Arc::new(Mutex::new(SinkShared {
            queue: VecDeque::new(),
            frames_elapsed: 0,
        }));

        let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<u32, AudioError>>();
        let (shutdown_tx, shutdown_rx) = std::sync::mpsc::channel::<()>();

        let thread_shared = shared.clone();
        let thread = std::thread::spawn(move || {
            let stream = match build_output_stream(thread_shared) {
                Ok((stream, rate)) => {
                    let _ = init_tx.send(Ok(rate));
                    stream
                }
                Err(e) => {
                    let _ = init_tx.send(Err(e));
                    return;
                }
            };

            // Keep the stream alive until the sink is dropped.
            let _ = shutdown_rx.recv();
            drop(stream);
        });

        let device_rate = match init_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = thread.join();
                return Err(e);
            }
            Err(_) => {
                return Err(AudioError::StreamCreationFailed(
                    "Audio output thread exited during setup".to_string(),
                ))
            }
        };

        log::info!("Audio output open at {} Hz", device_rate);

        Ok(Self {
            shared,
            device_rate,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSink for CpalSink {
    fn now(&self) -> f64 {
        let shared = self.shared.lock().unwrap();
        shared.frames_elapsed as f64 / self.device_rate as f64
    }

    fn play_at(&self, start: f64, samples: Vec<f32>) {
        // Device rate rarely equals the protocol's 24 kHz.
        let samples = resample(&samples, PLAYBACK_SAMPLE_RATE, self.device_rate);
        let start_frame = (start * self.device_rate as f64).round() as u64;

        let mut shared = self.shared.lock().unwrap();
        shared.queue.push_back(ScheduledChunk {
            start_frame,
            samples,
        });
    }

    fn clear(&self) {
        let mut shared = self.shared.lock().unwrap();
        shared.queue.clear();
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn build_output_stream(
    shared: Arc<Mutex<SinkShared>>,
) -> Result<(cpal::Stream, u32), AudioError> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::NoOutputDevice)?;

    let supported = device
        .default_output_config()
        .map_err(|_| AudioError::NoSupportedConfig)?;

    log::info!(
        "Audio output device: {:?} ({} Hz, {} channels, {:?})",
        device.name(),
        supported.sample_rate().0,
        supported.channels(),
        supported.sample_format()
    );

    let sample_format = supported.sample_format();
    let config: cpal::StreamConfig = supported.into();
    let rate = config.sample_rate.0;

    let stream = match sample_format {
        SampleFormat::I16 => build_output_stream_typed::<i16>(&device, &config, shared)?,
        SampleFormat::U16 => build_output_stream_typed::<u16>(&device, &config, shared)?,
        SampleFormat::F32 => build_output_stream_typed::<f32>(&device, &config, shared)?,
        _ => return Err(AudioError::NoSupportedConfig),
    };

    stream
        .play()
        .map_err(|e| AudioError::StreamCreationFailed(format!("Failed to start stream: {}", e)))?;

    Ok((stream, rate))
}

fn build_output_stream_typed<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<Mutex<SinkShared>>,
) -> Result<cpal::Stream, AudioError>
where
    T: cpal::SizedSample + cpal::FromSample<f32>,
{
    let channels = config.channels as usize;
    let err_fn = |err| log::error!("Audio output stream error: {}", err);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut s = shared.lock().unwrap();
                let frames = data.len() / channels;

                for i in 0..frames {
                    let frame = s.frames_elapsed + i as u64;

                    // Retire chunks that finished before this frame.
                    while let Some(front) = s.queue.front() {
                        if front.start_frame + front.samples.len() as u64 <= frame {
                            s.queue.pop_front();
                        } else {
                            break;
                        }
                    }

                    let mut value = 0.0f32;
                    for chunk in s.queue.iter() {
                        if frame < chunk.start_frame {
                            break;
                        }
                        if let Some(&v) = chunk.samples.get((frame - chunk.start_frame) as usize) {
                            value += v;
                        }
                    }

                    let sample = T::from_sample(value.clamp(-1.0, 1.0));
                    for ch in 0..channels {
                        data[i * channels + ch] = sample;
                    }
                }

                s.frames_elapsed += frames as u64;
            },
            err_fn,
            None,
        )
        .map_err(|e| AudioError::StreamCreationFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records scheduled chunks against a manually advanced clock.
    struct FakeSink {
        now: Mutex<f64>,
        scheduled: Mutex<Vec<(f64, usize)>>,
        cleared: Mutex<bool>,
    }

    impl FakeSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(0.0),
                scheduled: Mutex::new(Vec::new()),
                cleared: Mutex::new(false),
            })
        }

        fn advance_to(&self, t: f64) {
            *self.now.lock().unwrap() = t;
        }

        fn starts(&self) -> Vec<f64> {
            self.scheduled.lock().unwrap().iter().map(|&(s, _)| s).collect()
        }
    }

    impl AudioSink for Arc<FakeSink> {
        fn now(&self) -> f64 {
            *self.now.lock().unwrap()
        }

        fn play_at(&self, start: f64, samples: Vec<f32>) {
            self.scheduled.lock().unwrap().push((start, samples.len()));
        }

        fn clear(&self) {
            *self.cleared.lock().unwrap() = true;
        }
    }

    /// A chunk of `ms` milliseconds at the playback rate.
    fn chunk(ms: u64) -> Vec<f32> {
        vec![0.0; (PLAYBACK_SAMPLE_RATE as u64 * ms / 1000) as usize]
    }

    #[test]
    fn chunks_schedule_back_to_back() {
        let sink = FakeSink::new();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        sink.advance_to(1.0);

        scheduler.enqueue(chunk(100));
        scheduler.enqueue(chunk(250));

        let starts = sink.starts();
        assert_eq!(starts.len(), 2);
        assert!((starts[0] - 1.0).abs() < 1e-9);
        assert!((starts[1] - 1.1).abs() < 1e-9);
        assert!((scheduler.next_play_time() - 1.35).abs() < 1e-9);
    }

    #[test]
    fn underrun_resets_to_current_time() {
        let sink = FakeSink::new();
        let mut scheduler = PlaybackScheduler::new(sink.clone());

        scheduler.enqueue(chunk(100));
        // Output clock runs past the buffered audio.
        sink.advance_to(5.0);
        scheduler.enqueue(chunk(100));

        let starts = sink.starts();
        assert!((starts[1] - 5.0).abs() < 1e-9, "no backlog stacking");
        assert!((scheduler.next_play_time() - 5.1).abs() < 1e-9);
    }

    #[test]
    fn interrupt_resets_cursor_and_clears_pending() {
        let sink = FakeSink::new();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        sink.advance_to(2.0);
        scheduler.enqueue(chunk(500));

        scheduler.interrupt();
        assert_eq!(scheduler.next_play_time(), 0.0);
        assert!(*sink.cleared.lock().unwrap());

        // Next chunk re-anchors to the output clock, not to the stale cursor.
        scheduler.enqueue(chunk(100));
        let starts = sink.starts();
        assert!((starts[1] - 2.0).abs() < 1e-9);
    }

    #[test]
    fn empty_chunk_is_ignored() {
        let sink = FakeSink::new();
        let mut scheduler = PlaybackScheduler::new(sink.clone());
        scheduler.enqueue(Vec::new());
        assert!(sink.starts().is_empty());
        assert_eq!(scheduler.next_play_time(), 0.0);
    }

    #[test]
    #[ignore] // Requires an audio output device
    fn cpal_sink_opens_and_advances() {
        let sink = CpalSink::open().expect("output device");
        let t0 = sink.now();
        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(sink.now() > t0);
    }
}
