//! Input loudness monitoring for UI feedback.
//!
//! Samples a frequency-domain snapshot of the live input every 50 ms: the
//! most recent window of captured samples is transformed with a radix-2 FFT,
//! bin magnitudes are normalized by the full-scale bin magnitude, and their
//! mean is published as a scalar in [0, 1]. Purely observational; the send
//! path and transcript are unaffected.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;

/// Analysis window; 128 frequency bins.
const FFT_SIZE: usize = 256;

/// Sampling cadence.
const SAMPLE_INTERVAL_MS: u64 = 50;

/// Sender type for raw input samples tapped off the capture callback.
pub type VolumeSender = mpsc::Sender<Vec<f32>>;

/// Receiver half of the volume tap.
pub type VolumeReceiver = mpsc::Receiver<Vec<f32>>;

/// Create the channel that carries raw samples into the monitor task.
pub fn volume_channel() -> (VolumeSender, VolumeReceiver) {
    mpsc::channel(100)
}

/// Shared readout of the latest loudness value.
///
/// The monitor task writes, the UI reads; stored as f32 bits in an atomic
/// so reads never block the audio path.
#[derive(Debug, Clone, Default)]
pub struct VolumeMonitor {
    level: Arc<AtomicU32>,
}

impl VolumeMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest normalized loudness in [0, 1].
    pub fn level(&self) -> f32 {
        f32::from_bits(self.level.load(Ordering::Relaxed))
    }

    fn store(&self, value: f32) {
        self.level.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Run the monitor until cancelled.
///
/// Every 50 ms, drains the tap channel into a rolling window and publishes
/// the spectral mean of the most recent [`FFT_SIZE`] samples. Publishes 0.0
/// on exit so a stopped session never shows residual level.
pub async fn run_volume_monitor(
    mut rx: VolumeReceiver,
    monitor: VolumeMonitor,
    cancel: CancellationToken,
) {
    let mut window = vec![0.0f32; FFT_SIZE];
    let mut filled = false;
    let mut tick = interval(Duration::from_millis(SAMPLE_INTERVAL_MS));

    log::debug!("Volume monitor started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {
                while let Ok(samples) = rx.try_recv() {
                    push_window(&mut window, &samples);
                    filled = true;
                }
                if filled {
                    monitor.store(spectral_level(&window));
                }
            }
        }
    }

    monitor.store(0.0);
    log::debug!("Volume monitor stopped");
}

/// Keep the last `FFT_SIZE` samples in `window`.
fn push_window(window: &mut [f32], samples: &[f32]) {
    let n = window.len();
    if samples.len() >= n {
        window.copy_from_slice(&samples[samples.len() - n..]);
        return;
    }
    window.copy_within(samples.len().., 0);
    window[n - samples.len()..].copy_from_slice(samples);
}

/// Mean bin magnitude of the window, normalized to [0, 1].
///
/// A full-scale sinusoid concentrates a magnitude of N/2 in one bin, so N/2
/// is the per-bin normalization; bins are clamped before averaging.
fn spectral_level(window: &[f32]) -> f32 {
    let magnitudes = fft_magnitudes(window);
    let full_scale = window.len() as f32 / 2.0;

    let sum: f32 = magnitudes
        .iter()
        .map(|&m| (m / full_scale).clamp(0.0, 1.0))
        .sum();
    sum / magnitudes.len() as f32
}

/// In-place iterative radix-2 FFT; returns magnitudes of the first N/2 bins.
///
/// Input length must be a power of two.
fn fft_magnitudes(input: &[f32]) -> Vec<f32> {
    let n = input.len();
    debug_assert!(n.is_power_of_two());

    let mut re: Vec<f32> = input.to_vec();
    let mut im = vec![0.0f32; n];

    // Bit-reversal permutation.
    let mut j = 0usize;
    for i in 1..n {
        let mut bit = n >> 1;
        while j & bit != 0 {
            j ^= bit;
            bit >>= 1;
        }
        j |= bit;
        if i < j {
            re.swap(i, j);
            im.swap(i, j);
        }
    }

    let mut len = 2;
    while len <= n {
        let angle = -2.0 * PI / len as f32;
        let (w_re, w_im) = (angle.cos(), angle.sin());

        let mut start = 0;
        while start < n {
            let mut cur_re = 1.0f32;
            let mut cur_im = 0.0f32;
            for k in 0..len / 2 {
                let a = start + k;
                let b = start + k + len / 2;
                let v_re = re[b] * cur_re - im[b] * cur_im;
                let v_im = re[b] * cur_im + im[b] * cur_re;
                re[b] = re[a] - v_re;
                im[b] = im[a] - v_im;
                re[a] += v_re;
                im[a] += v_im;

                let next_re = cur_re * w_re - cur_im * w_im;
                cur_im = cur_re * w_im + cur_im * w_re;
                cur_re = next_re;
            }
            start += len;
        }
        len <<= 1;
    }

    (0..n / 2)
        .map(|k| (re[k] * re[k] + im[k] * im[k]).sqrt())
        .collect()
}
