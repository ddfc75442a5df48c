//! Sample-rate conversion by block averaging.
//!
//! Each output sample is the mean of the input window that maps onto it via
//! the rate ratio. No interpolation or filtering: this is box-car decimation,
//! adequate for speech at the cost of mild aliasing above half the target
//! rate.

/// Resample `input` from `from_hz` to `to_hz`.
///
/// Output length is `round(len · to/from)`. Windows that map to no input
/// samples produce 0.0. Identical rates return the input unchanged.
pub fn resample(input: &[f32], from_hz: u32, to_hz: u32) -> Vec<f32> {
    if from_hz == to_hz || from_hz == 0 || to_hz == 0 {
        return input.to_vec();
    }

    let ratio = from_hz as f64 / to_hz as f64;
    let out_len = (input.len() as f64 / ratio).round() as usize;
    let mut output = Vec::with_capacity(out_len);

    let mut window_start = 0usize;
    for out_idx in 0..out_len {
        let window_end = (((out_idx + 1) as f64) * ratio).round() as usize;
        let window_end = window_end.min(input.len());

        if window_end > window_start {
            let sum: f64 = input[window_start..window_end]
                .iter()
                .map(|&s| s as f64)
                .sum();
            output.push((sum / (window_end - window_start) as f64) as f32);
        } else {
            output.push(0.0);
        }

        window_start = window_end;
    }

    output
}
