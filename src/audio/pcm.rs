//! PCM16 wire codec.
//!
//! Float samples are quantized to 16-bit signed integers, packed
//! little-endian and carried as standard base64 over the wire.
//!
//! Quantization uses asymmetric full-scale: 32768 on the negative side,
//! 32767 on the positive side. The voice backend expects exactly this
//! rounding policy; do not replace it with a symmetric scale.

use base64::{engine::general_purpose::STANDARD, Engine};

/// Errors produced while decoding inbound audio payloads.
#[derive(Debug, Clone)]
pub enum DecodeError {
    /// Payload is not valid base64.
    InvalidBase64(String),
    /// Byte length is not a whole number of 16-bit samples.
    TruncatedSample(usize),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidBase64(e) => write!(f, "Invalid base64 audio payload: {}", e),
            DecodeError::TruncatedSample(len) => {
                write!(f, "Audio payload of {} bytes is not whole 16-bit samples", len)
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// Quantize one float sample to PCM16. Always clamps to [-1, 1].
pub fn sample_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Expand one PCM16 sample to float. Trusts the source; never clamps.
pub fn i16_to_sample(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Encode float samples as base64 little-endian PCM16.
pub fn encode_pcm16_base64(samples: &[f32]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        bytes.extend_from_slice(&sample_to_i16(sample).to_le_bytes());
    }
    STANDARD.encode(&bytes)
}

/// Decode base64 little-endian PCM16 into float samples.
pub fn decode_pcm16_base64(payload: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| DecodeError::InvalidBase64(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        return Err(DecodeError::TruncatedSample(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16_to_sample(i16::from_le_bytes([pair[0], pair[1]])))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantization_is_asymmetric() {
        assert_eq!(sample_to_i16(-1.0), -32768);
        assert_eq!(sample_to_i16(1.0), 32767);
        assert_eq!(sample_to_i16(0.0), 0);
    }

    #[test]
    fn encode_clamps_out_of_range() {
        assert_eq!(sample_to_i16(2.0), 32767);
        assert_eq!(sample_to_i16(-2.0), -32768);
    }

    #[test]
    fn decode_never_clamps() {
        // i16::MAX decodes slightly below 1.0 under the /32768 rule.
        assert!((i16_to_sample(i16::MAX) - 32767.0 / 32768.0).abs() < 1e-7);
        assert_eq!(i16_to_sample(i16::MIN), -1.0);
    }

    #[test]
    fn bytes_are_little_endian() {
        let encoded = encode_pcm16_base64(&[i16_to_sample(0x1234)]);
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(bytes, vec![0x34, 0x12]);
    }

    #[test]
    fn round_trip_error_within_one_step() {
        // One quantization step is 1/32768 ~= 3e-5.
        let step = 1.0 / 32768.0;
        for &sample in &[-1.0f32, -0.5, -0.001, 0.0, 0.001, 0.5, 0.999] {
            let decoded = decode_pcm16_base64(&encode_pcm16_base64(&[sample])).unwrap();
            assert!(
                (decoded[0] - sample).abs() <= step,
                "sample {} round-tripped to {}",
                sample,
                decoded[0]
            );
        }
    }

    #[test]
    fn quantized_negative_samples_are_stable() {
        // The negative side divides and multiplies by the same 32768 scale,
        // so already-quantized values survive repeated cycles bit-exact.
        let original = vec![-1.0f32, -0.75, -0.25, 0.0];
        let once = decode_pcm16_base64(&encode_pcm16_base64(&original)).unwrap();
        let twice = decode_pcm16_base64(&encode_pcm16_base64(&once)).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn repeated_cycles_stay_within_one_step_of_first() {
        // Positive quantized values may drift by one LSB per cycle under the
        // asymmetric scale; the drift never exceeds a step per cycle.
        let step = 1.0 / 32768.0;
        let once = decode_pcm16_base64(&encode_pcm16_base64(&[0.25f32, 0.75])).unwrap();
        let twice = decode_pcm16_base64(&encode_pcm16_base64(&once)).unwrap();
        for (a, b) in once.iter().zip(twice.iter()) {
            assert!((a - b).abs() <= step);
        }
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(matches!(
            decode_pcm16_base64("not base64!!"),
            Err(DecodeError::InvalidBase64(_))
        ));
    }

    #[test]
    fn rejects_odd_byte_count() {
        let payload = STANDARD.encode([0u8, 1, 2]);
        assert!(matches!(
            decode_pcm16_base64(&payload),
            Err(DecodeError::TruncatedSample(3))
        ));
    }

    #[test]
    fn empty_payload_is_empty() {
        assert!(decode_pcm16_base64("").unwrap().is_empty());
    }
}
