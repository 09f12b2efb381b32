//! PCM conversion utilities.
//!
//! The voice channel carries **16-bit little-endian mono PCM**, base64-coded
//! on the wire.  This module bridges that format and the `f32` interleaved
//! samples cpal works with:
//!
//! 1. [`downmix_to_mono`] — average any number of interleaved channels.
//! 2. [`resample`] — linear-interpolation rate conversion to the wire rate.
//! 3. [`f32_to_pcm16_bytes`] / [`decode_base64_pcm16`] — sample format and
//!    base64 conversion.

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use thiserror::Error;

// ---------------------------------------------------------------------------
// PcmError
// ---------------------------------------------------------------------------

/// Errors from decoding wire-format audio.
#[derive(Debug, Error)]
pub enum PcmError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// 16-bit PCM must contain an even number of bytes.
    #[error("PCM payload has an odd byte count ({0})")]
    OddByteCount(usize),
}

// ---------------------------------------------------------------------------
// downmix_to_mono
// ---------------------------------------------------------------------------

/// Mix interleaved multi-channel audio down to mono by averaging all
/// channels.  The output length is `samples.len() / channels`.
pub fn downmix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    match channels {
        0 => Vec::new(),
        1 => samples.to_vec(),
        n => {
            let n = n as usize;
            samples
                .chunks_exact(n)
                .map(|frame| frame.iter().sum::<f32>() / n as f32)
                .collect()
        }
    }
}

// ---------------------------------------------------------------------------
// resample
// ---------------------------------------------------------------------------

/// Resample mono `samples` from `source_rate` Hz to `target_rate` Hz using
/// linear interpolation.
///
/// * Equal rates return the input unchanged (no-op fast path).
/// * Empty input returns an empty vector.
///
/// The output length is approximately
/// `samples.len() * target_rate / source_rate`.
pub fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    if source_rate == target_rate {
        return samples.to_vec();
    }

    if samples.is_empty() {
        return Vec::new();
    }

    let ratio = target_rate as f64 / source_rate as f64;
    let output_len = (samples.len() as f64 * ratio).ceil() as usize;
    let mut output = Vec::with_capacity(output_len);

    for i in 0..output_len {
        let src_pos = i as f64 / ratio;
        let idx = src_pos as usize;
        let frac = src_pos - idx as f64;

        let sample = if idx + 1 < samples.len() {
            samples[idx] * (1.0 - frac as f32) + samples[idx + 1] * frac as f32
        } else if idx < samples.len() {
            samples[idx]
        } else {
            0.0
        };

        output.push(sample);
    }

    output
}

// ---------------------------------------------------------------------------
// Sample format conversion
// ---------------------------------------------------------------------------

/// Convert `f32` samples in `[-1.0, 1.0]` to 16-bit little-endian PCM bytes.
/// Out-of-range samples are clamped, not wrapped.
pub fn f32_to_pcm16_bytes(samples: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a base64 payload of 16-bit little-endian PCM into samples.
pub fn decode_base64_pcm16(payload: &str) -> Result<Vec<i16>, PcmError> {
    let bytes = B64.decode(payload)?;
    if bytes.len() % 2 != 0 {
        return Err(PcmError::OddByteCount(bytes.len()));
    }

    Ok(bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // ---- downmix_to_mono ---------------------------------------------------

    #[test]
    fn downmix_already_mono_is_identity() {
        let input = vec![0.1_f32, 0.2, 0.3];
        assert_eq!(downmix_to_mono(&input, 1), input);
    }

    #[test]
    fn downmix_two_channel_averages_frames() {
        let input = vec![1.0_f32, -1.0, 0.5, 0.5];
        let out = downmix_to_mono(&input, 2);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.0).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn downmix_zero_channels_is_empty() {
        assert!(downmix_to_mono(&[1.0_f32, 2.0], 0).is_empty());
    }

    // ---- resample ----------------------------------------------------------

    #[test]
    fn resample_equal_rates_is_noop() {
        let input: Vec<f32> = (0..240).map(|i| i as f32 / 240.0).collect();
        let out = resample(&input, 24_000, 24_000);
        assert_eq!(out, input);
    }

    #[test]
    fn resample_48k_to_24k_halves_length() {
        let input = vec![0.5_f32; 480];
        let out = resample(&input, 48_000, 24_000);
        assert_eq!(out.len(), 240);
    }

    #[test]
    fn resample_constant_signal_preserves_amplitude() {
        let input = vec![0.5_f32; 480];
        for &s in &resample(&input, 48_000, 24_000) {
            assert!((s - 0.5).abs() < 1e-5, "amplitude drift: {s}");
        }
    }

    #[test]
    fn resample_empty_input_is_empty() {
        assert!(resample(&[], 48_000, 24_000).is_empty());
    }

    // ---- f32_to_pcm16_bytes ------------------------------------------------

    #[test]
    fn f32_conversion_is_little_endian() {
        let bytes = f32_to_pcm16_bytes(&[0.0, 1.0]);
        assert_eq!(&bytes[0..2], &0_i16.to_le_bytes());
        assert_eq!(&bytes[2..4], &i16::MAX.to_le_bytes());
    }

    #[test]
    fn f32_conversion_clamps_out_of_range() {
        let bytes = f32_to_pcm16_bytes(&[2.0, -2.0]);
        assert_eq!(&bytes[0..2], &i16::MAX.to_le_bytes());
        assert_eq!(&bytes[2..4], &(-i16::MAX).to_le_bytes());
    }

    // ---- decode_base64_pcm16 -----------------------------------------------

    #[test]
    fn decode_round_trips_known_samples() {
        let samples: Vec<i16> = vec![0, 1, -1, i16::MAX, i16::MIN];
        let mut bytes = Vec::new();
        for s in &samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        let payload = B64.encode(&bytes);
        assert_eq!(decode_base64_pcm16(&payload).unwrap(), samples);
    }

    #[test]
    fn decode_rejects_invalid_base64() {
        assert!(matches!(
            decode_base64_pcm16("!!! not base64 !!!"),
            Err(PcmError::Base64(_))
        ));
    }

    #[test]
    fn decode_rejects_odd_byte_count() {
        let payload = B64.encode([0x01, 0x02, 0x03]);
        assert!(matches!(
            decode_base64_pcm16(&payload),
            Err(PcmError::OddByteCount(3))
        ));
    }
}
