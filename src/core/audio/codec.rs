//! PCM16 and base64 conversions for tutor audio.
//!
//! Captured audio arrives as 32-bit float samples in `[-1.0, 1.0]`. The realtime
//! protocol carries 16-bit signed little-endian PCM, base64 encoded inside JSON
//! text frames. Scaling is asymmetric (0x7FFF for positive samples, 0x8000 for
//! negative ones) in both directions so that a round trip stays within one
//! quantization step.

use base64::prelude::*;

/// Scale applied to non-negative samples.
const POSITIVE_SCALE: f32 = 0x7FFF as f32;

/// Scale applied to negative samples.
const NEGATIVE_SCALE: f32 = 0x8000 as f32;

/// Encode float samples as 16-bit little-endian PCM.
///
/// Samples outside `[-1.0, 1.0]` are clamped. NaN is treated as silence.
pub fn encode_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        let s = if sample.is_nan() {
            0.0
        } else {
            sample.clamp(-1.0, 1.0)
        };
        let value = if s < 0.0 {
            (s * NEGATIVE_SCALE) as i16
        } else {
            (s * POSITIVE_SCALE) as i16
        };
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

/// Decode 16-bit little-endian PCM into float samples.
///
/// A trailing odd byte is ignored.
pub fn decode_pcm16(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            if value < 0 {
                value as f32 / NEGATIVE_SCALE
            } else {
                value as f32 / POSITIVE_SCALE
            }
        })
        .collect()
}

/// Encode binary audio for a text-only transport.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}

/// Decode base64 transport text back into bytes.
pub fn from_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64_STANDARD.decode(text)
}
