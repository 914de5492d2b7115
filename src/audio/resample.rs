//! Anti-aliased sample-rate conversion for synthesized audio.
//!
//! The speech synthesizer produces 16-bit linear PCM at its native rate
//! (24 kHz); the telephony leg wants 8 kHz. Decimating without a
//! low-pass filter folds high-frequency content into audible noise, so
//! each output sample is taken through a short symmetric FIR kernel
//! centred on its corresponding input position.

use crate::audio::codec;

/// 6-tap windowed low-pass kernel for 3:1 decimation. Cutoff sits
/// around 3.5 kHz, below the 4 kHz Nyquist limit of the telephony rate.
const FILTER_TAPS: [f32; 6] = [0.05, 0.15, 0.30, 0.30, 0.15, 0.05];

/// Downsample linear PCM by an integer ratio with anti-aliasing.
///
/// `from_rate` must be an integer multiple of `to_rate`; equal rates
/// return the input unchanged. At buffer edges the kernel is
/// normalised by the sum of the taps actually in range.
pub fn downsample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    debug_assert!(to_rate > 0 && from_rate % to_rate == 0);
    if from_rate == to_rate {
        return samples.to_vec();
    }

    let ratio = (from_rate / to_rate) as usize;
    let out_len = samples.len() / ratio;
    let half = FILTER_TAPS.len() / 2;
    let mut out = Vec::with_capacity(out_len);

    for i in 0..out_len {
        let center = i * ratio;
        let mut sum = 0.0f32;
        let mut weight = 0.0f32;

        for (j, &tap) in FILTER_TAPS.iter().enumerate() {
            let src = center as isize - half as isize + j as isize;
            if src >= 0 && (src as usize) < samples.len() {
                sum += f32::from(samples[src as usize]) * tap;
                weight += tap;
            }
        }

        let filtered = (sum / weight).round() as i32;
        out.push(filtered.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16);
    }

    out
}

/// Convert little-endian 16-bit PCM at `from_rate` to companded bytes
/// at 8 kHz: anti-aliased decimation followed by μ-law encoding.
///
/// A trailing odd byte is ignored.
pub fn pcm16le_to_mulaw_8k(pcm: &[u8], from_rate: u32) -> Vec<u8> {
    let samples: Vec<i16> = pcm
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    codec::encode(&downsample(&samples, from_rate, 8_000))
}
