//! μ-law companding codec for the 8 kHz telephony leg.
//!
//! Maps 16-bit linear samples to one logarithmically companded byte
//! each (sign bit, 3-bit exponent, 4-bit mantissa) and back. Decoding
//! reverses encoding exactly within one quantization step.

/// Bias added before the exponent search (ITU-T G.711).
const BIAS: i32 = 0x84;
/// Largest magnitude representable after biasing.
const CLIP: i32 = 32_635;

/// Encode one linear sample to a companded byte.
pub fn encode_sample(sample: i16) -> u8 {
    let mut magnitude = i32::from(sample);
    let sign: u8 = if magnitude < 0 {
        magnitude = -magnitude;
        0x80
    } else {
        0
    };
    if magnitude > CLIP {
        magnitude = CLIP;
    }
    magnitude += BIAS;

    let mut exponent: u32 = 7;
    let mut mask = 0x4000;
    while magnitude & mask == 0 && exponent > 0 {
        exponent -= 1;
        mask >>= 1;
    }

    let mantissa = ((magnitude >> (exponent + 3)) & 0x0f) as u8;
    !(sign | ((exponent as u8) << 4) | mantissa)
}

/// Decode one companded byte back to a linear sample.
pub fn decode_sample(byte: u8) -> i16 {
    let byte = !byte;
    let sign = byte & 0x80;
    let exponent = u32::from((byte >> 4) & 0x07);
    let mantissa = i32::from(byte & 0x0f);

    let magnitude = (((mantissa << 3) + BIAS) << exponent) - BIAS;
    if sign != 0 {
        -(magnitude as i16)
    } else {
        magnitude as i16
    }
}

/// Encode a slice of linear samples.
pub fn encode(samples: &[i16]) -> Vec<u8> {
    samples.iter().map(|&s| encode_sample(s)).collect()
}

/// Decode a companded byte stream to linear samples.
pub fn decode(bytes: &[u8]) -> Vec<i16> {
    bytes.iter().map(|&b| decode_sample(b)).collect()
}

/// Companded silence of the given duration, one byte per sample.
///
/// Used as the pre-roll "thinking pause" before a synthesized reply.
pub fn silence(duration_ms: u64, sample_rate: u32) -> Vec<u8> {
    let len = (u64::from(sample_rate) * duration_ms / 1000) as usize;
    vec![encode_sample(0); len]
}
