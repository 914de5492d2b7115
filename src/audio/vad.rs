//! Voice activity detection using energy-based analysis.
//!
//! Classifies each inbound companded chunk as speech or silence from
//! the RMS energy of the decoded linear samples. While the agent is
//! speaking, the threshold is raised so ordinary background noise
//! cannot trigger a false interruption.

use crate::audio::codec;
use crate::config::VadConfig;

/// RMS energy of a companded chunk, in 16-bit sample units.
///
/// Deterministic for identical input; zero for an empty chunk.
pub fn rms_energy(chunk: &[u8]) -> f32 {
    if chunk.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = chunk
        .iter()
        .map(|&b| {
            let s = f64::from(codec::decode_sample(b));
            s * s
        })
        .sum();
    (sum_sq / chunk.len() as f64).sqrt() as f32
}

/// Energy-threshold classifier for inbound audio chunks.
#[derive(Debug, Clone)]
pub struct VoiceActivityDetector {
    energy_threshold: f32,
    barge_in_threshold: f32,
}

impl VoiceActivityDetector {
    /// Create a detector from the configured thresholds.
    pub fn new(config: &VadConfig) -> Self {
        Self {
            energy_threshold: config.energy_threshold,
            barge_in_threshold: config.energy_threshold * config.barge_in_multiplier,
        }
    }

    /// Whether the given energy counts as caller speech.
    pub fn is_speech(&self, energy: f32) -> bool {
        energy > self.energy_threshold
    }

    /// Whether the given energy counts as barge-in while the agent is
    /// speaking. The raised bar only passes a clearly louder utterance.
    pub fn is_barge_in(&self, energy: f32) -> bool {
        energy > self.barge_in_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loud_chunk(amplitude: i16, len: usize) -> Vec<u8> {
        codec::encode(&vec![amplitude; len])
    }

    #[test]
    fn silence_has_zero_energy() {
        let chunk = codec::silence(20, 8_000);
        assert_eq!(rms_energy(&chunk), 0.0);
        assert_eq!(rms_energy(&[]), 0.0);
    }

    #[test]
    fn constant_tone_energy_matches_amplitude() {
        let energy = rms_energy(&loud_chunk(1_000, 160));
        // Within one quantization step of the companding codec.
        assert!((energy - 1_000.0).abs() < 40.0, "energy {energy}");
    }

    #[test]
    fn classification_uses_strict_threshold() {
        let vad = VoiceActivityDetector::new(&VadConfig::default());
        assert!(!vad.is_speech(350.0));
        assert!(vad.is_speech(350.1));
    }

    #[test]
    fn barge_in_bar_is_raised() {
        // Scenario: 1.4× the threshold must not interrupt, 1.6× must.
        let vad = VoiceActivityDetector::new(&VadConfig::default());
        assert!(vad.is_speech(350.0 * 1.4));
        assert!(!vad.is_barge_in(350.0 * 1.4));
        assert!(vad.is_barge_in(350.0 * 1.6));
    }

    #[test]
    fn energy_is_deterministic() {
        let chunk = loud_chunk(512, 160);
        assert_eq!(rms_energy(&chunk), rms_energy(&chunk));
    }
}
