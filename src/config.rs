//! Configuration types for the call core.

use crate::error::{CallError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for one call-handling process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Audio format settings.
    pub audio: AudioConfig,
    /// Voice activity detection settings.
    pub vad: VadConfig,
    /// Turn-taking and utterance buffering settings.
    pub turn: TurnConfig,
    /// Language and conversation settings.
    pub language: LanguageConfig,
    /// AI gateway connection settings.
    pub gateway: GatewayConfig,
    /// Media stream endpoint settings.
    pub server: ServerConfig,
}

impl CallConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        toml::from_str(&raw)
            .map_err(|e| CallError::Config(format!("cannot parse {}: {e}", path.display())))
    }
}

/// Audio format configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the telephony leg in Hz (companded mono).
    pub telephony_sample_rate: u32,
    /// Native sample rate of the speech synthesizer in Hz (16-bit linear).
    pub synthesis_sample_rate: u32,
    /// Duration of one outbound media frame in ms.
    pub frame_duration_ms: u32,
}

impl AudioConfig {
    /// Companded bytes in one outbound frame (one byte per sample).
    pub fn frame_bytes(&self) -> usize {
        (self.telephony_sample_rate as usize * self.frame_duration_ms as usize) / 1000
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            telephony_sample_rate: 8_000,
            synthesis_sample_rate: 24_000,
            frame_duration_ms: 20,
        }
    }
}

/// Voice activity detection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    /// RMS energy threshold for speech detection, in 16-bit sample units.
    ///
    /// Chunks with RMS above this value are classified as speech.
    /// Typical values for telephone audio:
    ///   - 200: sensitive (picks up quiet speech and line noise)
    ///   - 350: normal sensitivity (default)
    ///   - 600: low sensitivity (only loud/close speech)
    pub energy_threshold: f32,
    /// Multiplier applied to the threshold while the agent is speaking.
    ///
    /// Raises the bar for barge-in so background noise cannot cut the
    /// agent off; only a clearly louder utterance counts.
    pub barge_in_multiplier: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            energy_threshold: 350.0,
            barge_in_multiplier: 1.5,
        }
    }
}

/// Turn-taking configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TurnConfig {
    /// Continuous silence duration in ms that ends the caller's turn.
    pub silence_trigger_ms: u64,
    /// Minimum speech duration in ms for a turn to be processed.
    ///
    /// Rejects short noise bursts that slipped past the energy gate.
    pub min_speech_ms: u64,
    /// Utterances shorter than this many companded bytes are discarded
    /// without invoking the pipeline (~0.3 s at 8 kHz).
    pub min_utterance_bytes: usize,
    /// Hard cap on a single utterance in seconds. Reaching the cap forces
    /// an immediate turn-end regardless of the silence timer.
    pub max_utterance_secs: u64,
    /// Poll interval of the silence-check task in ms while recording.
    pub silence_check_interval_ms: u64,
    /// Silence pre-roll emitted before each synthesized reply, in ms.
    pub thinking_pause_ms: u64,
}

impl TurnConfig {
    /// Utterance cap in companded bytes at the given telephony rate.
    pub fn max_utterance_bytes(&self, telephony_sample_rate: u32) -> usize {
        self.max_utterance_secs as usize * telephony_sample_rate as usize
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            silence_trigger_ms: 1_500,
            min_speech_ms: 500,
            min_utterance_bytes: 2_400,
            max_utterance_secs: 30,
            silence_check_interval_ms: 100,
            thinking_pause_ms: 350,
        }
    }
}

/// Language and conversation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LanguageConfig {
    /// ISO-639-1 language the reasoning step runs in.
    pub working_language: String,
    /// ISO-639-1 language assumed when detection returns nothing.
    pub fallback_language: String,
    /// Maximum conversation turns kept as reasoning context. Oldest
    /// turns are discarded first (sliding window).
    pub max_history_turns: usize,
    /// Greeting spoken when the call connects, in the working language.
    pub greeting: String,
    /// Recovery message spoken after a pipeline failure, in the working
    /// language (translated to the caller's language when locked).
    pub recovery_message: String,
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            working_language: "en".to_owned(),
            fallback_language: "en".to_owned(),
            max_history_turns: 20,
            greeting: "Hello! Welcome to the medical information service. Please go ahead, \
                       you may speak in any language you are comfortable with."
                .to_owned(),
            recovery_message: "I'm sorry, I didn't quite catch that. Could you please repeat \
                               your question?"
                .to_owned(),
        }
    }
}

/// AI gateway connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Base URL of the gateway, including `/v1`.
    pub base_url: String,
    /// Bearer token for authentication.
    pub api_key: String,
    /// Path to the knowledge text injected into every reasoning call.
    ///
    /// Loaded once at gateway construction and passed in explicitly —
    /// there is no process-wide knowledge singleton.
    pub knowledge_path: Option<PathBuf>,
    /// Sampling temperature for the reasoning model.
    pub temperature: f64,
    /// Maximum output tokens per reasoning call. Replies are spoken on a
    /// phone call, so this stays small.
    pub max_output_tokens: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:9090/v1".to_owned(),
            api_key: String::new(),
            knowledge_path: None,
            temperature: 0.4,
            max_output_tokens: 400,
        }
    }
}

/// Media stream endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Socket address the WebSocket endpoint binds to.
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_owned(),
        }
    }
}
