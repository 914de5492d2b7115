//! AI gateway collaborator boundary.
//!
//! The call core consumes four remote operations — transcribe,
//! translate, reason, synthesize — behind one trait. Their internal
//! quality is not this crate's concern; only the call contract and
//! failure modes are. Retry/backoff belongs to the gateway side, not
//! here: every operation is a single attempt.

pub mod http;

use crate::error::Result;
use async_trait::async_trait;

pub use http::HttpGateway;

/// One completed turn of the conversation, in the working language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    /// Who produced the text.
    pub role: Role,
    /// Turn text in the pipeline's working language.
    pub text: String,
}

/// Speaker role within the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The caller.
    Caller,
    /// The agent's reply.
    Agent,
}

/// Result of a transcription call.
#[derive(Debug, Clone)]
pub struct Transcription {
    /// Transcribed text; empty means "no speech recognized".
    pub text: String,
    /// Detected ISO-639-1 language, when the recognizer reports one.
    pub language: Option<String>,
}

/// The language pipeline's remote collaborators.
///
/// All four operations may fail transiently or permanently; the call
/// core treats any error uniformly and recovers to LISTENING.
#[async_trait]
pub trait AiGateway: Send + Sync {
    /// Transcribe a companded 8 kHz utterance.
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription>;

    /// Translate text between ISO-639-1 languages. Identity when
    /// `from == to`.
    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String>;

    /// Produce a reply to `query` given the conversation so far. The
    /// history is read-only context and must not be mutated.
    async fn reason(&self, query: &str, history: &[ConversationTurn]) -> Result<String>;

    /// Synthesize `text` in the given language as companded 8 kHz
    /// audio. An empty result signals "nothing to play".
    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>>;
}

/// Display name for an ISO-639-1 code, used in the first-turn language
/// acknowledgement. Unknown codes fall back to the code itself.
pub fn language_name(code: &str) -> &str {
    match code {
        "en" => "English",
        "hi" => "Hindi",
        "es" => "Spanish",
        "fr" => "French",
        "de" => "German",
        "pt" => "Portuguese",
        "zh" => "Chinese",
        "ja" => "Japanese",
        "ko" => "Korean",
        "ar" => "Arabic",
        "ru" => "Russian",
        "it" => "Italian",
        "nl" => "Dutch",
        "pl" => "Polish",
        "tr" => "Turkish",
        "vi" => "Vietnamese",
        "th" => "Thai",
        "bn" => "Bengali",
        "ta" => "Tamil",
        "te" => "Telugu",
        "mr" => "Marathi",
        "gu" => "Gujarati",
        "ur" => "Urdu",
        "pa" => "Punjabi",
        "id" => "Indonesian",
        "uk" => "Ukrainian",
        "sv" => "Swedish",
        "fi" => "Finnish",
        "he" => "Hebrew",
        "fa" => "Persian",
        other => other,
    }
}

/// Extract the ISO-639-1 code from a BCP-47 tag, e.g. `hi-IN` → `hi`.
/// Mandarin tags (`cmn-*`) map to `zh`.
pub fn bcp47_to_iso(tag: &str) -> String {
    if tag.is_empty() {
        return "en".to_owned();
    }
    if tag.starts_with("cmn") {
        return "zh".to_owned();
    }
    tag.split('-')
        .next()
        .unwrap_or(tag)
        .to_ascii_lowercase()
}
