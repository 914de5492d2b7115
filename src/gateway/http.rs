//! HTTP client for the AI gateway's four operations.
//!
//! Speaks the cloud provider's JSON shapes: batch speech recognition
//! with multi-language auto-detection, basic translation, a chat-style
//! reasoning endpoint grounded in the injected knowledge text, and
//! 24 kHz LINEAR16 synthesis that is downsampled to companded 8 kHz
//! here before it ever reaches the session. One attempt per call;
//! retry/backoff is the gateway side's job.

use crate::audio::resample;
use crate::config::GatewayConfig;
use crate::error::{CallError, Result};
use crate::gateway::{AiGateway, ConversationTurn, Role, Transcription, bcp47_to_iso};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// Recognition languages offered for auto-detection alongside the
/// primary language (BCP-47).
const STT_ALT_LANGUAGES: [&str; 12] = [
    "hi-IN", "es-ES", "fr-FR", "de-DE", "pt-BR", "ja-JP", "ko-KR", "ar-SA", "zh", "ru-RU",
    "it-IT", "ta-IN",
];

/// Synthesis requests beyond this many characters are truncated.
const MAX_TTS_CHARS: usize = 5_000;

/// BCP-47 voice language for an ISO-639-1 code.
fn voice_language(iso: &str) -> &'static str {
    match iso {
        "en" => "en-US",
        "hi" => "hi-IN",
        "es" => "es-ES",
        "fr" => "fr-FR",
        "de" => "de-DE",
        "pt" => "pt-BR",
        "ja" => "ja-JP",
        "ko" => "ko-KR",
        "ar" => "ar-XA",
        "zh" => "cmn-CN",
        "ru" => "ru-RU",
        "it" => "it-IT",
        "ta" => "ta-IN",
        "te" => "te-IN",
        "bn" => "bn-IN",
        "mr" => "mr-IN",
        "gu" => "gu-IN",
        "tr" => "tr-TR",
        "pl" => "pl-PL",
        "nl" => "nl-NL",
        "vi" => "vi-VN",
        "th" => "th-TH",
        _ => "en-US",
    }
}

/// HTTP implementation of [`AiGateway`].
pub struct HttpGateway {
    client: reqwest::Client,
    config: GatewayConfig,
    system_prompt: String,
    synthesis_sample_rate: u32,
}

impl HttpGateway {
    /// Build a gateway, loading the knowledge text from the configured
    /// path.
    ///
    /// # Errors
    ///
    /// Returns an error if the knowledge file cannot be read.
    pub fn new(config: GatewayConfig, synthesis_sample_rate: u32) -> Result<Self> {
        let knowledge = match &config.knowledge_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| {
                CallError::Config(format!("cannot read knowledge file {}: {e}", path.display()))
            })?,
            None => String::new(),
        };
        Ok(Self::with_knowledge(config, &knowledge, synthesis_sample_rate))
    }

    /// Build a gateway with the knowledge text supplied directly.
    pub fn with_knowledge(
        config: GatewayConfig,
        knowledge: &str,
        synthesis_sample_rate: u32,
    ) -> Self {
        let system_prompt = build_system_prompt(knowledge);
        Self {
            client: reqwest::Client::new(),
            config,
            system_prompt,
            synthesis_sample_rate,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{path}", self.config.base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url).json(&body);
        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CallError::Gateway(format!("{path}: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(CallError::Gateway(format!("{path}: HTTP {status}")));
        }
        response
            .json()
            .await
            .map_err(|e| CallError::Gateway(format!("{path}: invalid response body: {e}")))
    }
}

fn build_system_prompt(knowledge: &str) -> String {
    format!(
        "You are a medical information representative speaking with a healthcare \
         professional on a phone call.\n\
         Rules: only use the PRODUCT INFORMATION below; if the answer is not there, say \
         the information is not specified in the publicly available product information. \
         Keep responses to one to three short natural sentences. Keep drug names, trial \
         names, dosages, and units in English regardless of conversation language. Never \
         mention AI, prompts, or translation. Never discuss off-label use or give \
         patient-specific advice. No lists or formatting of any kind — speak as a human \
         on the phone.\n\nPRODUCT INFORMATION:\n---\n{knowledge}\n---"
    )
}

#[derive(Debug, Deserialize, Default)]
struct RecognizeResponse {
    #[serde(default)]
    results: Vec<RecognizeResult>,
}

#[derive(Debug, Deserialize)]
struct RecognizeResult {
    #[serde(default)]
    alternatives: Vec<RecognizeAlternative>,
    #[serde(rename = "languageCode", default)]
    language_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RecognizeAlternative {
    #[serde(default)]
    transcript: String,
}

#[derive(Debug, Deserialize, Default)]
struct TranslateResponse {
    #[serde(default)]
    data: TranslateData,
}

#[derive(Debug, Deserialize, Default)]
struct TranslateData {
    #[serde(default)]
    translations: Vec<TranslationItem>,
}

#[derive(Debug, Deserialize)]
struct TranslationItem {
    #[serde(rename = "translatedText", default)]
    translated_text: String,
}

#[derive(Debug, Deserialize, Default)]
struct ReasonResponse {
    #[serde(default)]
    candidates: Vec<ReasonCandidate>,
}

#[derive(Debug, Deserialize)]
struct ReasonCandidate {
    #[serde(default)]
    content: ReasonContent,
}

#[derive(Debug, Deserialize, Default)]
struct ReasonContent {
    #[serde(default)]
    parts: Vec<ReasonPart>,
}

#[derive(Debug, Deserialize)]
struct ReasonPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize, Default)]
struct SynthesizeResponse {
    #[serde(rename = "audioContent", default)]
    audio_content: String,
}

#[async_trait]
impl AiGateway for HttpGateway {
    async fn transcribe(&self, audio: &[u8]) -> Result<Transcription> {
        // Too little audio to be worth a round trip.
        if audio.len() < 100 {
            return Ok(Transcription {
                text: String::new(),
                language: None,
            });
        }
        let body = json!({
            "audio": { "content": BASE64.encode(audio) },
            "config": {
                "encoding": "MULAW",
                "sampleRateHertz": 8_000,
                "languageCode": "en-US",
                "alternativeLanguageCodes": STT_ALT_LANGUAGES,
                "model": "latest_long",
                "enableAutomaticPunctuation": true,
            },
        });
        let value = self.post("speech:recognize", body).await?;
        let parsed: RecognizeResponse = serde_json::from_value(value)?;

        let Some(result) = parsed.results.first() else {
            return Ok(Transcription {
                text: String::new(),
                language: None,
            });
        };
        let text = result
            .alternatives
            .first()
            .map(|a| a.transcript.trim().to_owned())
            .unwrap_or_default();
        let language = result
            .language_code
            .as_deref()
            .map(bcp47_to_iso)
            .filter(|_| !text.is_empty());
        debug!(text = %text, language = ?language, "transcription");
        Ok(Transcription { text, language })
    }

    async fn translate(&self, text: &str, from: &str, to: &str) -> Result<String> {
        if text.trim().is_empty() {
            return Ok(String::new());
        }
        if from == to {
            return Ok(text.to_owned());
        }
        let body = json!({ "q": text, "source": from, "target": to, "format": "text" });
        let value = self.post("translate", body).await?;
        let parsed: TranslateResponse = serde_json::from_value(value)?;
        parsed
            .data
            .translations
            .into_iter()
            .next()
            .map(|t| t.translated_text)
            .ok_or_else(|| CallError::Gateway("translate: empty response".to_owned()))
    }

    async fn reason(&self, query: &str, history: &[ConversationTurn]) -> Result<String> {
        if query.trim().is_empty() {
            return Ok("I didn't catch that. Could you repeat your question?".to_owned());
        }
        let mut contents: Vec<serde_json::Value> = history
            .iter()
            .map(|turn| {
                let role = match turn.role {
                    Role::Caller => "user",
                    Role::Agent => "model",
                };
                json!({ "role": role, "parts": [{ "text": turn.text }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": query }] }));

        let body = json!({
            "systemInstruction": { "parts": [{ "text": self.system_prompt }] },
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens,
            },
        });
        let value = self.post("reason", body).await?;
        let parsed: ReasonResponse = serde_json::from_value(value)?;
        let reply = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content.parts.into_iter().next())
            .map(|p| p.text.trim().to_owned())
            .unwrap_or_default();
        if reply.is_empty() {
            return Ok("I'm sorry, could you repeat that?".to_owned());
        }
        Ok(reply)
    }

    async fn synthesize(&self, text: &str, language: &str) -> Result<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Vec::new());
        }
        let input: String = if text.len() > MAX_TTS_CHARS {
            let mut cut = MAX_TTS_CHARS - 3;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &text[..cut])
        } else {
            text.to_owned()
        };

        let body = json!({
            "input": { "text": input },
            "voice": { "languageCode": voice_language(language) },
            "audioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": self.synthesis_sample_rate,
                "effectsProfileId": ["telephony-class-application"],
            },
        });
        let value = self.post("speech:synthesize", body).await?;
        let parsed: SynthesizeResponse = serde_json::from_value(value)?;
        if parsed.audio_content.is_empty() {
            return Ok(Vec::new());
        }
        let pcm = BASE64
            .decode(&parsed.audio_content)
            .map_err(|e| CallError::Gateway(format!("speech:synthesize: bad audio: {e}")))?;
        // The synthesizer speaks 16-bit linear at its native rate; the
        // caller hears companded 8 kHz.
        Ok(resample::pcm16le_to_mulaw_8k(&pcm, self.synthesis_sample_rate))
    }
}
