//! JSON framing of the bidirectional media stream.
//!
//! One WebSocket connection carries one call. Inbound events are
//! `start`, `media`, `mark` (playback-finished echo) and `stop`;
//! outbound events are `media`, `mark` (completed send announcement)
//! and `clear` (flush instruction on interruption). Field names follow
//! the telephony provider's camelCase wire format.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Events received from the telephony side.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum InboundEvent {
    /// Call connected; carries session identifiers and audio format.
    Start {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        start: StartMeta,
    },
    /// One frame of companded caller audio.
    Media { media: MediaPayload },
    /// Echo confirming a named block of our audio finished playing at
    /// the far end.
    Mark { mark: MarkInfo },
    /// Call disconnected.
    Stop,
}

/// Events sent to the telephony side.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum OutboundEvent {
    /// One frame of companded agent audio.
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: MediaPayload,
    },
    /// Names a completed send; the far end echoes it back once the
    /// audio has actually played out.
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkInfo,
    },
    /// Advisory flush: discard buffered-but-unplayed frames.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

/// Session identifiers and audio format from the `start` event.
#[derive(Debug, Clone, Deserialize)]
pub struct StartMeta {
    #[serde(rename = "callSid")]
    pub call_sid: String,
    #[serde(rename = "mediaFormat", default)]
    pub media_format: Option<MediaFormat>,
}

/// Audio format announced at call start.
#[derive(Debug, Clone, Deserialize)]
pub struct MediaFormat {
    pub encoding: String,
    #[serde(rename = "sampleRate")]
    pub sample_rate: u32,
    pub channels: u16,
}

/// Base64 audio payload wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MediaPayload {
    /// Base64-encoded companded audio.
    pub payload: String,
}

/// Completion-marker name wrapper.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkInfo {
    pub name: String,
}

/// Encode raw companded bytes into a media payload.
pub fn encode_payload(audio: &[u8]) -> MediaPayload {
    MediaPayload {
        payload: BASE64.encode(audio),
    }
}

/// Decode a media payload into raw companded bytes. Malformed base64
/// yields an empty chunk rather than an error; a garbled frame is not
/// worth dropping the call over.
pub fn decode_payload(payload: &MediaPayload) -> Vec<u8> {
    BASE64.decode(&payload.payload).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_provider_start_frame() {
        let raw = r#"{
            "event": "start",
            "sequenceNumber": "1",
            "streamSid": "MZ1234",
            "start": {
                "accountSid": "AC0000",
                "callSid": "CA5678",
                "mediaFormat": {"encoding": "audio/x-mulaw", "sampleRate": 8000, "channels": 1}
            }
        }"#;
        let event: InboundEvent = serde_json::from_str(raw).expect("parse start");
        match event {
            InboundEvent::Start { stream_sid, start } => {
                assert_eq!(stream_sid, "MZ1234");
                assert_eq!(start.call_sid, "CA5678");
                let format = start.media_format.expect("format");
                assert_eq!(format.sample_rate, 8_000);
                assert_eq!(format.channels, 1);
            }
            other => panic!("expected start, got {other:?}"),
        }
    }

    #[test]
    fn outbound_media_uses_provider_field_names() {
        let event = OutboundEvent::Media {
            stream_sid: "MZ1234".to_owned(),
            media: encode_payload(&[0xff, 0xff]),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["event"], "media");
        assert_eq!(json["streamSid"], "MZ1234");
        assert_eq!(json["media"]["payload"], "//8=");
    }

    #[test]
    fn clear_frame_has_no_body() {
        let event = OutboundEvent::Clear {
            stream_sid: "MZ1234".to_owned(),
        };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"event":"clear","streamSid":"MZ1234"}"#);
    }

    #[test]
    fn malformed_payload_decodes_to_empty() {
        let payload = MediaPayload {
            payload: "not base64!!".to_owned(),
        };
        assert!(decode_payload(&payload).is_empty());
    }
}
