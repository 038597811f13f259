//! Wire format of the streaming recognizer.
//!
//! ```text
//! → {"type":"audio_chunk","data":{"chunk":"<base64 s16le>"}}
//! ← {"type":"transcript","data":{"is_final":true,"utterance":{"text":"..."}}}
//! ```
//!
//! Any other inbound `type` is ignored.

use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::TranscriptFragment;

/// Body of the session init request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InitRequest {
    pub encoding: String,
    pub sample_rate: u32,
    pub bit_depth: u16,
    pub channels: u16,
}

impl Default for InitRequest {
    fn default() -> Self {
        Self {
            encoding: "wav/pcm".into(),
            sample_rate: 16_000,
            bit_depth: 16,
            channels: 1,
        }
    }
}

/// Reply to the init request: where to open the WebSocket.
#[derive(Debug, Clone, Deserialize)]
pub struct InitResponse {
    pub url: String,
    #[serde(default)]
    pub id: Option<String>,
}

/// Messages sent to the recognizer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    AudioChunk { chunk: String },
}

impl OutboundMessage {
    pub fn audio_chunk(pcm_le: &[u8]) -> Self {
        OutboundMessage::AudioChunk {
            chunk: base64::engine::general_purpose::STANDARD.encode(pcm_le),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct TranscriptData {
    #[serde(default)]
    is_final: bool,
    utterance: UtteranceData,
}

#[derive(Debug, Deserialize)]
struct UtteranceData {
    #[serde(default)]
    text: String,
}

/// Extract a transcript fragment from one inbound text message.
///
/// Returns `None` for non-transcript messages and for anything unparsable.
pub fn parse_recognizer_message(raw: &str) -> Option<TranscriptFragment> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(e) => e,
        Err(e) => {
            debug!("ignoring unparsable recognizer message: {e}");
            return None;
        }
    };
    if envelope.kind != "transcript" {
        return None;
    }
    let data: TranscriptData = match serde_json::from_value(envelope.data) {
        Ok(d) => d,
        Err(e) => {
            debug!("ignoring malformed transcript payload: {e}");
            return None;
        }
    };
    Some(TranscriptFragment {
        text: data.utterance.text,
        is_final: data.is_final,
    })
}
