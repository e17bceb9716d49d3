//! Wire frames on the "response" data channel.
//!
//! Inbound frames are JSON objects tagged by a `type` field. The set below
//! is deliberately closed: everything else parses as [`ServerEvent::Unrecognized`]
//! and is ignored, so service-side additions never break the client. Both
//! wire spellings of the assistant text delta and the response terminal are
//! accepted.

use crate::config::VadTuning;
use crate::lang::LanguageCode;
use serde::{Deserialize, Serialize};

// ── Inbound ───────────────────────────────────────────────────────

/// One parsed data-channel event from the interpreter service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// Partial transcription of live user speech.
    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    UserTranscriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// Final transcription of one user utterance.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    UserTranscriptCompleted {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Assistant text-channel delta.
    #[serde(rename = "response.text.delta", alias = "response.output_text.delta")]
    TextDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// Assistant spoken-transcript delta.
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },

    /// Spoken transcript finished. This is the authoritative commit point
    /// for the turn.
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// The whole response finished.
    #[serde(rename = "response.done", alias = "response.completed")]
    ResponseDone {
        #[serde(default)]
        response_id: Option<String>,
    },

    /// Any event type this client does not consume.
    #[serde(other)]
    Unrecognized,
}

/// Parse one raw data-channel frame.
///
/// Returns `None` for anything that is not a JSON object with a `type`
/// field. Malformed frames are dropped by the router, never fatal.
pub fn parse_frame(raw: &str) -> Option<ServerEvent> {
    serde_json::from_str(raw).ok()
}

// ── Outbound ──────────────────────────────────────────────────────

/// The `session.update` frame pushed when the data channel opens and after
/// every language change.
#[derive(Debug, Clone, Serialize)]
pub struct SessionUpdate {
    #[serde(rename = "type")]
    kind: &'static str,
    session: SessionPayload,
}

#[derive(Debug, Clone, Serialize)]
struct SessionPayload {
    modalities: [&'static str; 2],
    instructions: String,
    turn_detection: TurnDetection,
    input_audio_transcription: TranscriptionRequest,
}

#[derive(Debug, Clone, Serialize)]
struct TurnDetection {
    #[serde(rename = "type")]
    kind: &'static str,
    threshold: f32,
    prefix_padding_ms: u32,
    silence_duration_ms: u32,
}

#[derive(Debug, Clone, Serialize)]
struct TranscriptionRequest {
    model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    language: Option<String>,
}

impl SessionUpdate {
    /// Build a frame with server VAD and the given instructions.
    pub fn new(instructions: String, vad: &VadTuning, transcription_model: &str) -> Self {
        Self {
            kind: "session.update",
            session: SessionPayload {
                modalities: ["text", "audio"],
                instructions,
                turn_detection: TurnDetection {
                    kind: "server_vad",
                    threshold: vad.threshold,
                    prefix_padding_ms: vad.prefix_padding_ms,
                    silence_duration_ms: vad.silence_duration_ms,
                },
                input_audio_transcription: TranscriptionRequest {
                    model: transcription_model.to_string(),
                    language: None,
                },
            },
        }
    }

    /// Pin the transcription model to one language. Useful for
    /// single-language sessions; a two-party session leaves this unset.
    pub fn with_transcription_language(mut self, lang: LanguageCode) -> Self {
        self.session.input_audio_transcription.language = Some(lang.as_str().to_string());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

// ── Tests ─────────────────────────────────────────────────────────
