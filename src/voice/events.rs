//! Realtime voice channel wire events.
//!
//! Inbound server events and outbound client events are JSON objects tagged
//! by a `"type"` field.  [`ServerEvent`] covers the event types the session
//! consumes; anything else on the socket is ignored at debug level by the
//! channel.  [`ToolResult`] is the payload carried (JSON-encoded, as a
//! string) inside an `extension.middle_tier_tool_response` event.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// ServerEvent (inbound)
// ---------------------------------------------------------------------------

/// Typed inbound events from the realtime socket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    /// A chunk of response audio, base64-encoded 16-bit little-endian PCM.
    #[serde(rename = "response.audio.delta")]
    AudioDelta { delta: String },

    /// Server-side voice activity detection fired — the user started
    /// speaking.
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,

    /// Transcription of the user's utterance completed.
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { transcript: String },

    /// Result of a server-invoked tool call.  `tool_result` is itself a
    /// JSON-encoded [`ToolResult`].
    #[serde(rename = "extension.middle_tier_tool_response")]
    ToolResponse { tool_result: String },

    /// Channel-level error.  Non-fatal; the channel stays usable for the
    /// next turn.
    #[serde(rename = "error")]
    Error {
        #[serde(default)]
        message: String,
    },
}

// ---------------------------------------------------------------------------
// ClientEvent (outbound)
// ---------------------------------------------------------------------------

/// Typed outbound events sent over the realtime socket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    /// Append a chunk of microphone audio (base64 PCM) to the server-side
    /// input buffer.
    #[serde(rename = "input_audio_buffer.append")]
    AppendAudio { audio: String },

    /// Discard everything currently in the server-side input buffer.
    #[serde(rename = "input_audio_buffer.clear")]
    ClearBuffer,

    /// Inject a text turn into the conversation.
    #[serde(rename = "conversation.item.create")]
    ItemCreate { item: ConversationItem },

    /// Ask the server to start generating a response.
    #[serde(rename = "response.create")]
    ResponseCreate,
}

/// A conversation item carrying one user text turn.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub kind: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// One content part of a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl ClientEvent {
    /// The two events that make up an injected text turn: create the user
    /// item, then request a response.
    pub fn text_turn(text: &str) -> [ClientEvent; 2] {
        [
            ClientEvent::ItemCreate {
                item: ConversationItem {
                    kind: "message".into(),
                    role: "user".into(),
                    content: vec![ContentPart {
                        kind: "input_text".into(),
                        text: text.to_string(),
                    }],
                },
            },
            ClientEvent::ResponseCreate,
        ]
    }
}

// ---------------------------------------------------------------------------
// ToolResult
// ---------------------------------------------------------------------------

/// Parsed payload of a tool response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolResult {
    #[serde(default)]
    pub sources: Vec<ToolSource>,
}

/// One cited source inside a [`ToolResult`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ToolSource {
    pub chunk_id: String,
    pub title: String,
    pub chunk: String,
}

impl ToolResult {
    /// Parse the JSON-encoded `tool_result` string carried by a
    /// [`ServerEvent::ToolResponse`].
    ///
    /// A parse failure is a turn-local protocol error: the caller reports it
    /// and performs placeholder cleanup, but the session continues.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

// ---------------------------------------------------------------------------
// VoiceEvent (channel → orchestrator)
// ---------------------------------------------------------------------------

/// Events delivered by the voice channel into the session event queue.
///
/// Lifecycle events (`Opened` / `Closed`) are synthesized by the channel
/// itself; the rest map 1:1 onto [`ServerEvent`]s.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceEvent {
    Opened,
    Closed,
    Error(String),
    SpeechStarted,
    TranscriptionCompleted(String),
    AudioDelta(String),
    ToolResponse(String),
}

impl From<ServerEvent> for VoiceEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::AudioDelta { delta } => VoiceEvent::AudioDelta(delta),
            ServerEvent::SpeechStarted => VoiceEvent::SpeechStarted,
            ServerEvent::TranscriptionCompleted { transcript } => {
                VoiceEvent::TranscriptionCompleted(transcript)
            }
            ServerEvent::ToolResponse { tool_result } => VoiceEvent::ToolResponse(tool_result),
            ServerEvent::Error { message } => VoiceEvent::Error(message),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
