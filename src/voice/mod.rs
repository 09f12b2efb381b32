//! Realtime voice channel — duplex audio + event stream over a websocket.
//!
//! ```text
//! microphone PCM ──▶ ClientEvent::AppendAudio ──▶ socket
//! socket ──▶ ServerEvent ──▶ VoiceEvent ──▶ session event queue
//! ```

pub mod channel;
pub mod events;

pub use channel::{RealtimeVoiceChannel, VoiceChannel, VoiceError};
pub use events::{ClientEvent, ServerEvent, ToolResult, ToolSource, VoiceEvent};
