//! The session event funnel.
//!
//! Every stimulus the orchestrator reacts to — user actions from the
//! presentation layer, microphone chunks, voice-channel events, text-channel
//! events — is funneled into one [`SessionEvent`] queue consumed by a single
//! task.  That task is the only writer of session state, which is what makes
//! interleaved toggles and in-flight sends race-free without locking.

use crate::text::TextEvent;
use crate::voice::VoiceEvent;

/// One stimulus for the session orchestrator.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// User toggled the microphone (enter/leave recording mode).
    ToggleRecording,

    /// User submitted a line of text.
    UserInput(String),

    /// One wire-format PCM chunk from the capture pipeline.
    CaptureAudio(Vec<u8>),

    /// Event from the voice channel.
    Voice(VoiceEvent),

    /// Event from the text channel.
    Text(TextEvent),

    /// Shut the session down (presentation layer is exiting).
    Shutdown,
}
