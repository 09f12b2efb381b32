//! Shared session state and error derivation.
//!
//! [`SessionState`] is the single source of truth for everything the
//! presentation layer needs: recording mode, the transcript, accumulated
//! grounding files, and the derived session error.  It is held behind
//! [`SharedSessionState`] (`Arc<Mutex<…>>`); only the orchestrator task
//! writes it, the presentation layer reads it.

use std::sync::{Arc, Mutex};

use crate::session::grounding::GroundingStore;
use crate::session::message::Transcript;
use crate::text::ConnectionState;

// ---------------------------------------------------------------------------
// Session error derivation
// ---------------------------------------------------------------------------

/// Derive the user-visible session error as a pure function of the two
/// channels' states, in priority order:
///
/// 1. a text-channel error,
/// 2. text channel neither connected nor loading ("not connected"),
/// 3. the last voice-channel error,
/// 4. no error.
///
/// Recomputed on every relevant change instead of patched incrementally, so
/// a cleared condition can never leave a stale message behind.
pub fn derive_session_error(
    voice_error: Option<&str>,
    text_state: &ConnectionState,
) -> Option<String> {
    if let Some(error) = text_state.error.as_deref() {
        return Some(format!("Text channel error: {error}"));
    }
    if !text_state.connected && !text_state.loading {
        return Some("Not connected to text channel".into());
    }
    voice_error.map(|error| format!("Voice channel error: {error}"))
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Mutable session state owned by the orchestrator.
#[derive(Debug, Default)]
pub struct SessionState {
    /// `true` — voice channel authoritative; `false` — text channel.
    pub recording: bool,

    /// The assembled conversation.  Mutated directly in voice mode; replaced
    /// wholesale from text-channel snapshots in text mode.
    pub transcript: Transcript,

    /// Append-only accumulation of cited sources.
    pub grounding: GroundingStore,

    /// Last error reported by the voice channel, cleared when a new voice
    /// session opens.
    pub voice_error: Option<String>,

    /// Live text-channel connection state.
    pub text_state: ConnectionState,

    /// Derived user-visible error (see [`derive_session_error`]).
    pub session_error: Option<String>,

    /// Monotonic counter backing durable message ids.
    next_id: u64,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next durable id for a user message, e.g. `"3-user"`.
    pub fn next_user_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-user", self.next_id)
    }

    /// Next durable id for a bot message, e.g. `"4-bot"`.
    pub fn next_bot_id(&mut self) -> String {
        self.next_id += 1;
        format!("{}-bot", self.next_id)
    }

    /// Recompute [`SessionState::session_error`] from the current channel
    /// states.
    pub fn refresh_session_error(&mut self) {
        self.session_error =
            derive_session_error(self.voice_error.as_deref(), &self.text_state);
    }
}

// ---------------------------------------------------------------------------
// SharedSessionState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`SessionState`].
///
/// Cheap to clone (`Arc` clone).  Lock for a short critical section; do
/// **not** hold the lock across `.await` points.
pub type SharedSessionState = Arc<Mutex<SessionState>>;

/// Construct a new [`SharedSessionState`] wrapping a fresh session.
pub fn new_shared_state() -> SharedSessionState {
    Arc::new(Mutex::new(SessionState::new()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn connected() -> ConnectionState {
        ConnectionState {
            connected: true,
            loading: false,
            error: None,
        }
    }

    // ---- derive_session_error ---

    #[test]
    fn no_errors_and_connected_yields_none() {
        assert_eq!(derive_session_error(None, &connected()), None);
    }

    #[test]
    fn text_error_takes_highest_priority() {
        let state = ConnectionState {
            connected: false,
            loading: false,
            error: Some("401 Unauthorized".into()),
        };
        let derived = derive_session_error(Some("socket reset"), &state).unwrap();
        assert!(derived.contains("401 Unauthorized"));
    }

    #[test]
    fn disconnected_and_not_loading_reports_not_connected() {
        let state = ConnectionState::default();
        let derived = derive_session_error(None, &state).unwrap();
        assert!(derived.contains("Not connected"));
    }

    #[test]
    fn loading_suppresses_not_connected() {
        let state = ConnectionState {
            connected: false,
            loading: true,
            error: None,
        };
        assert_eq!(derive_session_error(None, &state), None);
    }

    #[test]
    fn voice_error_surfaces_when_text_channel_is_healthy() {
        let derived = derive_session_error(Some("socket reset"), &connected()).unwrap();
        assert!(derived.contains("socket reset"));
    }

    // ---- id generation ---

    #[test]
    fn generated_ids_are_unique_and_never_sentinels() {
        use crate::session::message::{BOT_THINKING_ID, TRANSCRIBING_ID};

        let mut state = SessionState::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            let user = state.next_user_id();
            let bot = state.next_bot_id();
            assert_ne!(user, TRANSCRIBING_ID);
            assert_ne!(bot, BOT_THINKING_ID);
            assert!(seen.insert(user));
            assert!(seen.insert(bot));
        }
    }

    // ---- refresh ---

    #[test]
    fn refresh_clears_stale_error_when_channel_recovers() {
        let mut state = SessionState::new();
        state.refresh_session_error();
        assert!(state.session_error.is_some()); // starts disconnected

        state.text_state = connected();
        state.refresh_session_error();
        assert!(state.session_error.is_none());
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedSessionState>();
    }
}
