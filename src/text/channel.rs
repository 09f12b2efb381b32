//! Text channel capability interface and shared types.
//!
//! The orchestrator talks to the turn-based text backend exclusively through
//! [`TextChannel`] so tests can substitute a mock.  The channel pushes
//! [`TextEvent`]s into the session event queue; the orchestrator never reads
//! channel internals directly.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// TextError
// ---------------------------------------------------------------------------

/// Errors surfaced by the text channel.
#[derive(Debug, Error)]
pub enum TextError {
    /// HTTP transport failure (connection refused, timeout, DNS ...).
    #[error("text channel request failed: {0}")]
    Request(String),

    /// The remote rejected the request (non-2xx status).
    #[error("text channel rejected the request: {0}")]
    Rejected(String),

    /// The response body could not be parsed as expected JSON.
    #[error("failed to parse text channel response: {0}")]
    Parse(String),

    /// No conversation is open — `open()` has not succeeded yet.
    #[error("text channel is not connected")]
    NotConnected,
}

impl From<reqwest::Error> for TextError {
    fn from(e: reqwest::Error) -> Self {
        TextError::Request(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConnectionState / TextMessage
// ---------------------------------------------------------------------------

/// Live connection/loading state of the text channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionState {
    /// A conversation is open and polling is healthy.
    pub connected: bool,
    /// The initial conversation handshake is still in flight.
    pub loading: bool,
    /// Last channel-level error, if any.
    pub error: Option<String>,
}

/// One message as exchanged with the text backend.
///
/// `sender` is the raw `from.id` of the wire activity; the orchestrator
/// projects it onto [`crate::session::Sender`] (`"user"` → user, anything
/// else → bot).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    pub id: String,
    pub sender: String,
    pub text: String,
}

// ---------------------------------------------------------------------------
// TextEvent
// ---------------------------------------------------------------------------

/// Events emitted by the text channel into the session event queue.
#[derive(Debug, Clone)]
pub enum TextEvent {
    /// Connection/loading state changed.
    Connection(ConnectionState),
    /// Full snapshot of the ordered message list.  Each snapshot entirely
    /// supersedes the previous one (last-write-wins, no partial merge).
    Messages(Vec<TextMessage>),
    /// The remote started (`true`) or stopped (`false`) composing a reply.
    Typing(bool),
}

// ---------------------------------------------------------------------------
// TextChannel trait
// ---------------------------------------------------------------------------

/// Capability interface of the turn-based text channel.
///
/// Implementations must be `Send + Sync` so they can be held behind a
/// `Box<dyn TextChannel>` inside the orchestrator task.
#[async_trait]
pub trait TextChannel: Send + Sync {
    /// Open the conversation and start delivering [`TextEvent`]s to `events`.
    ///
    /// Safe to call once per session; the channel keeps retrying internally
    /// after transient poll failures, so a single `open` outlives them.
    async fn open(&mut self, events: mpsc::Sender<TextEvent>) -> Result<(), TextError>;

    /// Send one user utterance.  Resolves when the remote accepts the turn;
    /// the caller must clear any optimistic UI state on rejection.
    async fn send_message(&self, text: &str) -> Result<(), TextError>;
}

// Compile-time assertion: Box<dyn TextChannel> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn TextChannel>) {}
};

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
