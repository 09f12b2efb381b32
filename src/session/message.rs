//! Transcript messages and placeholder handling.
//!
//! [`Message`] is one entry in the session [`Transcript`].  Two reserved
//! sentinel ids act as mutable placeholders for in-progress work:
//!
//! * [`TRANSCRIBING_ID`] — the user is speaking; server-side transcription
//!   has not completed yet.
//! * [`BOT_THINKING_ID`] — a response is being generated.
//!
//! Placeholders are transient: they are replaced or removed as later events
//! arrive and are never part of the durable transcript.  Durable message ids
//! come from a per-session monotonic counter (`"{n}-user"` / `"{n}-bot"`),
//! which can never collide with the sentinels.

// ---------------------------------------------------------------------------
// Sentinel ids
// ---------------------------------------------------------------------------

/// Reserved id of the "Transcribing..." placeholder (user side).
pub const TRANSCRIBING_ID: &str = "transcribing";

/// Reserved id of the "Bot is thinking..." placeholder (bot side).
pub const BOT_THINKING_ID: &str = "bot-thinking";

// ---------------------------------------------------------------------------
// Sender / Message
// ---------------------------------------------------------------------------

/// Which side of the conversation produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sender {
    User,
    Bot,
}

impl Sender {
    /// Short label for log lines and the terminal driver.
    pub fn label(&self) -> &'static str {
        match self {
            Sender::User => "user",
            Sender::Bot => "bot",
        }
    }
}

/// A single transcript entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Unique within a session; sentinel ids mark placeholders.
    pub id: String,
    pub sender: Sender,
    pub content: String,
}

impl Message {
    pub fn new(id: impl Into<String>, sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            sender,
            content: content.into(),
        }
    }

    /// `true` when this entry is a transient placeholder.
    pub fn is_placeholder(&self) -> bool {
        self.id == TRANSCRIBING_ID || self.id == BOT_THINKING_ID
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

/// Ordered, append-only (from the orchestrator's point of view) sequence of
/// [`Message`]s.
///
/// When the text channel is authoritative the whole transcript is replaced
/// per update via [`Transcript::replace_all`]; in voice mode the orchestrator
/// mutates it directly through the placeholder operations below.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message at the end.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a placeholder, removing any existing entry with the same id
    /// first.  Calling this twice in a row therefore yields exactly one
    /// placeholder (idempotent append).
    pub fn push_placeholder(&mut self, id: &str, sender: Sender, content: &str) {
        self.remove(id);
        self.messages.push(Message::new(id, sender, content));
    }

    /// Replace the content of the message with `id` in place, keeping its
    /// position and id.  Returns `false` when no such message exists — the
    /// caller must treat that as a no-op, not an insertion.
    pub fn set_content(&mut self, id: &str, content: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id == id) {
            Some(msg) => {
                msg.content = content.to_string();
                true
            }
            None => false,
        }
    }

    /// Remove every message with `id`.  Returns `true` when at least one
    /// entry was removed.  Removing an id that is not present is a no-op, so
    /// cleanup paths can call this unconditionally.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id != id);
        self.messages.len() != before
    }

    /// Replace the entire transcript with a new snapshot (last-write-wins,
    /// no partial merge).
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.messages.iter().any(|m| m.id == id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
