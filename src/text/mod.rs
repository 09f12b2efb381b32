//! Turn-based text channel (Bot Framework Direct Line).
//!
//! ```text
//! user utterance ──▶ POST activity ──▶ bot
//! poll activities ──▶ TextEvent::{Connection, Messages, Typing} ──▶ session
//! ```

pub mod channel;
pub mod directline;

pub use channel::{ConnectionState, TextChannel, TextError, TextEvent, TextMessage};
pub use directline::DirectLineChannel;
