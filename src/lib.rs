//! duochat — dual-channel conversational client.
//!
//! One conversation, two transports:
//!
//! * a duplex realtime **voice** channel over a websocket ([`voice`]), with
//!   microphone capture and response playback ([`audio`]), and
//! * a turn-based **text** channel over HTTP polling ([`text`]).
//!
//! The [`session`] module assembles both into a single transcript with
//! placeholder messages for in-progress work, and accumulates the grounding
//! files cited by tool responses.  All state transitions run on one
//! orchestrator task fed by a single event queue.

pub mod audio;
pub mod config;
pub mod session;
pub mod text;
pub mod voice;
