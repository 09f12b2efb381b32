//! Session core — state, transcript, grounding files and the orchestrator.

pub mod events;
pub mod grounding;
pub mod message;
pub mod orchestrator;
pub mod state;

pub use events::SessionEvent;
pub use grounding::{GroundingFile, GroundingStore};
pub use message::{Message, Sender, Transcript, BOT_THINKING_ID, TRANSCRIBING_ID};
pub use orchestrator::SessionOrchestrator;
pub use state::{derive_session_error, new_shared_state, SessionState, SharedSessionState};
