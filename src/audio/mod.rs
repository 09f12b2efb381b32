//! Audio pipelines — microphone capture and response playback.
//!
//! ```text
//! Microphone → cpal callback → downmix → resample → PCM16 bytes → session
//! session → decode_base64_pcm16 → FIFO queue → cpal output callback
//! ```
//!
//! Capture and playback each hold their device exclusively and run their
//! cpal stream on a dedicated thread (cpal streams are not `Send` on every
//! platform).

pub mod capture;
pub mod pcm;
pub mod playback;

pub use capture::{AudioCapture, AudioSource, CaptureError, MicCapture, StreamHandle};
pub use pcm::{decode_base64_pcm16, downmix_to_mono, f32_to_pcm16_bytes, resample, PcmError};
pub use playback::{AudioPlayback, AudioSink, NullPlayback, PlaybackError};
