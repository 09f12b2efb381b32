//! Response audio playback via `cpal`.
//!
//! [`AudioPlayback`] owns the output device for the life of the process.
//! Decoded response chunks are appended to a FIFO sample queue in arrival
//! order; the output callback drains it and writes silence when it runs
//! empty.  [`AudioSink::stop`] and [`AudioSink::reset`] both perform a hard
//! reset: everything queued or playing is discarded, never flushed.
//!
//! The cpal stream is not `Send` on every platform, so it lives on a
//! dedicated `audio-playback` thread; the queue handle shared with the
//! session task is plain `Arc<Mutex<VecDeque<f32>>>`.

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::pcm::resample;

// ---------------------------------------------------------------------------
// PlaybackError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up audio playback.
#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("failed to query default output config: {0}")]
    DefaultConfig(String),

    #[error("failed to build output stream: {0}")]
    BuildStream(String),

    #[error("failed to start output stream: {0}")]
    PlayStream(String),

    #[error("playback thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// AudioSink trait
// ---------------------------------------------------------------------------

/// Capability interface of the audio playback pipeline.
///
/// All methods are synchronous and non-blocking so the session task can call
/// them inline while handling events.
pub trait AudioSink: Send + Sync {
    /// Queue decoded wire-rate samples for playback, preserving arrival
    /// order (FIFO, no reordering or merging).
    fn push(&self, pcm: &[i16]);

    /// Discard everything queued or playing.  No flush.
    fn stop(&self);

    /// Hard reset at session start.  Equivalent to [`AudioSink::stop`]; kept
    /// separate so call sites read as intent.
    fn reset(&self);
}

// ---------------------------------------------------------------------------
// AudioPlayback
// ---------------------------------------------------------------------------

/// Production [`AudioSink`] backed by a cpal output stream.
pub struct AudioPlayback {
    /// Mono samples at the device rate, drained by the output callback.
    queue: Arc<Mutex<VecDeque<f32>>>,
    /// Wire sample rate of pushed chunks (Hz).
    wire_rate: u32,
    /// Native rate of the output device (Hz).
    device_rate: u32,
    shutdown_tx: Option<mpsc::Sender<()>>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioPlayback {
    /// Acquire the default output device and start the (initially silent)
    /// output stream.
    ///
    /// `wire_rate` is the sample rate of chunks later passed to `push`;
    /// `gain` (0.0 – 1.0) is applied per sample in the output callback.
    pub fn new(wire_rate: u32, gain: f32) -> Result<Self, PlaybackError> {
        let queue: Arc<Mutex<VecDeque<f32>>> = Arc::new(Mutex::new(VecDeque::new()));
        let callback_queue = Arc::clone(&queue);
        let gain = gain.clamp(0.0, 1.0);

        let (ready_tx, ready_rx) = mpsc::channel::<Result<u32, PlaybackError>>();
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("audio-playback".into())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_output_device() {
                    Some(device) => device,
                    None => {
                        let _ = ready_tx.send(Err(PlaybackError::NoDevice));
                        return;
                    }
                };

                let supported = match device.default_output_config() {
                    Ok(supported) => supported,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::DefaultConfig(e.to_string())));
                        return;
                    }
                };

                let device_rate = supported.sample_rate().0;
                let channels = supported.channels() as usize;
                let config: cpal::StreamConfig = supported.into();

                let stream = match device.build_output_stream(
                    &config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        fill_output(&callback_queue, data, channels, gain);
                    },
                    |err: cpal::StreamError| {
                        log::error!("audio: cpal output stream error: {err}");
                    },
                    None,
                ) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(PlaybackError::BuildStream(e.to_string())));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(PlaybackError::PlayStream(e.to_string())));
                    return;
                }

                let _ = ready_tx.send(Ok(device_rate));

                // Park until shutdown; the stream keeps playing from the
                // shared queue the whole time.
                let _ = shutdown_rx.recv();
                drop(stream);
                log::debug!("audio: playback thread finished");
            })
            .map_err(|e| PlaybackError::Thread(e.to_string()))?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| PlaybackError::Thread("playback thread exited before startup".into()))??;

        log::info!("audio: playback ready ({device_rate} Hz device, {wire_rate} Hz wire)");

        Ok(Self {
            queue,
            wire_rate,
            device_rate,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

impl AudioSink for AudioPlayback {
    fn push(&self, pcm: &[i16]) {
        queue_samples(&self.queue, pcm, self.wire_rate, self.device_rate);
    }

    fn stop(&self) {
        self.queue.lock().unwrap().clear();
    }

    fn reset(&self) {
        self.queue.lock().unwrap().clear();
    }
}

impl Drop for AudioPlayback {
    fn drop(&mut self) {
        self.shutdown_tx = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Queue plumbing
// ---------------------------------------------------------------------------

/// Convert wire-rate PCM16 to device-rate `f32` samples and append them to
/// the queue, preserving arrival order.
fn queue_samples(queue: &Mutex<VecDeque<f32>>, pcm: &[i16], wire_rate: u32, device_rate: u32) {
    let samples: Vec<f32> = pcm.iter().map(|&s| s as f32 / i16::MAX as f32).collect();
    let converted = resample(&samples, wire_rate, device_rate);
    queue.lock().unwrap().extend(converted);
}

/// Fill one interleaved output buffer from the queue.  The mono sample is
/// duplicated across all channels; silence is written once the queue runs
/// empty.
fn fill_output(queue: &Mutex<VecDeque<f32>>, data: &mut [f32], channels: usize, gain: f32) {
    let mut queue = queue.lock().unwrap();
    for frame in data.chunks_mut(channels) {
        let sample = queue.pop_front().unwrap_or(0.0) * gain;
        for out in frame {
            *out = sample;
        }
    }
}

// ---------------------------------------------------------------------------
// NullPlayback
// ---------------------------------------------------------------------------

/// No-op [`AudioSink`] used when no output device is available, so the rest
/// of the session still works (the response text and grounding files arrive
/// regardless).
pub struct NullPlayback;

impl AudioSink for NullPlayback {
    fn push(&self, _pcm: &[i16]) {}
    fn stop(&self) {}
    fn reset(&self) {}
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
