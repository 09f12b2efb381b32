//! Microphone capture via `cpal`.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.  The
//! returned [`StreamHandle`] is a RAII guard — dropping it stops the
//! underlying cpal stream and releases the microphone.
//!
//! [`MicCapture`] is the production [`AudioSource`]: it runs the stream on a
//! dedicated thread (cpal streams are not `Send` on every platform) and
//! forwards wire-format PCM chunks into the session event queue.  Its
//! `stop()` is awaitable and joins that thread, so once it resolves no
//! further chunk can be delivered.

use std::sync::mpsc;
use std::time::Duration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::pcm::{downmix_to_mono, f32_to_pcm16_bytes, resample};

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Errors that can occur while setting up or running audio capture.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("no input device found on the default audio host")]
    NoDevice,

    #[error("input device not found: {0}")]
    DeviceNotFound(String),

    #[error("failed to enumerate input devices: {0}")]
    Devices(String),

    #[error("failed to query default input config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build input stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start audio stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("capture thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// RAII guard that keeps the cpal stream alive.
///
/// Dropping this value stops the underlying hardware stream and releases the
/// device — the scoped-acquisition guarantee rests on this.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// Microphone wrapper built on top of `cpal`.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    /// Native sample rate reported by the device (Hz).
    sample_rate: u32,
    /// Number of interleaved channels reported by the device.
    channels: u16,
}

impl AudioCapture {
    /// Create a new [`AudioCapture`].
    ///
    /// `device_name` selects a specific input device; `None` uses the system
    /// default.  The device's preferred stream configuration is queried so
    /// no manual configuration is required.
    pub fn new(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();

        let device = match device_name {
            Some(name) => host
                .input_devices()
                .map_err(|e| CaptureError::Devices(e.to_string()))?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;

        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_rate,
            channels,
        })
    }

    /// Start recording and send wire-format chunks (16-bit LE mono PCM at
    /// `target_rate`) to `tx`.
    ///
    /// The cpal callback runs on a dedicated audio thread; each hardware
    /// buffer is downmixed, resampled and converted before being forwarded.
    /// Send errors (receiver dropped) are silently ignored so the audio
    /// thread never panics.
    pub fn start_pcm16(
        &self,
        tx: mpsc::Sender<Vec<u8>>,
        target_rate: u32,
    ) -> Result<StreamHandle, CaptureError> {
        let native_rate = self.sample_rate;
        let channels = self.channels;

        let stream = self.device.build_input_stream(
            &self.config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let mono = downmix_to_mono(data, channels);
                let converted = resample(&mono, native_rate, target_rate);
                // Ignore send errors; the receiver may have been dropped.
                let _ = tx.send(f32_to_pcm16_bytes(&converted));
            },
            |err: cpal::StreamError| {
                log::error!("audio: cpal stream error: {err}");
            },
            None, // no timeout
        )?;

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    /// Native sample rate of the capture stream in Hz.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of interleaved channels delivered by the device.
    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// AudioSource trait
// ---------------------------------------------------------------------------

/// Capability interface of the audio capture pipeline.
///
/// # Contract
///
/// * `start` acquires the microphone and begins delivering wire-format PCM
///   chunks to `chunks` at the cadence of the device buffer.  Acquisition
///   failure is a reported, non-fatal error.
/// * `stop` halts delivery and releases the device.  After it resolves, no
///   further chunk arrives.
#[async_trait]
pub trait AudioSource: Send + Sync {
    async fn start(
        &mut self,
        chunks: tokio::sync::mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CaptureError>;

    async fn stop(&mut self);
}

// Compile-time assertion: Box<dyn AudioSource> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn AudioSource>) {}
};

// ---------------------------------------------------------------------------
// MicCapture
// ---------------------------------------------------------------------------

struct CaptureWorker {
    stop_tx: mpsc::Sender<()>,
    thread: std::thread::JoinHandle<()>,
}

/// Production [`AudioSource`] backed by [`AudioCapture`].
///
/// The cpal stream lives on a dedicated `mic-capture` thread which bridges
/// chunks from the audio callback into the tokio channel.  Stopping signals
/// the thread, joins it, and drops the stream handle on every exit path —
/// the microphone is always released.
pub struct MicCapture {
    device_name: Option<String>,
    target_rate: u32,
    worker: Option<CaptureWorker>,
}

impl MicCapture {
    pub fn new(device_name: Option<String>, target_rate: u32) -> Self {
        Self {
            device_name,
            target_rate,
            worker: None,
        }
    }
}

#[async_trait]
impl AudioSource for MicCapture {
    async fn start(
        &mut self,
        chunks: tokio::sync::mpsc::Sender<Vec<u8>>,
    ) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            // Already capturing; a second start is a no-op.
            return Ok(());
        }

        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let device_name = self.device_name.clone();
        let target_rate = self.target_rate;

        let thread = std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let capture = match AudioCapture::new(device_name.as_deref()) {
                    Ok(capture) => capture,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                log::info!(
                    "audio: capture started ({} Hz, {} ch -> {} Hz mono)",
                    capture.sample_rate(),
                    capture.channels(),
                    target_rate
                );

                let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>();
                let handle = match capture.start_pcm16(chunk_tx, target_rate) {
                    Ok(handle) => handle,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                let _ = ready_tx.send(Ok(()));

                bridge_chunks(stop_rx, chunk_rx, chunks);

                // Stop the hardware stream and release the microphone.
                drop(handle);
                log::debug!("audio: capture thread finished");
            })
            .map_err(|e| CaptureError::Thread(e.to_string()))?;

        match ready_rx.await {
            Ok(Ok(())) => {
                self.worker = Some(CaptureWorker { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = tokio::task::spawn_blocking(move || thread.join()).await;
                Err(e)
            }
            Err(_) => Err(CaptureError::Thread(
                "capture thread exited before startup completed".into(),
            )),
        }
    }

    async fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            // Joining guarantees no further chunk is forwarded once stop()
            // resolves.
            let _ = tokio::task::spawn_blocking(move || worker.thread.join()).await;
            log::info!("audio: capture stopped");
        }
    }
}

// ---------------------------------------------------------------------------
// Chunk bridge
// ---------------------------------------------------------------------------

/// Forward chunks from the cpal callback channel into the session channel.
///
/// Runs until a stop signal arrives or either side disconnects.  The stop
/// signal is checked before every receive, so once it has been sent no
/// further chunk is forwarded.
fn bridge_chunks(
    stop_rx: mpsc::Receiver<()>,
    chunk_rx: mpsc::Receiver<Vec<u8>>,
    chunks: tokio::sync::mpsc::Sender<Vec<u8>>,
) {
    loop {
        if stop_rx.try_recv().is_ok() {
            break;
        }
        match chunk_rx.recv_timeout(Duration::from_millis(50)) {
            Ok(bytes) => {
                if chunks.blocking_send(bytes).is_err() {
                    break;
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
