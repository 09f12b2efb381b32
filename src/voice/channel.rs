//! Duplex realtime voice channel over a persistent websocket.
//!
//! [`VoiceChannel`] is the capability interface the orchestrator holds;
//! [`RealtimeVoiceChannel`] is the production implementation built on
//! `tokio-tungstenite`.
//!
//! # Lifecycle
//!
//! `open()` connects the socket and spawns one socket task that owns both
//! halves of the stream.  Outbound [`ClientEvent`]s travel over an unbounded
//! command queue so `send_audio` can be called from the cpal-paced capture
//! path without awaiting; inbound frames are parsed into [`ServerEvent`]s
//! and forwarded to the session event queue as [`VoiceEvent`]s.  Dropping
//! the command queue (via `close()`) makes the task send a Close frame and
//! exit.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;

use crate::config::VoiceConfig;
use crate::voice::events::{ClientEvent, ServerEvent, VoiceEvent};

// ---------------------------------------------------------------------------
// VoiceError
// ---------------------------------------------------------------------------

/// Errors surfaced by the voice channel.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// The configured endpoint is not a valid websocket URL.
    #[error("invalid voice endpoint: {0}")]
    InvalidEndpoint(String),

    /// The websocket handshake failed.
    #[error("failed to connect voice channel: {0}")]
    Connect(String),

    /// A command was issued while no session is open.
    #[error("voice channel is not open")]
    NotOpen,
}

// ---------------------------------------------------------------------------
// VoiceChannel trait
// ---------------------------------------------------------------------------

/// Capability interface of the duplex voice channel.
///
/// The outbound commands are synchronous (queue a frame, never block) so the
/// audio capture path stays real-time; only `open`/`close` suspend.
#[async_trait]
pub trait VoiceChannel: Send + Sync {
    /// Connect and start delivering [`VoiceEvent`]s to `events`.
    async fn open(&mut self, events: mpsc::Sender<VoiceEvent>) -> Result<(), VoiceError>;

    /// Queue one chunk of raw 16-bit little-endian PCM for upload.
    fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError>;

    /// Inject a text turn and request a response.
    fn send_text(&self, text: &str) -> Result<(), VoiceError>;

    /// Discard the server-side input audio buffer.
    fn clear_input_buffer(&self) -> Result<(), VoiceError>;

    /// Close the session.  Idempotent; a channel that was never opened is
    /// left untouched.
    async fn close(&mut self);
}

// Compile-time assertion: Box<dyn VoiceChannel> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn VoiceChannel>) {}
};

// ---------------------------------------------------------------------------
// RealtimeVoiceChannel
// ---------------------------------------------------------------------------

/// Production [`VoiceChannel`] backed by a `tokio-tungstenite` websocket.
pub struct RealtimeVoiceChannel {
    config: VoiceConfig,
    outbound: Option<mpsc::UnboundedSender<ClientEvent>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl RealtimeVoiceChannel {
    pub fn new(config: VoiceConfig) -> Self {
        Self {
            config,
            outbound: None,
            task: None,
        }
    }

    fn queue(&self, event: ClientEvent) -> Result<(), VoiceError> {
        let tx = self.outbound.as_ref().ok_or(VoiceError::NotOpen)?;
        tx.send(event).map_err(|_| VoiceError::NotOpen)
    }
}

#[async_trait]
impl VoiceChannel for RealtimeVoiceChannel {
    async fn open(&mut self, events: mpsc::Sender<VoiceEvent>) -> Result<(), VoiceError> {
        // Re-opening an already open channel tears the old session down
        // first so at most one socket task is alive.
        self.close().await;

        let mut request = self
            .config
            .endpoint
            .as_str()
            .into_client_request()
            .map_err(|e| VoiceError::InvalidEndpoint(e.to_string()))?;

        if let Some(key) = self.config.api_key.as_deref() {
            if !key.is_empty() {
                let value = format!("Bearer {key}")
                    .parse()
                    .map_err(|_| VoiceError::InvalidEndpoint("api key is not valid ASCII".into()))?;
                request.headers_mut().insert("Authorization", value);
            }
        }

        let (stream, _response) = tokio_tungstenite::connect_async(request)
            .await
            .map_err(|e| VoiceError::Connect(e.to_string()))?;

        log::info!("voice: connected to {}", self.config.endpoint);
        let _ = events.send(VoiceEvent::Opened).await;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientEvent>();
        let (mut write, mut read) = stream.split();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    cmd = outbound_rx.recv() => {
                        let Some(cmd) = cmd else {
                            // Channel owner dropped the queue — clean close.
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        };
                        let json = match serde_json::to_string(&cmd) {
                            Ok(json) => json,
                            Err(e) => {
                                log::error!("voice: failed to encode client event: {e}");
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(json)).await {
                            let _ = events.send(VoiceEvent::Error(e.to_string())).await;
                            let _ = events.send(VoiceEvent::Closed).await;
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                match serde_json::from_str::<ServerEvent>(&text) {
                                    Ok(event) => {
                                        let _ = events.send(event.into()).await;
                                    }
                                    Err(_) => {
                                        log::debug!("voice: ignoring unknown event: {text}");
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                let _ = events.send(VoiceEvent::Closed).await;
                                break;
                            }
                            Some(Ok(_)) => {
                                // Ping/pong/binary frames need no handling here.
                            }
                            Some(Err(e)) => {
                                let _ = events.send(VoiceEvent::Error(e.to_string())).await;
                                let _ = events.send(VoiceEvent::Closed).await;
                                break;
                            }
                        }
                    }
                }
            }
            log::debug!("voice: socket task finished");
        });

        self.outbound = Some(outbound_tx);
        self.task = Some(task);
        Ok(())
    }

    fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
        self.queue(ClientEvent::AppendAudio {
            audio: B64.encode(pcm),
        })
    }

    fn send_text(&self, text: &str) -> Result<(), VoiceError> {
        for event in ClientEvent::text_turn(text) {
            self.queue(event)?;
        }
        Ok(())
    }

    fn clear_input_buffer(&self) -> Result<(), VoiceError> {
        self.queue(ClientEvent::ClearBuffer)
    }

    async fn close(&mut self) {
        // Dropping the queue ends the socket task's outbound branch, which
        // sends a Close frame and exits.
        self.outbound = None;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn config_for(addr: std::net::SocketAddr) -> VoiceConfig {
        VoiceConfig {
            endpoint: format!("ws://{addr}"),
            api_key: None,
            sample_rate: 24_000,
        }
    }

    #[test]
    fn commands_before_open_return_not_open() {
        let channel = RealtimeVoiceChannel::new(VoiceConfig::default());
        assert!(matches!(channel.send_audio(b"pcm"), Err(VoiceError::NotOpen)));
        assert!(matches!(channel.send_text("hi"), Err(VoiceError::NotOpen)));
        assert!(matches!(
            channel.clear_input_buffer(),
            Err(VoiceError::NotOpen)
        ));
    }

    #[tokio::test]
    async fn open_fails_against_unreachable_endpoint() {
        let mut channel = RealtimeVoiceChannel::new(VoiceConfig {
            // Port 1 is never a websocket listener.
            endpoint: "ws://127.0.0.1:1".into(),
            ..VoiceConfig::default()
        });
        let (tx, _rx) = mpsc::channel(8);
        assert!(matches!(
            channel.open(tx).await,
            Err(VoiceError::Connect(_))
        ));
    }

    #[tokio::test]
    async fn text_turn_reaches_the_server_as_two_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut frames = Vec::new();
            for _ in 0..2 {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => frames.push(text),
                    other => panic!("expected text frame, got {other:?}"),
                }
            }
            frames
        });

        let mut channel = RealtimeVoiceChannel::new(config_for(addr));
        let (tx, mut rx) = mpsc::channel(8);
        channel.open(tx).await.unwrap();
        assert_eq!(rx.recv().await, Some(VoiceEvent::Opened));

        channel.send_text("hello there").unwrap();

        let frames = server.await.unwrap();
        let first: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&frames[1]).unwrap();
        assert_eq!(first["type"], "conversation.item.create");
        assert_eq!(first["item"]["content"][0]["text"], "hello there");
        assert_eq!(second["type"], "response.create");

        channel.close().await;
    }

    #[tokio::test]
    async fn server_events_are_forwarded_as_voice_events() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(
                r#"{"type":"input_audio_buffer.speech_started"}"#.into(),
            ))
            .await
            .unwrap();
            ws.send(Message::Text(
                r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"what is X"}"#.into(),
            ))
            .await
            .unwrap();
            // Unknown event types must be skipped silently.
            ws.send(Message::Text(r#"{"type":"session.updated"}"#.into()))
                .await
                .unwrap();
            ws.send(Message::Close(None)).await.unwrap();
            // Keep the socket alive until the close handshake completes.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let mut channel = RealtimeVoiceChannel::new(config_for(addr));
        let (tx, mut rx) = mpsc::channel(8);
        channel.open(tx).await.unwrap();

        assert_eq!(rx.recv().await, Some(VoiceEvent::Opened));
        assert_eq!(rx.recv().await, Some(VoiceEvent::SpeechStarted));
        assert_eq!(
            rx.recv().await,
            Some(VoiceEvent::TranscriptionCompleted("what is X".into()))
        );
        // The unknown event is dropped; the close frame comes through next.
        assert_eq!(rx.recv().await, Some(VoiceEvent::Closed));

        channel.close().await;
    }

    #[tokio::test]
    async fn audio_is_base64_encoded_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            match ws.next().await {
                Some(Ok(Message::Text(text))) => text,
                other => panic!("expected text frame, got {other:?}"),
            }
        });

        let mut channel = RealtimeVoiceChannel::new(config_for(addr));
        let (tx, _rx) = mpsc::channel(8);
        channel.open(tx).await.unwrap();

        channel.send_audio(&[0x01, 0x02, 0x03, 0x04]).unwrap();

        let frame = server.await.unwrap();
        let json: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(json["type"], "input_audio_buffer.append");
        assert_eq!(json["audio"], B64.encode([0x01, 0x02, 0x03, 0x04]));

        channel.close().await;
    }
}
