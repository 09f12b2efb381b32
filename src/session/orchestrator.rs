//! Session orchestrator — the single writer of session state.
//!
//! All stimuli (user actions, microphone chunks, voice events, text events)
//! arrive on one [`SessionEvent`] queue and are handled strictly in order by
//! [`SessionOrchestrator::run`].  Because the loop finishes each transition
//! before taking the next event, interleaved toggles and in-flight sends are
//! serialized by construction: the most recent toggle is always the one
//! whose effect lands last.
//!
//! # Voice turn state machine
//!
//! ```text
//! Idle ──speech_started──▶ SpeechDetected    (stop playback, "transcribing")
//!      ──transcription.completed──▶ Transcribed
//!                                  (resolve placeholder, add "bot-thinking")
//!      ──response.audio.delta*──▶ Responding  (queue playback while recording)
//!      ──tool_response──▶ ToolResult
//!                         (drop "bot-thinking", grounding files, bot message)
//! any ──error──▶ reported, session continues
//! any ──close──▶ Idle; next toggle re-opens the channel
//! ```
//!
//! The channels and audio pipelines are injected as capability traits so the
//! whole state machine is testable with mocks.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::audio::{decode_base64_pcm16, AudioSink, AudioSource};
use crate::session::events::SessionEvent;
use crate::session::message::{Message, Sender, BOT_THINKING_ID, TRANSCRIBING_ID};
use crate::session::state::SharedSessionState;
use crate::text::{TextChannel, TextEvent, TextMessage};
use crate::voice::{ToolResult, VoiceChannel, VoiceEvent};

/// Display text of the transcription placeholder.
const TRANSCRIBING_TEXT: &str = "Transcribing...";
/// Display text of the response placeholder.
const BOT_THINKING_TEXT: &str = "Bot is thinking...";

// ---------------------------------------------------------------------------
// SessionOrchestrator
// ---------------------------------------------------------------------------

/// Owns channel selection, transcript assembly and grounding accumulation.
///
/// Create with [`SessionOrchestrator::new`], then call
/// [`run`](Self::run) inside a tokio task.
pub struct SessionOrchestrator {
    state: SharedSessionState,
    voice: Box<dyn VoiceChannel>,
    text: Box<dyn TextChannel>,
    capture: Box<dyn AudioSource>,
    playback: Arc<dyn AudioSink>,
    /// Used to spawn forwarders that funnel channel events into the queue.
    events_tx: mpsc::Sender<SessionEvent>,
    /// Last message list received from the text channel, re-applied when the
    /// text channel becomes authoritative again.
    text_snapshot: Vec<TextMessage>,
}

impl SessionOrchestrator {
    pub fn new(
        state: SharedSessionState,
        voice: Box<dyn VoiceChannel>,
        text: Box<dyn TextChannel>,
        capture: Box<dyn AudioSource>,
        playback: Arc<dyn AudioSink>,
        events_tx: mpsc::Sender<SessionEvent>,
    ) -> Self {
        Self {
            state,
            voice,
            text,
            capture,
            playback,
            events_tx,
            text_snapshot: Vec::new(),
        }
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    /// Run the orchestrator until a [`SessionEvent::Shutdown`] arrives.
    ///
    /// Opens the text channel first so its connection state starts flowing,
    /// then handles events strictly in order.
    pub async fn run(mut self, mut events_rx: mpsc::Receiver<SessionEvent>) {
        self.connect_text().await;

        while let Some(event) = events_rx.recv().await {
            match event {
                SessionEvent::ToggleRecording => self.handle_toggle().await,
                SessionEvent::UserInput(text) => self.handle_user_input(text).await,
                SessionEvent::CaptureAudio(chunk) => self.handle_capture_audio(chunk),
                SessionEvent::Voice(event) => self.handle_voice(event).await,
                SessionEvent::Text(event) => self.handle_text(event),
                SessionEvent::Shutdown => break,
            }
        }

        // Tear everything down on the way out.
        self.capture.stop().await;
        self.playback.stop();
        self.voice.close().await;
        log::info!("session: orchestrator shut down");
    }

    /// Open the text channel and start funneling its events into the queue.
    async fn connect_text(&mut self) {
        let (text_tx, mut text_rx) = mpsc::channel::<TextEvent>(32);
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = text_rx.recv().await {
                if forward.send(SessionEvent::Text(event)).await.is_err() {
                    break;
                }
            }
        });

        if let Err(e) = self.text.open(text_tx).await {
            log::warn!("session: text channel unavailable: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Recording mode
    // -----------------------------------------------------------------------

    async fn handle_toggle(&mut self) {
        let recording = self.state.lock().unwrap().recording;
        if recording {
            self.stop_recording().await;
        } else {
            self.start_recording().await;
        }
    }

    /// Enter recording mode: open the voice session, start capture, reset
    /// playback.  Any failure is reported and leaves recording unset.
    async fn start_recording(&mut self) {
        let (voice_tx, mut voice_rx) = mpsc::channel::<VoiceEvent>(64);
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = voice_rx.recv().await {
                if forward.send(SessionEvent::Voice(event)).await.is_err() {
                    break;
                }
            }
        });

        if let Err(e) = self.voice.open(voice_tx).await {
            log::error!("session: failed to open voice channel: {e}");
            let mut st = self.state.lock().unwrap();
            st.voice_error = Some(e.to_string());
            st.refresh_session_error();
            return;
        }

        let (chunk_tx, mut chunk_rx) = mpsc::channel::<Vec<u8>>(64);
        let forward = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(chunk) = chunk_rx.recv().await {
                if forward.send(SessionEvent::CaptureAudio(chunk)).await.is_err() {
                    break;
                }
            }
        });

        if let Err(e) = self.capture.start(chunk_tx).await {
            // Microphone acquisition failure is non-fatal; recording stays
            // off and the channel is closed again so nothing leaks.
            log::error!("session: failed to start audio capture: {e}");
            self.voice.close().await;
            let mut st = self.state.lock().unwrap();
            st.voice_error = Some(e.to_string());
            st.refresh_session_error();
            return;
        }

        self.playback.reset();

        let mut st = self.state.lock().unwrap();
        st.recording = true;
        st.voice_error = None;
        st.refresh_session_error();
        log::info!("session: recording on");
    }

    /// Leave recording mode: drain capture, discard playback, clear the
    /// server-side input buffer.  The voice socket itself stays open for the
    /// next toggle.
    async fn stop_recording(&mut self) {
        self.capture.stop().await;
        self.playback.stop();
        if let Err(e) = self.voice.clear_input_buffer() {
            log::debug!("session: input buffer clear skipped: {e}");
        }

        let projected = self.projected_snapshot();
        let mut st = self.state.lock().unwrap();
        st.recording = false;
        // The text channel is authoritative again: its projection replaces
        // the voice transcript, shedding any live placeholder.
        st.transcript.replace_all(projected);
        log::info!("session: recording off");
    }

    // -----------------------------------------------------------------------
    // User input
    // -----------------------------------------------------------------------

    async fn handle_user_input(&mut self, text: String) {
        let text = text.trim();
        if text.is_empty() {
            // Empty after trimming: no transcript change, no channel call.
            return;
        }

        let recording = self.state.lock().unwrap().recording;
        if recording {
            self.send_via_voice(text);
        } else {
            self.send_via_text(text).await;
        }
    }

    fn send_via_voice(&mut self, text: &str) {
        {
            let mut st = self.state.lock().unwrap();
            let id = st.next_user_id();
            st.transcript.push(Message::new(id, Sender::User, text));
            st.transcript
                .push_placeholder(BOT_THINKING_ID, Sender::Bot, BOT_THINKING_TEXT);
        }

        if let Err(e) = self.voice.send_text(text) {
            log::error!("session: voice text injection failed: {e}");
            let mut st = self.state.lock().unwrap();
            st.transcript.remove(BOT_THINKING_ID);
            st.voice_error = Some(e.to_string());
            st.refresh_session_error();
        }
    }

    async fn send_via_text(&mut self, text: &str) {
        let connected = self.state.lock().unwrap().text_state.connected;
        if !connected {
            self.state.lock().unwrap().session_error =
                Some("Not connected to text channel. Please try again.".into());
            return;
        }

        if let Err(e) = self.text.send_message(text).await {
            log::error!("session: text send failed: {e}");
            let mut st = self.state.lock().unwrap();
            st.transcript.remove(BOT_THINKING_ID);
            st.session_error = Some("Failed to send message. Please try again.".into());
        }
        // The user's message reaches the transcript through the channel's
        // own echo in the next snapshot — no locally synthesized duplicate.
    }

    // -----------------------------------------------------------------------
    // Capture audio
    // -----------------------------------------------------------------------

    fn handle_capture_audio(&mut self, chunk: Vec<u8>) {
        // A chunk may still be queued behind the stop transition; recording
        // has been cleared by then, so it is dropped here.
        if !self.state.lock().unwrap().recording {
            return;
        }
        if let Err(e) = self.voice.send_audio(&chunk) {
            log::debug!("session: dropped capture chunk: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Voice events
    // -----------------------------------------------------------------------

    async fn handle_voice(&mut self, event: VoiceEvent) {
        match event {
            VoiceEvent::Opened => {
                log::info!("session: voice channel open");
            }

            VoiceEvent::Closed => {
                // Capture and playback are not restarted automatically; the
                // next toggle re-opens the channel.
                log::info!("session: voice channel closed");
                let recording = self.state.lock().unwrap().recording;
                if recording {
                    self.capture.stop().await;
                    self.playback.stop();
                    let projected = self.projected_snapshot();
                    let mut st = self.state.lock().unwrap();
                    st.recording = false;
                    st.transcript.replace_all(projected);
                }
            }

            VoiceEvent::Error(message) => {
                log::error!("session: voice channel error: {message}");
                let mut st = self.state.lock().unwrap();
                st.voice_error = Some(message);
                st.refresh_session_error();
            }

            VoiceEvent::SpeechStarted => {
                // Barge-in: anything still playing is stale now.
                self.playback.stop();
                let mut st = self.state.lock().unwrap();
                // A bot-thinking placeholder left over from a turn that
                // never produced a tool response is cleared here, at the
                // start of the next turn.
                st.transcript.remove(BOT_THINKING_ID);
                st.transcript
                    .push_placeholder(TRANSCRIBING_ID, Sender::User, TRANSCRIBING_TEXT);
            }

            VoiceEvent::TranscriptionCompleted(transcript) => {
                let mut st = self.state.lock().unwrap();
                if st.transcript.set_content(TRANSCRIBING_ID, &transcript) {
                    st.transcript
                        .push_placeholder(BOT_THINKING_ID, Sender::Bot, BOT_THINKING_TEXT);
                } else {
                    // Out-of-order event with no live placeholder: no-op,
                    // not an insertion.
                    log::debug!("session: dropped out-of-order transcription");
                }
            }

            VoiceEvent::AudioDelta(delta) => {
                if !self.state.lock().unwrap().recording {
                    // Recording was turned off mid-response; deltas are
                    // dropped silently.
                    return;
                }
                match decode_base64_pcm16(&delta) {
                    Ok(pcm) => self.playback.push(&pcm),
                    Err(e) => {
                        log::error!("session: undecodable audio delta: {e}");
                        let mut st = self.state.lock().unwrap();
                        st.voice_error = Some(e.to_string());
                        st.refresh_session_error();
                    }
                }
            }

            VoiceEvent::ToolResponse(raw) => self.handle_tool_response(&raw),
        }
    }

    /// Apply a tool response: placeholder cleanup happens unconditionally,
    /// then the payload is parsed.  A malformed payload is reported and the
    /// turn ends; the session continues.
    fn handle_tool_response(&mut self, raw: &str) {
        let mut st = self.state.lock().unwrap();
        st.transcript.remove(BOT_THINKING_ID);

        let result = match ToolResult::parse(raw) {
            Ok(result) => result,
            Err(e) => {
                log::error!("session: malformed tool response: {e}");
                st.voice_error = Some(format!("malformed tool response: {e}"));
                st.refresh_session_error();
                return;
            }
        };

        st.grounding
            .extend(result.sources.iter().map(|source| {
                crate::session::grounding::GroundingFile {
                    id: source.chunk_id.clone(),
                    name: source.title.clone(),
                    content: source.chunk.clone(),
                }
            }));

        if !result.sources.is_empty() {
            let content = result
                .sources
                .iter()
                .map(|source| source.chunk.as_str())
                .collect::<Vec<_>>()
                .join("\n\n");
            let id = st.next_bot_id();
            st.transcript.push(Message::new(id, Sender::Bot, content));
        }
    }

    // -----------------------------------------------------------------------
    // Text events
    // -----------------------------------------------------------------------

    fn handle_text(&mut self, event: TextEvent) {
        match event {
            TextEvent::Connection(connection) => {
                // Recomputed regardless of recording mode: a text-channel
                // disconnect is visible while in voice mode but does not
                // interrupt it.
                let mut st = self.state.lock().unwrap();
                st.text_state = connection;
                st.refresh_session_error();
            }

            TextEvent::Messages(messages) => {
                // Cached even in voice mode so the projection is available
                // the moment recording ends.
                self.text_snapshot = messages;
                let projected = self.projected_snapshot();
                let mut st = self.state.lock().unwrap();
                if !st.recording {
                    st.transcript.replace_all(projected);
                }
            }

            TextEvent::Typing(true) => {
                let mut st = self.state.lock().unwrap();
                st.transcript
                    .push_placeholder(BOT_THINKING_ID, Sender::Bot, BOT_THINKING_TEXT);
            }

            TextEvent::Typing(false) => {
                let mut st = self.state.lock().unwrap();
                st.transcript.remove(BOT_THINKING_ID);
            }
        }
    }

    /// Project the cached text-channel snapshot onto transcript messages.
    fn projected_snapshot(&self) -> Vec<Message> {
        self.text_snapshot
            .iter()
            .cloned()
            .map(project_text_message)
            .collect()
    }
}

/// Project a text-channel message onto a transcript [`Message`]: the wire
/// sender `"user"` maps to [`Sender::User`], anything else to
/// [`Sender::Bot`].
fn project_text_message(message: TextMessage) -> Message {
    let sender = if message.sender == "user" {
        Sender::User
    } else {
        Sender::Bot
    };
    Message::new(message.id, sender, message.text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine as _;

    use crate::session::state::new_shared_state;
    use crate::text::{ConnectionState, TextError};
    use crate::voice::VoiceError;

    // -----------------------------------------------------------------------
    // Test doubles
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct VoiceLog {
        opens: usize,
        closes: usize,
        sent_texts: Vec<String>,
        sent_audio: Vec<Vec<u8>>,
        buffer_clears: usize,
    }

    /// Mock voice channel that records every call.
    struct MockVoice {
        log: Arc<Mutex<VoiceLog>>,
        fail_open: bool,
    }

    #[async_trait]
    impl VoiceChannel for MockVoice {
        async fn open(&mut self, _events: mpsc::Sender<VoiceEvent>) -> Result<(), VoiceError> {
            if self.fail_open {
                return Err(VoiceError::Connect("refused".into()));
            }
            self.log.lock().unwrap().opens += 1;
            Ok(())
        }

        fn send_audio(&self, pcm: &[u8]) -> Result<(), VoiceError> {
            self.log.lock().unwrap().sent_audio.push(pcm.to_vec());
            Ok(())
        }

        fn send_text(&self, text: &str) -> Result<(), VoiceError> {
            self.log.lock().unwrap().sent_texts.push(text.to_string());
            Ok(())
        }

        fn clear_input_buffer(&self) -> Result<(), VoiceError> {
            self.log.lock().unwrap().buffer_clears += 1;
            Ok(())
        }

        async fn close(&mut self) {
            self.log.lock().unwrap().closes += 1;
        }
    }

    #[derive(Default)]
    struct TextLog {
        sent: Vec<String>,
    }

    /// Mock text channel with a configurable send result.
    struct MockText {
        log: Arc<Mutex<TextLog>>,
        fail_send: bool,
    }

    #[async_trait]
    impl TextChannel for MockText {
        async fn open(&mut self, _events: mpsc::Sender<TextEvent>) -> Result<(), TextError> {
            Ok(())
        }

        async fn send_message(&self, text: &str) -> Result<(), TextError> {
            if self.fail_send {
                return Err(TextError::Rejected("503".into()));
            }
            self.log.lock().unwrap().sent.push(text.to_string());
            Ok(())
        }
    }

    #[derive(Default)]
    struct CaptureLog {
        starts: usize,
        stops: usize,
    }

    /// Mock capture pipeline; optionally fails to acquire the microphone.
    struct MockCapture {
        log: Arc<Mutex<CaptureLog>>,
        fail_start: bool,
    }

    #[async_trait]
    impl AudioSource for MockCapture {
        async fn start(
            &mut self,
            _chunks: mpsc::Sender<Vec<u8>>,
        ) -> Result<(), crate::audio::CaptureError> {
            if self.fail_start {
                return Err(crate::audio::CaptureError::NoDevice);
            }
            self.log.lock().unwrap().starts += 1;
            Ok(())
        }

        async fn stop(&mut self) {
            self.log.lock().unwrap().stops += 1;
        }
    }

    #[derive(Default)]
    struct SinkLog {
        pushed: Vec<Vec<i16>>,
        stops: usize,
        resets: usize,
    }

    /// Mock playback sink recording pushed chunks in arrival order.
    struct MockSink {
        log: Arc<Mutex<SinkLog>>,
    }

    impl AudioSink for MockSink {
        fn push(&self, pcm: &[i16]) {
            self.log.lock().unwrap().pushed.push(pcm.to_vec());
        }

        fn stop(&self) {
            self.log.lock().unwrap().stops += 1;
        }

        fn reset(&self) {
            self.log.lock().unwrap().resets += 1;
        }
    }

    // -----------------------------------------------------------------------
    // Harness
    // -----------------------------------------------------------------------

    struct Harness {
        state: SharedSessionState,
        voice_log: Arc<Mutex<VoiceLog>>,
        text_log: Arc<Mutex<TextLog>>,
        capture_log: Arc<Mutex<CaptureLog>>,
        sink_log: Arc<Mutex<SinkLog>>,
        tx: mpsc::Sender<SessionEvent>,
        orchestrator: SessionOrchestrator,
        rx: mpsc::Receiver<SessionEvent>,
    }

    fn harness() -> Harness {
        harness_with(false, false, false)
    }

    fn harness_with(fail_voice_open: bool, fail_capture: bool, fail_text_send: bool) -> Harness {
        let state = new_shared_state();
        let voice_log = Arc::new(Mutex::new(VoiceLog::default()));
        let text_log = Arc::new(Mutex::new(TextLog::default()));
        let capture_log = Arc::new(Mutex::new(CaptureLog::default()));
        let sink_log = Arc::new(Mutex::new(SinkLog::default()));

        let (tx, rx) = mpsc::channel(64);

        let orchestrator = SessionOrchestrator::new(
            Arc::clone(&state),
            Box::new(MockVoice {
                log: Arc::clone(&voice_log),
                fail_open: fail_voice_open,
            }),
            Box::new(MockText {
                log: Arc::clone(&text_log),
                fail_send: fail_text_send,
            }),
            Box::new(MockCapture {
                log: Arc::clone(&capture_log),
                fail_start: fail_capture,
            }),
            Arc::new(MockSink {
                log: Arc::clone(&sink_log),
            }),
            tx.clone(),
        );

        Harness {
            state,
            voice_log,
            text_log,
            capture_log,
            sink_log,
            tx,
            orchestrator,
            rx,
        }
    }

    impl Harness {
        /// Feed `events`, then a shutdown, and run the loop to completion.
        async fn drive(self, events: Vec<SessionEvent>) -> DrivenHarness {
            for event in events {
                self.tx.send(event).await.unwrap();
            }
            self.tx.send(SessionEvent::Shutdown).await.unwrap();
            self.orchestrator.run(self.rx).await;

            DrivenHarness {
                state: self.state,
                voice_log: self.voice_log,
                text_log: self.text_log,
                capture_log: self.capture_log,
                sink_log: self.sink_log,
            }
        }
    }

    struct DrivenHarness {
        state: SharedSessionState,
        voice_log: Arc<Mutex<VoiceLog>>,
        text_log: Arc<Mutex<TextLog>>,
        capture_log: Arc<Mutex<CaptureLog>>,
        sink_log: Arc<Mutex<SinkLog>>,
    }

    fn connected() -> TextEvent {
        TextEvent::Connection(ConnectionState {
            connected: true,
            loading: false,
            error: None,
        })
    }

    fn tool_response(json: &str) -> SessionEvent {
        SessionEvent::Voice(VoiceEvent::ToolResponse(json.to_string()))
    }

    // -----------------------------------------------------------------------
    // Recording mode
    // -----------------------------------------------------------------------

    /// Recording mode after settling equals the parity of the toggle count.
    #[tokio::test]
    async fn toggle_parity_odd_is_on_even_is_off() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::ToggleRecording,
                SessionEvent::ToggleRecording,
            ])
            .await;

        assert!(driven.state.lock().unwrap().recording);

        let h = harness();
        let driven = h
            .drive(vec![SessionEvent::ToggleRecording, SessionEvent::ToggleRecording])
            .await;
        assert!(!driven.state.lock().unwrap().recording);
    }

    #[tokio::test]
    async fn entering_recording_opens_voice_starts_capture_resets_playback() {
        let h = harness();
        let driven = h.drive(vec![SessionEvent::ToggleRecording]).await;

        assert_eq!(driven.voice_log.lock().unwrap().opens, 1);
        assert_eq!(driven.capture_log.lock().unwrap().starts, 1);
        assert_eq!(driven.sink_log.lock().unwrap().resets, 1);
    }

    #[tokio::test]
    async fn leaving_recording_stops_capture_playback_and_clears_buffer() {
        let h = harness();
        let driven = h
            .drive(vec![SessionEvent::ToggleRecording, SessionEvent::ToggleRecording])
            .await;

        let capture = driven.capture_log.lock().unwrap();
        // One explicit stop on toggle, one defensive stop at shutdown.
        assert!(capture.stops >= 1);
        assert!(driven.sink_log.lock().unwrap().stops >= 1);
        assert_eq!(driven.voice_log.lock().unwrap().buffer_clears, 1);
    }

    #[tokio::test]
    async fn microphone_failure_leaves_recording_unset_and_reports() {
        let h = harness_with(false, true, false);
        let driven = h.drive(vec![SessionEvent::ToggleRecording]).await;

        let st = driven.state.lock().unwrap();
        assert!(!st.recording);
        assert!(st.voice_error.is_some());
        // The freshly opened channel is closed again so nothing leaks.
        drop(st);
        assert_eq!(driven.voice_log.lock().unwrap().closes, 2); // toggle + shutdown
    }

    #[tokio::test]
    async fn voice_open_failure_leaves_recording_unset() {
        let h = harness_with(true, false, false);
        let driven = h.drive(vec![SessionEvent::ToggleRecording]).await;

        let st = driven.state.lock().unwrap();
        assert!(!st.recording);
        assert!(st.voice_error.is_some());
        assert_eq!(driven.capture_log.lock().unwrap().starts, 0);
    }

    #[tokio::test]
    async fn socket_close_while_recording_returns_to_idle() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::Closed),
            ])
            .await;

        assert!(!driven.state.lock().unwrap().recording);
        assert!(driven.capture_log.lock().unwrap().stops >= 1);
    }

    // -----------------------------------------------------------------------
    // User input
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn empty_and_whitespace_input_is_a_noop() {
        let h = harness();
        let driven = h
            .drive(vec![
                connected().into_session(),
                SessionEvent::UserInput("".into()),
                SessionEvent::UserInput("   \t  ".into()),
            ])
            .await;

        assert!(driven.state.lock().unwrap().transcript.is_empty());
        assert!(driven.text_log.lock().unwrap().sent.is_empty());
        assert!(driven.voice_log.lock().unwrap().sent_texts.is_empty());
    }

    #[tokio::test]
    async fn voice_mode_input_appends_user_message_and_placeholder() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::UserInput("what is X".into()),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        let messages = st.transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].sender, Sender::User);
        assert_eq!(messages[0].content, "what is X");
        assert_eq!(messages[1].id, BOT_THINKING_ID);
        drop(st);

        assert_eq!(
            driven.voice_log.lock().unwrap().sent_texts,
            vec!["what is X".to_string()]
        );
    }

    #[tokio::test]
    async fn text_mode_input_requires_connection() {
        let h = harness();
        // Text channel never reported connected.
        let driven = h.drive(vec![SessionEvent::UserInput("hello".into())]).await;

        let st = driven.state.lock().unwrap();
        assert!(st.session_error.as_deref().unwrap().contains("Not connected"));
        drop(st);
        assert!(driven.text_log.lock().unwrap().sent.is_empty());
    }

    /// The transcript entry for a text-mode send comes from the channel's
    /// own echo, not from a locally synthesized duplicate.
    #[tokio::test]
    async fn text_mode_input_is_sent_and_echoed_via_snapshot() {
        let h = harness();
        let driven = h
            .drive(vec![
                connected().into_session(),
                SessionEvent::UserInput("hello".into()),
                SessionEvent::Text(TextEvent::Messages(vec![TextMessage {
                    id: "c|0".into(),
                    sender: "user".into(),
                    text: "hello".into(),
                }])),
            ])
            .await;

        assert_eq!(driven.text_log.lock().unwrap().sent, vec!["hello".to_string()]);

        let st = driven.state.lock().unwrap();
        assert_eq!(st.transcript.len(), 1);
        let message = &st.transcript.messages()[0];
        assert_eq!(message.sender, Sender::User);
        assert_eq!(message.content, "hello");
        assert_eq!(message.id, "c|0");
    }

    #[tokio::test]
    async fn text_send_failure_sets_error_and_drops_placeholder() {
        let h = harness_with(false, false, true);
        let driven = h
            .drive(vec![
                connected().into_session(),
                SessionEvent::Text(TextEvent::Typing(true)),
                SessionEvent::UserInput("hello".into()),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(st
            .session_error
            .as_deref()
            .unwrap()
            .contains("Failed to send"));
        assert!(!st.transcript.contains(BOT_THINKING_ID));
    }

    // -----------------------------------------------------------------------
    // Voice turn state machine
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn speech_started_stops_playback_and_adds_transcribing() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(st.transcript.contains(TRANSCRIBING_ID));
        drop(st);
        assert!(driven.sink_log.lock().unwrap().stops >= 1);
    }

    #[tokio::test]
    async fn speech_started_clears_stale_bot_thinking() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                // A previous turn that never produced a tool response.
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("first".into())),
                // Next turn begins; the stale placeholder must go.
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.transcript.contains(BOT_THINKING_ID));
        assert_eq!(st.transcript.last().unwrap().id, TRANSCRIBING_ID);
    }

    #[tokio::test]
    async fn transcription_resolves_placeholder_in_place() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("what is X".into())),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        let messages = st.transcript.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, TRANSCRIBING_ID);
        assert_eq!(messages[0].content, "what is X");
        assert_eq!(messages[1].id, BOT_THINKING_ID);
    }

    /// Out-of-order transcription with no live placeholder is a no-op.
    #[tokio::test]
    async fn orphan_transcription_is_not_an_insertion() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("late".into())),
            ])
            .await;

        assert!(driven.state.lock().unwrap().transcript.is_empty());
    }

    #[tokio::test]
    async fn duplicate_typing_true_yields_one_placeholder() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::Text(TextEvent::Typing(true)),
                SessionEvent::Text(TextEvent::Typing(true)),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        let count = st
            .transcript
            .messages()
            .iter()
            .filter(|m| m.id == BOT_THINKING_ID)
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn typing_false_removes_placeholder() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::Text(TextEvent::Typing(true)),
                SessionEvent::Text(TextEvent::Typing(false)),
            ])
            .await;

        assert!(driven.state.lock().unwrap().transcript.is_empty());
    }

    // -----------------------------------------------------------------------
    // Audio deltas
    // -----------------------------------------------------------------------

    fn delta(samples: &[i16]) -> SessionEvent {
        let mut bytes = Vec::new();
        for s in samples {
            bytes.extend_from_slice(&s.to_le_bytes());
        }
        SessionEvent::Voice(VoiceEvent::AudioDelta(B64.encode(bytes)))
    }

    #[tokio::test]
    async fn deltas_play_in_arrival_order_while_recording() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                delta(&[1, 2]),
                delta(&[3, 4]),
            ])
            .await;

        let sink = driven.sink_log.lock().unwrap();
        assert_eq!(sink.pushed, vec![vec![1, 2], vec![3, 4]]);
    }

    #[tokio::test]
    async fn deltas_are_dropped_silently_when_not_recording() {
        let h = harness();
        let driven = h.drive(vec![delta(&[1, 2])]).await;

        let driven_sink = driven.sink_log.lock().unwrap();
        assert!(driven_sink.pushed.is_empty());
        drop(driven_sink);
        // Silent drop: no error either.
        assert!(driven.state.lock().unwrap().voice_error.is_none());
    }

    #[tokio::test]
    async fn undecodable_delta_reports_an_error() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::AudioDelta("!!bad-base64!!".into())),
            ])
            .await;

        assert!(driven.state.lock().unwrap().voice_error.is_some());
        assert!(driven.sink_log.lock().unwrap().pushed.is_empty());
    }

    #[tokio::test]
    async fn capture_chunks_are_forwarded_only_while_recording() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::CaptureAudio(vec![9, 9]), // before recording
                SessionEvent::ToggleRecording,
                SessionEvent::CaptureAudio(vec![1, 2]),
            ])
            .await;

        assert_eq!(driven.voice_log.lock().unwrap().sent_audio, vec![vec![1, 2]]);
    }

    // -----------------------------------------------------------------------
    // Tool responses and grounding files
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn tool_response_appends_sources_and_bot_message() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("what is X".into())),
                tool_response(
                    r#"{"sources":[{"chunk_id":"a1","title":"Doc A","chunk":"X is ..."}]}"#,
                ),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.transcript.contains(BOT_THINKING_ID));

        let last = st.transcript.last().unwrap();
        assert_eq!(last.sender, Sender::Bot);
        assert_eq!(last.content, "X is ...");

        let file = st.grounding.get("a1").unwrap();
        assert_eq!(file.name, "Doc A");
        assert_eq!(file.content, "X is ...");
    }

    #[tokio::test]
    async fn tool_response_joins_multiple_chunks_with_blank_line() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                tool_response(
                    r#"{"sources":[
                        {"chunk_id":"a","title":"A","chunk":"first"},
                        {"chunk_id":"b","title":"B","chunk":"second"}
                    ]}"#,
                ),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert_eq!(st.transcript.last().unwrap().content, "first\n\nsecond");
    }

    #[tokio::test]
    async fn tool_response_with_no_sources_only_cleans_up() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("hi".into())),
                tool_response(r#"{"sources":[]}"#),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.transcript.contains(BOT_THINKING_ID));
        // Only the resolved user transcript remains; no bot message added.
        assert_eq!(st.transcript.len(), 1);
        assert_eq!(st.grounding.len(), 0);
    }

    #[tokio::test]
    async fn malformed_tool_response_reports_and_still_cleans_up() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::TranscriptionCompleted("hi".into())),
                tool_response("not json at all"),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.transcript.contains(BOT_THINKING_ID));
        assert!(st
            .voice_error
            .as_deref()
            .unwrap()
            .contains("malformed tool response"));
    }

    /// Store size after N responses equals the sum of source-list lengths,
    /// duplicates included.
    #[tokio::test]
    async fn grounding_store_counts_duplicates() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                tool_response(
                    r#"{"sources":[
                        {"chunk_id":"a","title":"A","chunk":"1"},
                        {"chunk_id":"b","title":"B","chunk":"2"}
                    ]}"#,
                ),
                tool_response(r#"{"sources":[{"chunk_id":"a","title":"A","chunk":"1"}]}"#),
            ])
            .await;

        assert_eq!(driven.state.lock().unwrap().grounding.len(), 3);
    }

    // -----------------------------------------------------------------------
    // Connection state
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn text_disconnect_is_visible_even_in_voice_mode() {
        let h = harness();
        let driven = h
            .drive(vec![
                connected().into_session(),
                SessionEvent::ToggleRecording,
                SessionEvent::Text(TextEvent::Connection(ConnectionState {
                    connected: false,
                    loading: false,
                    error: None,
                })),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        // Error is visible, voice interaction is not interrupted.
        assert!(st.session_error.as_deref().unwrap().contains("Not connected"));
        assert!(st.recording);
    }

    /// When recording ends, the text channel is authoritative again: the
    /// voice transcript, placeholders included, gives way to the projection
    /// of the last text-channel snapshot.
    #[tokio::test]
    async fn leaving_voice_mode_restores_the_text_projection() {
        let h = harness();
        let driven = h
            .drive(vec![
                connected().into_session(),
                SessionEvent::Text(TextEvent::Messages(vec![TextMessage {
                    id: "c|0".into(),
                    sender: "user".into(),
                    text: "hello".into(),
                }])),
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::ToggleRecording,
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.transcript.contains(TRANSCRIBING_ID));
        assert_eq!(st.transcript.len(), 1);
        let message = &st.transcript.messages()[0];
        assert_eq!(message.id, "c|0");
        assert_eq!(message.sender, Sender::User);
        assert_eq!(message.content, "hello");
    }

    #[tokio::test]
    async fn socket_close_discards_voice_placeholders() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Voice(VoiceEvent::Closed),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        assert!(!st.recording);
        // No text snapshot has arrived; the projection is empty.
        assert!(st.transcript.is_empty());
    }

    #[tokio::test]
    async fn snapshots_are_ignored_while_recording() {
        let h = harness();
        let driven = h
            .drive(vec![
                SessionEvent::ToggleRecording,
                SessionEvent::Voice(VoiceEvent::SpeechStarted),
                SessionEvent::Text(TextEvent::Messages(vec![TextMessage {
                    id: "c|5".into(),
                    sender: "bot".into(),
                    text: "stale".into(),
                }])),
            ])
            .await;

        let st = driven.state.lock().unwrap();
        // The voice transcript is untouched by the text snapshot.
        assert!(st.transcript.contains(TRANSCRIBING_ID));
        assert!(!st.transcript.contains("c|5"));
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    trait IntoSession {
        fn into_session(self) -> SessionEvent;
    }

    impl IntoSession for TextEvent {
        fn into_session(self) -> SessionEvent {
            SessionEvent::Text(self)
        }
    }
}
