//! Application entry point — duochat terminal client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Build the channels and audio pipelines from config.
//! 5. Spawn the session orchestrator on the tokio runtime.
//! 6. Run the line-oriented terminal driver until `/quit` or EOF.
//!
//! # Commands
//!
//! * `/mic`     — toggle recording (voice mode on/off)
//! * `/sources` — list accumulated grounding files
//! * `/show`    — print the current transcript
//! * `/quit`    — exit
//!
//! Any other non-empty line is sent as user input over the active channel.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

use duochat::{
    audio::{AudioPlayback, AudioSink, MicCapture, NullPlayback},
    config::AppConfig,
    session::{new_shared_state, SessionEvent, SessionOrchestrator, SharedSessionState},
    text::DirectLineChannel,
    voice::RealtimeVoiceChannel,
};

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            log::warn!("main: failed to load config, using defaults: {e}");
            AppConfig::default()
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()?;

    runtime.block_on(run(config))
}

async fn run(config: AppConfig) -> anyhow::Result<()> {
    let wire_rate = config.voice.sample_rate;

    // ── 1. audio pipelines ──
    let playback: Arc<dyn AudioSink> = match AudioPlayback::new(wire_rate, config.audio.playback_gain)
    {
        Ok(playback) => Arc::new(playback),
        Err(e) => {
            // Headless hosts still get the transcript and grounding files.
            log::warn!("main: audio playback unavailable ({e}); responses will be silent");
            Arc::new(NullPlayback)
        }
    };
    let capture = MicCapture::new(config.audio.input_device.clone(), wire_rate);

    // ── 2. channels ──
    let voice = RealtimeVoiceChannel::new(config.voice.clone());
    let text = DirectLineChannel::new(config.text.clone());

    // ── 3. session orchestrator ──
    let state = new_shared_state();
    let (events_tx, events_rx) = mpsc::channel::<SessionEvent>(128);

    let orchestrator = SessionOrchestrator::new(
        Arc::clone(&state),
        Box::new(voice),
        Box::new(text),
        Box::new(capture),
        playback,
        events_tx.clone(),
    );
    let session = tokio::spawn(orchestrator.run(events_rx));

    // ── 4. terminal driver ──
    drive_terminal(state, events_tx).await?;

    let _ = session.await;
    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal driver
// ---------------------------------------------------------------------------

/// Read stdin line by line and translate commands into session events.
async fn drive_terminal(
    state: SharedSessionState,
    events_tx: mpsc::Sender<SessionEvent>,
) -> anyhow::Result<()> {
    println!("duochat — /mic toggles voice mode, /sources lists grounding files, /quit exits");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "/quit" => break,
            "/mic" => {
                events_tx.send(SessionEvent::ToggleRecording).await?;
                settle().await;
                let recording = state.lock().unwrap().recording;
                println!("[mic {}]", if recording { "on" } else { "off" });
            }
            "/sources" => print_sources(&state),
            "/show" => print_transcript(&state),
            "" => {}
            text => {
                events_tx.send(SessionEvent::UserInput(text.to_string())).await?;
                settle().await;
                print_transcript(&state);
            }
        }
        print_error_banner(&state);
    }

    events_tx.send(SessionEvent::Shutdown).await?;
    Ok(())
}

/// Give in-flight events a moment to land before reading state back.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(200)).await;
}

fn print_transcript(state: &SharedSessionState) {
    let st = state.lock().unwrap();
    for message in st.transcript.messages() {
        println!("{:>4}: {}", message.sender.label(), message.content);
    }
}

fn print_sources(state: &SharedSessionState) {
    let st = state.lock().unwrap();
    if st.grounding.is_empty() {
        println!("[no grounding files yet]");
        return;
    }
    for file in st.grounding.files() {
        println!("[{}] {}", file.id, file.name);
    }
}

fn print_error_banner(state: &SharedSessionState) {
    if let Some(error) = state.lock().unwrap().session_error.as_deref() {
        eprintln!("!! {error}");
    }
}
