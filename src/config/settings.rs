//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

// ---------------------------------------------------------------------------
// VoiceConfig
// ---------------------------------------------------------------------------

/// Settings for the realtime voice channel (duplex websocket).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// WebSocket endpoint of the realtime middle tier,
    /// e.g. `ws://localhost:8765/realtime`.
    pub endpoint: String,
    /// Optional bearer token attached to the upgrade request.
    ///
    /// `None` for local middle tiers that require no authentication.
    pub api_key: Option<String>,
    /// PCM sample rate of both the uplink (microphone) and downlink
    /// (response audio) streams, in Hz.
    pub sample_rate: u32,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8765/realtime".into(),
            api_key: None,
            sample_rate: 24_000,
        }
    }
}

// ---------------------------------------------------------------------------
// TextConfig
// ---------------------------------------------------------------------------

/// Settings for the turn-based Direct Line text channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    /// Base URL of the Direct Line REST endpoint.
    pub base_url: String,
    /// Direct Line secret used as the bearer token.
    ///
    /// `None` disables the text channel; the session then reports
    /// "not connected" until a secret is configured.
    pub secret: Option<String>,
    /// Interval between activity polls, in milliseconds.
    pub poll_interval_ms: u64,
    /// Maximum seconds to wait for any single HTTP request.
    pub timeout_secs: u64,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            base_url: "https://directline.botframework.com".into(),
            secret: None,
            poll_interval_ms: 1_000,
            timeout_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for the local audio devices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Audio input device name — `None` means the system default.
    pub input_device: Option<String>,
    /// Playback gain applied to response audio (0.0 – 1.0).
    pub playback_gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            playback_gain: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------------------

/// Top-level application configuration.
///
/// Persisted as TOML at [`AppPaths::settings_file`].  A missing or corrupt
/// file degrades to [`AppConfig::default`] — the application must always be
/// able to start.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub voice: VoiceConfig,
    #[serde(default)]
    pub text: TextConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load the configuration from [`AppPaths::settings_file`].
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet
    /// (first run).  A file that exists but cannot be parsed is an error so
    /// the caller can warn and fall back explicitly.
    pub fn load() -> Result<Self> {
        let paths = AppPaths::new();
        Self::load_from(&paths.settings_file)
    }

    /// Load from an explicit path (used by tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Persist the configuration to [`AppPaths::settings_file`], creating
    /// the config directory if needed.
    pub fn save(&self) -> Result<()> {
        let paths = AppPaths::new();
        std::fs::create_dir_all(&paths.config_dir)?;
        self.save_to(&paths.settings_file)
    }

    /// Save to an explicit path (used by tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        let raw = toml::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
