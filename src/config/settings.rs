//! Application settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across tasks.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;

/// Environment variables consulted, in order, when no API key is stored in
/// `settings.toml`.
pub const API_KEY_ENV_VARS: [&str; 2] = ["GEMINI_API_KEY", "API_KEY"];

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Vendor endpoints and model identifiers for the Model Service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// API key.  `None` falls back to [`API_KEY_ENV_VARS`] at load time.
    pub api_key: Option<String>,
    /// REST base URL, without trailing slash.
    pub base_url: String,
    /// WebSocket endpoint of the bidirectional live API.
    pub live_url: String,
    /// Chat model used when maps grounding is off.
    pub chat_model: String,
    /// Chat model used when maps grounding is on (only the lite model supports it).
    pub maps_model: String,
    pub image_model: String,
    pub video_model: String,
    pub transcribe_model: String,
    pub tts_model: String,
    /// Prebuilt voice for text-to-speech.
    pub tts_voice: String,
    /// Per-request HTTP timeout.
    pub timeout_secs: u64,
    /// Fixed delay between polls of a long-running video operation.
    pub video_poll_secs: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
            live_url: "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent".into(),
            chat_model: "gemini-3-pro-preview".into(),
            maps_model: "gemini-2.5-flash-lite-latest".into(),
            image_model: "gemini-3-pro-image-preview".into(),
            video_model: "veo-3.1-fast-generate-preview".into(),
            transcribe_model: "gemini-3-flash-preview".into(),
            tts_model: "gemini-2.5-flash-preview-tts".into(),
            tts_voice: "Kore".into(),
            timeout_secs: 120,
            video_poll_secs: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Settings for the live voice session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Native-audio model served over the live endpoint.
    pub model: String,
    /// Prebuilt voice the model answers with.
    pub voice_name: String,
    /// System instruction sent in the session setup message.
    pub system_instruction: String,
    /// Seconds to wait for the server to acknowledge setup.
    pub setup_timeout_secs: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            model: "gemini-2.5-flash-native-audio-preview-12-2025".into(),
            voice_name: "Zephyr".into(),
            system_instruction:
                "You are a coding assistant in Nexus Studio. Help the user build websites and games."
                    .into(),
            setup_timeout_secs: 15,
        }
    }
}

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for capture and playback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Rate of outbound frames in Hz (the live API expects 16 000).
    pub capture_sample_rate: u32,
    /// Samples per outbound frame.
    pub frame_size: usize,
    /// Rate of inbound model audio in Hz (the live API sends 24 000).
    pub playback_sample_rate: u32,
    /// Input device name; `None` means the system default.
    pub input_device: Option<String>,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            capture_sample_rate: 16_000,
            frame_size: 4096,
            playback_sample_rate: 24_000,
            input_device: None,
            output_device: None,
        }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level application configuration, serialised as `settings.toml`.
///
/// ```rust,no_run
/// use studio_live::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
/// println!("live model: {}", config.live.model);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Vendor endpoints and models.
    pub service: ServiceConfig,
    /// Live voice session settings.
    pub live: LiveConfig,
    /// Capture / playback settings.
    pub audio: AudioConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`,
    /// then fill a missing API key from the environment.
    ///
    /// Returns defaults when the file does not exist yet.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&AppPaths::new().settings_file)?;
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Take the API key from the first non-empty variable in
    /// [`API_KEY_ENV_VARS`] when none is configured.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let configured = self
            .service
            .api_key
            .as_deref()
            .is_some_and(|k| !k.is_empty());
        if configured {
            return;
        }
        self.service.api_key = API_KEY_ENV_VARS
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.is_empty());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trip_toml() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("settings.toml");

        let original = AppConfig::default();
        original.save_to(&path).expect("save");
        let loaded = AppConfig::load_from(&path).expect("load");

        assert_eq!(original.service.base_url, loaded.service.base_url);
        assert_eq!(original.service.live_url, loaded.service.live_url);
        assert_eq!(original.service.video_poll_secs, loaded.service.video_poll_secs);
        assert_eq!(original.live.model, loaded.live.model);
        assert_eq!(original.live.system_instruction, loaded.live.system_instruction);
        assert_eq!(original.audio.frame_size, loaded.audio.frame_size);
        assert_eq!(original.audio.input_device, loaded.audio.input_device);
    }

    #[test]
    fn load_missing_returns_default() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("nonexistent.toml");

        let config = AppConfig::load_from(&path).expect("should not error");
        assert_eq!(config.audio.capture_sample_rate, 16_000);
        assert_eq!(config.live.voice_name, "Zephyr");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempdir().expect("temp dir");
        let path = dir.path().join("partial.toml");
        std::fs::write(&path, "[audio]\nframe_size = 2048\n").unwrap();

        let config = AppConfig::load_from(&path).expect("load");
        assert_eq!(config.audio.frame_size, 2048);
        assert_eq!(config.audio.playback_sample_rate, 24_000);
        assert_eq!(config.service.tts_voice, "Kore");
    }

    #[test]
    fn default_values() {
        let cfg = AppConfig::default();

        assert!(cfg.service.api_key.is_none());
        assert_eq!(cfg.service.chat_model, "gemini-3-pro-preview");
        assert_eq!(cfg.service.maps_model, "gemini-2.5-flash-lite-latest");
        assert_eq!(cfg.service.video_poll_secs, 10);
        assert_eq!(cfg.audio.capture_sample_rate, 16_000);
        assert_eq!(cfg.audio.frame_size, 4096);
        assert_eq!(cfg.audio.playback_sample_rate, 24_000);
    }

    #[test]
    fn env_fills_missing_key_in_order() {
        let mut cfg = AppConfig::default();
        cfg.apply_env(|name| match name {
            "GEMINI_API_KEY" => Some(String::new()),
            "API_KEY" => Some("from-api-key".into()),
            _ => None,
        });
        assert_eq!(cfg.service.api_key.as_deref(), Some("from-api-key"));
    }

    #[test]
    fn env_does_not_override_configured_key() {
        let mut cfg = AppConfig::default();
        cfg.service.api_key = Some("from-file".into());
        cfg.apply_env(|_| Some("from-env".into()));
        assert_eq!(cfg.service.api_key.as_deref(), Some("from-file"));
    }
}
