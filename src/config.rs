//! Configuration types for the voice chat client.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Chat endpoint settings.
    pub chat: ChatConfig,
    /// Voice capture settings.
    pub voice: VoiceConfig,
}

/// Chat endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the OpenAI-compatible server.
    pub base_url: String,
    /// Bearer token sent with every request. Empty means no auth header.
    pub api_key: String,
    /// Model identifier sent in requests.
    pub model: String,
    /// Read event-stream responses as one buffered body instead of
    /// incrementally. Useful behind gateways that re-buffer SSE.
    pub buffered_stream: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080/v1".to_owned(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_owned(),
            buffered_stream: false,
        }
    }
}

impl ChatConfig {
    /// The base URL trimmed of whitespace and trailing slashes, ready for
    /// endpoint composition.
    #[must_use]
    pub fn endpoint_base(&self) -> String {
        self.base_url.trim().trim_end_matches('/').to_owned()
    }
}

/// Voice capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VoiceConfig {
    /// Hands-free mode: each finalized utterance is sent immediately
    /// instead of accumulating until the gesture ends.
    pub hands_free: bool,
    /// Recognition language tag, e.g. `en-US`.
    pub language: String,
    /// Minimum hold duration in ms for a manual capture. Releasing earlier
    /// defers the stop by the remaining time.
    pub min_hold_ms: u64,
    /// Vertical gesture displacement (in points) past which the capture is
    /// routed to the draft instead of being sent.
    pub cancel_threshold: f32,
    /// On-device recognition engine command (None = probe disabled).
    pub engine_command: Option<String>,
    /// Hosted live-transcription WebSocket URL (None = provider disabled).
    pub hosted_url: Option<String>,
    /// Auth token for the hosted provider.
    pub hosted_token: Option<String>,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            hands_free: false,
            language: "en-US".to_owned(),
            min_hold_ms: 700,
            cancel_threshold: 80.0,
            engine_command: None,
            hosted_url: None,
            hosted_token: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file, falling back to defaults for
    /// missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::ParleyError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file, silently falling back to the
    /// defaults when the file is missing or malformed.
    #[must_use]
    pub fn load_or_default(path: &std::path::Path) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!("using default config ({}): {e}", path.display());
                Self::default()
            }
        }
    }

    /// Save configuration to a TOML file, creating parent directories as
    /// needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot
    /// be serialized.
    pub fn save_to_file(&self, path: &std::path::Path) -> crate::error::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::ParleyError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/parley/config.toml`.
    #[must_use]
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("parley")
            .join("config.toml")
    }
}
