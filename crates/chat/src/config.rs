//! Configuration loading for the chat core
//!
//! Settings are loaded from (in order of priority):
//! 1. JSON file (`beat.json` in the config directory)
//! 2. Environment variables (`BEAT_API_URL`, `BEAT_POLL_INTERVAL_SECS`, ...)
//! 3. Built-in defaults
//!
//! Missing fields in the file fall back to the defaults.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Config filename in the Beat config directory
pub const CONFIG_FILE: &str = "beat.json";

pub const DEFAULT_API_URL: &str = "http://localhost:8000/api";

/// Runtime settings for the sync engine and HTTP backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the REST API
    pub api_url: String,
    /// Seconds between polls of the active conversation
    pub poll_interval_secs: u64,
    /// Message polls allowed in flight per selection
    pub max_in_flight_polls: usize,
    pub request_timeout_secs: u64,
    /// How long the user counts as typing after the last keystroke
    pub typing_timeout_ms: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval_secs: 3,
            max_in_flight_polls: 2,
            request_timeout_secs: 10,
            typing_timeout_ms: 1000,
        }
    }
}

impl ChatConfig {
    /// Load settings using the following priority:
    /// 1. JSON file (~/.config/beat/beat.json)
    /// 2. Environment variables
    /// 3. Defaults
    pub fn load() -> Result<Self> {
        let loaded = if config::config_exists(CONFIG_FILE) {
            config::load_json(CONFIG_FILE)?
        } else {
            Self::from_env()?
        };
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load from an explicit directory, falling back to defaults
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let loaded = if dir.join(CONFIG_FILE).exists() {
            config::load_json_in(dir, CONFIG_FILE)?
        } else {
            Self::default()
        };
        loaded.validate()?;
        Ok(loaded)
    }

    /// Parse settings from a JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        let loaded: Self = serde_json::from_str(json).context("Failed to parse config JSON")?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Load settings from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut loaded = Self::default();
        if let Some(url) = lookup("BEAT_API_URL") {
            loaded.api_url = url;
        }
        if let Some(secs) = lookup("BEAT_POLL_INTERVAL_SECS") {
            loaded.poll_interval_secs = secs
                .trim()
                .parse()
                .context("BEAT_POLL_INTERVAL_SECS is not a number")?;
        }
        if let Some(limit) = lookup("BEAT_MAX_IN_FLIGHT_POLLS") {
            loaded.max_in_flight_polls = limit
                .trim()
                .parse()
                .context("BEAT_MAX_IN_FLIGHT_POLLS is not a number")?;
        }
        if let Some(secs) = lookup("BEAT_REQUEST_TIMEOUT_SECS") {
            loaded.request_timeout_secs = secs
                .trim()
                .parse()
                .context("BEAT_REQUEST_TIMEOUT_SECS is not a number")?;
        }
        Ok(loaded)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.api_url)
            .with_context(|| format!("Invalid API URL: {}", self.api_url))?;
        if !matches!(url.scheme(), "http" | "https") {
            bail!("API URL must be http or https: {}", self.api_url);
        }
        if self.poll_interval_secs == 0 {
            bail!("Poll interval must be at least one second");
        }
        if self.max_in_flight_polls == 0 {
            bail!("At least one poll must be allowed in flight");
        }
        if self.request_timeout_secs == 0 {
            bail!("Request timeout must be at least one second");
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn typing_timeout(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.typing_timeout_ms as i64)
    }
}
