//! Runtime configuration.
//!
//! Loaded from `~/.config/roost/config.toml`. Every field has a default,
//! so a missing or empty file yields a working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use roost_core::Result;

/// Milliseconds between live-text flushes when not configured.
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 16;

/// Default capacity of the per-process event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Name or path of the Claude Code binary. Defaults to `claude` on PATH.
    pub claude_binary: Option<String>,
    /// Model passed through to the CLI, when set.
    pub model: Option<String>,
    /// Permission mode passed through to the CLI, when set.
    pub permission_mode: Option<String>,
    /// Milliseconds between live-text flushes.
    pub flush_interval_ms: u64,
    /// Capacity of the per-process event channel.
    pub channel_capacity: usize,
    /// Fail spawns that take longer than this many seconds. Off by default.
    pub spawn_timeout_secs: Option<u64>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            claude_binary: None,
            model: None,
            permission_mode: None,
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            spawn_timeout_secs: None,
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration from the default path.
    ///
    /// Returns defaults when the config directory or file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(Self::default());
        };
        let path = config_dir.join("roost").join("config.toml");
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Loads the configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(&content)?)
    }

    /// Flush interval as a [`Duration`].
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Spawn timeout as a [`Duration`], when configured.
    pub fn spawn_timeout(&self) -> Option<Duration> {
        self.spawn_timeout_secs.map(Duration::from_secs)
    }
}
