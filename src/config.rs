//! Client configuration.
//!
//! Settings come from a JSON file and the environment, in that order:
//!
//! 1. `$SWANK_CLIENT_CONFIG`, if set
//! 2. `<config dir>/swank-client/config.json` (`~/.config` on Linux,
//!    `~/Library/Application Support` on macOS), if it exists
//! 3. Built-in defaults
//!
//! `SWANK_HOST` and `SWANK_PORT` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Default SWANK server port.
pub const DEFAULT_PORT: u16 = 4005;

/// Maximum frames handled by one poll.
pub const DEFAULT_MAX_MESSAGES: usize = 50;

/// Client settings. Every field has a default, so a config file only needs
/// the keys it changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// How long a poll waits for the next frame header, in milliseconds.
    pub poll_timeout_ms: u64,
    /// Maximum frames handled by one poll before returning to the host.
    pub max_messages: usize,
    /// Maximum list nesting accepted from the server.
    pub max_depth: usize,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            poll_timeout_ms: 100,
            max_messages: DEFAULT_MAX_MESSAGES,
            max_depth: crate::sexpr::DEFAULT_MAX_DEPTH,
            connect_attempts: 3,
            log_filter: "swank_client=info".to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from the default locations.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or
    /// parsed, or if `SWANK_PORT` is not a valid port number.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Read a JSON config file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Parse a JSON config document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for [`Config`].
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to parse config JSON")
    }

    /// Apply `SWANK_HOST` / `SWANK_PORT` overrides read through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(host) = lookup("SWANK_HOST") {
            self.host = host;
        }
        if let Some(port) = lookup("SWANK_PORT") {
            self.port = port
                .trim()
                .parse()
                .with_context(|| format!("Invalid SWANK_PORT value: {}", port))?;
        }
        Ok(())
    }

    /// Poll timeout as a duration.
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

/// Resolve the config file path.
fn config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("SWANK_CLIENT_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|dir| dir.join("swank-client").join("config.json"))
}
