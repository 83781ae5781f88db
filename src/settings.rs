//! Manager settings loaded from TOML

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Holds `config.json`, `env.json` and detached server logs
    pub state_dir: PathBuf,
    /// Directory containing one source directory per server
    pub servers_root: PathBuf,
    pub timing: Timing,
}

/// Fixed intervals for the bounded waits around start and stop
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// How long a fresh attached process must survive to count as started
    pub start_grace_ms: u64,
    pub stop_poll_interval_ms: u64,
    /// Polls after SIGTERM before escalating to SIGKILL
    pub stop_poll_attempts: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".mcp"),
            servers_root: PathBuf::from("mcp-servers"),
            timing: Timing::default(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            start_grace_ms: 500,
            stop_poll_interval_ms: 100,
            stop_poll_attempts: 10,
        }
    }
}

impl Timing {
    pub fn start_grace(&self) -> Duration {
        Duration::from_millis(self.start_grace_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms)
    }
}

impl Settings {
    /// Load the first settings file found, falling back to defaults
    pub fn load() -> Self {
        let paths = [
            dirs::config_dir().map(|p| p.join("mcp-manager/config.toml")),
            dirs::home_dir().map(|p| p.join(".mcp-manager.toml")),
            Some(PathBuf::from("mcp-manager.toml")),
        ];

        for path in paths.into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            match std::fs::read_to_string(&path)
                .map_err(|e| e.to_string())
                .and_then(|content| Self::parse(&content).map_err(|e| e.to_string()))
            {
                Ok(settings) => {
                    tracing::debug!("Loaded settings from {}", path.display());
                    return settings;
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable settings file {}: {e}", path.display());
                }
            }
        }

        Settings::default()
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn config_path(&self) -> PathBuf {
        self.state_dir.join("config.json")
    }

    pub fn env_path(&self) -> PathBuf {
        self.state_dir.join("env.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }
}
