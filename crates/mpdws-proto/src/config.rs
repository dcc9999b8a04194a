use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::platform;

/// Environment variable that overrides `server.url`.
pub const URL_ENV: &str = "MPDWS_URL";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket endpoint of the API server.
    #[serde(default = "default_url")]
    pub url: String,
}

/// Backoff applied between reconnect attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Give up after this many consecutive failures.  Absent = retry forever.
    #[serde(default)]
    pub max_attempts: Option<u32>,
    /// Upper bound of the random delay added to every attempt.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Largest playlist range requested in one `playlistquery`.
    #[serde(default = "default_fetch_chunk")]
    pub fetch_chunk: usize,
    #[serde(default = "default_search_page_size")]
    pub search_page_size: usize,
    /// Query issued once the first connection is up.
    #[serde(default)]
    pub initial_search: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { url: default_url() }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: None,
            jitter_ms: default_jitter_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            fetch_chunk: default_fetch_chunk(),
            search_page_size: default_search_page_size(),
            initial_search: None,
        }
    }
}

fn default_url() -> String {
    platform::DEFAULT_SERVER_URL.to_string()
}

fn default_initial_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_fetch_chunk() -> usize {
    100
}

fn default_search_page_size() -> usize {
    50
}

impl Config {
    /// Load from the platform config dir, writing defaults on first run.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from(&Self::config_path())?;
        if let Ok(url) = std::env::var(URL_ENV) {
            if !url.trim().is_empty() {
                config.server.url = url;
            }
        }
        Ok(config)
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save_to(path)?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.url, "ws://127.0.0.1:3000/ws");
        assert_eq!(config.reconnect.initial_delay_ms, 500);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
        assert!(config.reconnect.max_attempts.is_none());
        assert_eq!(config.sync.fetch_chunk, 100);
        assert!(Config::config_path().ends_with("mpdws/config.toml"));
    }

    #[test]
    fn test_first_load_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.sync.search_page_size, 50);

        let again = Config::load_from(&path).unwrap();
        assert_eq!(again.server.url, config.server.url);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[server]\nurl = \"ws://mpd.lan:8080/ws\"\n\n[reconnect]\nmax_attempts = 3\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.url, "ws://mpd.lan:8080/ws");
        assert_eq!(config.reconnect.max_attempts, Some(3));
        assert_eq!(config.reconnect.jitter_ms, 250);
        assert_eq!(config.sync.fetch_chunk, 100);
    }
}
