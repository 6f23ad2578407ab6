//! Start-up configuration from the environment and platform directories.

use std::path::PathBuf;
use std::time::Duration;

use providers::DEFAULT_PROXY_URL;
use services::persistence::default_data_dir;
use services::StateFile;
use shared::settings::Settings;
use url::Url;

pub const DATA_DIR_VAR: &str = "NDRAFT_DATA_DIR";
pub const PROXY_URL_VAR: &str = "NDRAFT_PROXY_URL";
pub const STREAM_TIMEOUT_VAR: &str = "NDRAFT_STREAM_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Holds `state.json` and default exports
    pub data_dir: PathBuf,
    /// Endpoint used when the saved settings do not name one
    pub proxy_url: String,
    /// Longest wait for the next chunk of a streaming response
    pub idle_timeout: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            proxy_url: DEFAULT_PROXY_URL.to_string(),
            idle_timeout: agent_host::DEFAULT_IDLE_TIMEOUT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Invalid values are logged and ignored.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup(DATA_DIR_VAR).filter(|s| !s.trim().is_empty()) {
            config.data_dir = PathBuf::from(dir.trim());
        }

        if let Some(raw) = lookup(PROXY_URL_VAR).filter(|s| !s.trim().is_empty()) {
            match validate_endpoint(&raw) {
                Ok(url) => config.proxy_url = url,
                Err(e) => tracing::warn!("ignoring {}={:?}: {}", PROXY_URL_VAR, raw, e),
            }
        }

        if let Some(raw) = lookup(STREAM_TIMEOUT_VAR) {
            match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => config.idle_timeout = Duration::from_secs(secs),
                _ => tracing::warn!("ignoring {}={:?}: expected a positive number", STREAM_TIMEOUT_VAR, raw),
            }
        }

        config
    }

    pub fn state_file(&self) -> StateFile {
        StateFile::in_dir(&self.data_dir)
    }

    /// The saved proxy URL wins over the configured one.
    pub fn endpoint_for(&self, settings: &Settings) -> String {
        let saved = settings.proxy_url.trim();
        if saved.is_empty() {
            self.proxy_url.clone()
        } else {
            saved.to_string()
        }
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_endpoint(raw: &str) -> Result<String, String> {
    let url = Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url.to_string()),
        other => Err(format!("unsupported scheme \"{}\"", other)),
    }
}
