use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::error::Error;

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api";
const DEFAULT_SSE_URL: &str = "http://localhost:8080/api/stream";

/// Where the dashboard's data comes from. Chosen once at start-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    Live,
    Simulated,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub api_base_url: String,
    /// Base URL of the server-push channels. `None` means no streaming
    /// backend, which forces simulation.
    pub sse_url: Option<String>,
    pub use_mock_data: bool,
    pub stats_poll_interval_secs: u64,
    pub vehicle_tick_millis: u64,
    pub alert_tick_millis: u64,
    pub summary_interval_secs: u64,
    pub frame_interval_millis: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            sse_url: Some(DEFAULT_SSE_URL.to_string()),
            use_mock_data: false,
            stats_poll_interval_secs: 30,
            vehicle_tick_millis: 2000,
            alert_tick_millis: 8000,
            summary_interval_secs: 10,
            frame_interval_millis: 16,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Config::default();

        let api_base_url = env::var("API_BASE_URL")
            .map(|url| url.trim_end_matches('/').to_string())
            .unwrap_or(defaults.api_base_url);
        let sse_url = match env::var("SSE_URL") {
            Ok(url) if url.trim().is_empty() => None,
            Ok(url) => Some(url.trim_end_matches('/').to_string()),
            Err(_) => defaults.sse_url,
        };
        let use_mock_data = env::var("USE_MOCK_DATA").map(|v| v == "true").unwrap_or(false);

        let config = Config {
            api_base_url,
            sse_url,
            use_mock_data,
            stats_poll_interval_secs: get_env_var_u64(
                "STATS_POLL_INTERVAL_SECS",
                defaults.stats_poll_interval_secs,
            ),
            vehicle_tick_millis: get_env_var_u64("VEHICLE_TICK_MILLIS", defaults.vehicle_tick_millis),
            alert_tick_millis: get_env_var_u64("ALERT_TICK_MILLIS", defaults.alert_tick_millis),
            summary_interval_secs: get_env_var_u64(
                "SUMMARY_INTERVAL_SECS",
                defaults.summary_interval_secs,
            ),
            frame_interval_millis: get_env_var_u64(
                "FRAME_INTERVAL_MILLIS",
                defaults.frame_interval_millis,
            ),
        };
        log::debug!("Fleet stream env: {:?}", config);
        config.validate()?;
        Ok(config)
    }

    /// Rejects URLs without a scheme and zero periods.
    pub fn validate(&self) -> std::result::Result<(), Error> {
        let mut urls = std::iter::once(&self.api_base_url).chain(self.sse_url.as_ref());
        if let Some(url) = urls.find(|url| !url.starts_with("http://") && !url.starts_with("https://")) {
            return Err(Error::Config(format!("{url} is not an http(s) URL")));
        }
        let periods = [
            ("STATS_POLL_INTERVAL_SECS", self.stats_poll_interval_secs),
            ("VEHICLE_TICK_MILLIS", self.vehicle_tick_millis),
            ("ALERT_TICK_MILLIS", self.alert_tick_millis),
            ("SUMMARY_INTERVAL_SECS", self.summary_interval_secs),
            ("FRAME_INTERVAL_MILLIS", self.frame_interval_millis),
        ];
        if let Some((key, _)) = periods.iter().find(|(_, value)| *value == 0) {
            return Err(Error::Config(format!("{key} must be greater than zero")));
        }
        Ok(())
    }

    /// Simulation when asked for, or when there is nothing to stream from.
    pub fn mode(&self) -> SourceMode {
        if self.use_mock_data || self.sse_url.is_none() {
            SourceMode::Simulated
        } else {
            SourceMode::Live
        }
    }

    fn get_config_file_path() -> PathBuf {
        let config_dir = env::var("CONFIG_DIR").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(config_dir).join("dashboard_config.json")
    }

    /// The JSON file under `CONFIG_DIR` when there is one, the environment
    /// otherwise.
    pub fn load() -> Result<Self> {
        if Self::get_config_file_path().exists() {
            Self::load_from_file()
        } else {
            Self::from_env()
        }
    }

    pub fn load_from_file() -> Result<Self> {
        let config_file_path = Self::get_config_file_path();
        let contents = fs::read_to_string(&config_file_path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!("Loaded config from {}", config_file_path.display());
        Ok(config)
    }

    pub fn save_to_file(&self) -> Result<()> {
        let config_file_path = Self::get_config_file_path();
        if let Some(parent) = config_file_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        let mut file = fs::File::create(&config_file_path)?;
        file.write_all(contents.as_bytes())?;
        Ok(())
    }
}

fn get_env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(default)
}
