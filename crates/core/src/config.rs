use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_schema_version() -> u32 {
    1
}

pub const SONOS_CONTROL_PORT: u16 = 1400;
pub const LASTFM_API_URL: &str = "https://ws.audioscrobbler.com/2.0/";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceConfig {
    pub name: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl DeviceConfig {
    pub fn from_host(host: &str) -> Self {
        Self {
            name: None,
            host: host.trim().to_string(),
            port: None,
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(SONOS_CONTROL_PORT)
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.host)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IntervalsConfig {
    pub poll_ms: u64,
    pub rediscovery_ms: u64,
    pub status_ms: u64,
}

impl Default for IntervalsConfig {
    fn default() -> Self {
        Self {
            poll_ms: 1_000,
            rediscovery_ms: 60_000,
            status_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrobbleConfig {
    /// Share of the track that must be played, in percent.
    pub threshold_percent: u8,
    pub max_threshold_secs: u64,
    pub min_duration_secs: u64,
    /// Backward position jumps larger than this restart the session.
    pub restart_tolerance_ms: u64,
}

impl Default for ScrobbleConfig {
    fn default() -> Self {
        Self {
            threshold_percent: 50,
            max_threshold_secs: 240,
            min_duration_secs: 30,
            restart_tolerance_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Where the pending queue, dead letters and status report live.
    /// Without it the queue is memory-only.
    pub data_dir: Option<PathBuf>,
    pub backoff_base_ms: u64,
    pub backoff_cap_ms: u64,
    pub dedup_window_secs: u64,
    pub max_dead_letters: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            backoff_base_ms: 1_000,
            backoff_cap_ms: 300_000,
            dedup_window_secs: 24 * 60 * 60,
            max_dead_letters: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LastFmConfig {
    pub api_key: String,
    pub api_secret: String,
    pub session_key: String,
    pub username: String,
    pub password: String,
    pub api_url: String,
}

impl Default for LastFmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_secret: String::new(),
            session_key: String::new(),
            username: String::new(),
            password: String::new(),
            api_url: LASTFM_API_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
    #[serde(default)]
    pub intervals: IntervalsConfig,
    #[serde(default)]
    pub scrobble: ScrobbleConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub lastfm: LastFmConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            log_level: "info".to_string(),
            devices: Vec::new(),
            intervals: IntervalsConfig::default(),
            scrobble: ScrobbleConfig::default(),
            queue: QueueConfig::default(),
            lastfm: LastFmConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.intervals.poll_ms == 0 {
            return Err("intervals.poll_ms must be greater than 0".to_string());
        }
        if self.scrobble.threshold_percent == 0 || self.scrobble.threshold_percent > 100 {
            return Err("scrobble.threshold_percent must be between 1 and 100".to_string());
        }
        if self.queue.backoff_base_ms == 0 || self.queue.backoff_cap_ms < self.queue.backoff_base_ms
        {
            return Err("queue.backoff_cap_ms must be >= queue.backoff_base_ms > 0".to_string());
        }
        if let Some(dev) = self.devices.iter().find(|d| d.host.trim().is_empty()) {
            return Err(format!(
                "device {:?} has an empty host",
                dev.name.as_deref().unwrap_or("<unnamed>")
            ));
        }
        Ok(())
    }
}
