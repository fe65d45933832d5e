use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the camera remote backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_discovery_timeout")]
    pub discovery_timeout_secs: u64,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    #[serde(default = "default_long_polling_timeout")]
    pub long_polling_timeout_secs: u64,

    #[serde(default = "default_stall_timeout")]
    pub liveview_stall_timeout_secs: u64,

    /// Bounds a whole picture transfer, which can outlast a command.
    #[serde(default = "default_download_timeout")]
    pub download_timeout_secs: u64,

    #[serde(default = "default_download_dir")]
    pub download_dir: String,

    /// Fixed camera endpoint; skips SSDP discovery when set.
    #[serde(default)]
    pub camera_endpoint: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            discovery_timeout_secs: default_discovery_timeout(),
            api_version: default_api_version(),
            request_timeout_secs: default_request_timeout(),
            long_polling_timeout_secs: default_long_polling_timeout(),
            liveview_stall_timeout_secs: default_stall_timeout(),
            download_timeout_secs: default_download_timeout(),
            download_dir: default_download_dir(),
            camera_endpoint: None,
        }
    }
}

impl Config {
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_secs(self.discovery_timeout_secs.max(1))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn long_polling_timeout(&self) -> Duration {
        Duration::from_secs(self.long_polling_timeout_secs.max(1))
    }

    pub fn liveview_stall_timeout(&self) -> Duration {
        Duration::from_secs(self.liveview_stall_timeout_secs.max(1))
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs.max(1))
    }
}

fn default_discovery_timeout() -> u64 {
    10
}

fn default_api_version() -> String {
    "1.0".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_long_polling_timeout() -> u64 {
    65
}

fn default_stall_timeout() -> u64 {
    10
}

fn default_download_timeout() -> u64 {
    10 * 60
}

fn default_download_dir() -> String {
    "/home/root/Pictures".to_string()
}
