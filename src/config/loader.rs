use std::env;
use std::path::Path;

use tokio::fs;
use tracing::{info, warn};

use crate::types::CameraError;

use super::{paths, Config};

pub const ENDPOINT_ENV: &str = "CAMERA_REMOTE_ENDPOINT";
pub const DOWNLOAD_DIR_ENV: &str = "CAMERA_REMOTE_DOWNLOAD_DIR";

impl Config {
    /// Load configuration from config.json in the app directory
    /// Falls back to defaults if the file doesn't exist or can't be parsed
    pub async fn load() -> Self {
        let mut config = match Self::try_load().await {
            Ok(config) => config,
            Err(err) => {
                warn!(error = ?err, "Failed to load config.json, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides();
        info!(
            api_version = %config.api_version,
            download_dir = %config.download_dir,
            endpoint = ?config.camera_endpoint,
            "Loaded configuration"
        );
        config
    }

    async fn try_load() -> Result<Self, CameraError> {
        let config_path = paths::get_config_path()?;
        Self::load_from(&config_path).await
    }

    pub async fn load_from(config_path: &Path) -> Result<Self, CameraError> {
        if !config_path.exists() {
            warn!(path = %config_path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(config_path)
            .await
            .map_err(|err| CameraError::Config(format!("Failed to read config file: {err}")))?;

        serde_json::from_str(&contents)
            .map_err(|err| CameraError::Config(format!("Failed to parse config.json: {err}")))
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(endpoint) = env::var(ENDPOINT_ENV) {
            let trimmed = endpoint.trim();
            if !trimmed.is_empty() {
                self.camera_endpoint = Some(trimmed.to_string());
            }
        }
        if let Ok(dir) = env::var(DOWNLOAD_DIR_ENV) {
            let trimmed = dir.trim();
            if !trimmed.is_empty() {
                self.download_dir = trimmed.to_string();
            }
        }
    }
}
