use std::path::PathBuf;
use tracing::{debug, warn};

use crate::types::CameraError;

use super::Config;

impl Config {
    /// Directory where downloaded pictures are stored
    pub fn download_path(&self) -> PathBuf {
        PathBuf::from(self.download_dir.trim_end_matches('/'))
    }
}

/// Get the path to the config.json file
/// Looks for config.json in the app directory (parent of backend folder)
pub(super) fn get_config_path() -> Result<PathBuf, CameraError> {
    // Executable is at: app_root/backend/entry
    // Config should be at: app_root/config.json
    if let Ok(exe_path) = std::env::current_exe() {
        debug!(path = %exe_path.display(), "Executable path detected");

        if let Some(backend_dir) = exe_path.parent() {
            if let Some(app_root) = backend_dir.parent() {
                let config_path = app_root.join("config.json");
                debug!(path = %config_path.display(), "Looking for config");
                return Ok(config_path);
            }
        }
    }

    warn!("Using fallback: looking for config.json in current directory");
    Ok(PathBuf::from("config.json"))
}
