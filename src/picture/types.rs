//! Picture transfer results.

use std::path::PathBuf;

use serde::Serialize;

use crate::types::CameraError;

/// Why a picture could not be saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DownloadFailure {
    Network,
    Storage,
    Unknown,
}

impl DownloadFailure {
    pub fn from_error(err: &CameraError) -> Self {
        match err {
            CameraError::Http(_) | CameraError::StreamClosed(_) => DownloadFailure::Network,
            CameraError::Io(_) => DownloadFailure::Storage,
            _ => DownloadFailure::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PictureEvent {
    Saved {
        url: String,
        path: PathBuf,
        original_size: bool,
    },
    Failed {
        url: String,
        failure: DownloadFailure,
        original_size: bool,
    },
}

impl PictureEvent {
    pub fn url(&self) -> &str {
        match self {
            PictureEvent::Saved { url, .. } | PictureEvent::Failed { url, .. } => url,
        }
    }

    pub fn is_saved(&self) -> bool {
        matches!(self, PictureEvent::Saved { .. })
    }
}
