use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric status code reported by the camera (or synthesized for transport failures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatusCode(pub i32);

impl StatusCode {
    pub const ANY: Self = Self(1);
    pub const TIMEOUT: Self = Self(2);
    pub const ILLEGAL_ARGUMENT: Self = Self(3);
    pub const ILLEGAL_REQUEST: Self = Self(5);
    pub const ILLEGAL_STATE: Self = Self(7);
    pub const NO_SUCH_METHOD: Self = Self(12);
    pub const UNSUPPORTED_VERSION: Self = Self(14);
    pub const NOT_ACCEPTABLE: Self = Self(406);
    pub const SERVICE_UNAVAILABLE: Self = Self(503);
    pub const CAMERA_NOT_READY: Self = Self(40401);
    pub const DUPLICATE_POLLING: Self = Self(40402);
    pub const STILL_CAPTURING_NOT_FINISHED: Self = Self(40403);
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CameraError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{method} failed with status {code}")]
    Api { method: String, code: StatusCode },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Liveview framing error: {0}")]
    Framing(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Session is not ready for {0}")]
    NotReady(&'static str),

    #[error("No device found within {0} seconds")]
    DiscoveryTimeout(u64),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Stream closed: {0}")]
    StreamClosed(String),

    #[error("Config error: {0}")]
    Config(String),
}

impl CameraError {
    pub fn api(method: impl Into<String>, code: StatusCode) -> Self {
        Self::Api {
            method: method.into(),
            code,
        }
    }

    /// Status code as seen by the retry and capture policies.
    pub fn status_code(&self) -> StatusCode {
        match self {
            CameraError::Api { code, .. } => *code,
            CameraError::Http(err) if err.is_timeout() => StatusCode::TIMEOUT,
            CameraError::InvalidArgument(_) => StatusCode::ILLEGAL_ARGUMENT,
            CameraError::InvalidState(_) | CameraError::NotReady(_) => StatusCode::ILLEGAL_STATE,
            _ => StatusCode::ANY,
        }
    }
}
