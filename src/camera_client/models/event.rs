use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Status members tracked by the event observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventMember {
    AvailableApis,
    CameraStatus,
    LiveviewAvailable,
    PostviewSize,
    SelfTimer,
    ShootMode,
    ExposureMode,
    FNumber,
    ShutterSpeed,
    IsoSpeedRate,
    EvInfo,
    ProgramShift,
    ZoomInfo,
}

/// Camera state as reported by the `cameraStatus` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraState {
    Idle,
    StillCapturing,
    Recording,
    NotReady,
    Other(String),
}

impl CameraState {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "IDLE" => CameraState::Idle,
            "StillCapturing" => CameraState::StillCapturing,
            "MovieRecording" => CameraState::Recording,
            "NotReady" => CameraState::NotReady,
            other => CameraState::Other(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShootMode {
    Still,
    Movie,
    Other(String),
}

impl ShootMode {
    pub fn from_raw(raw: &str) -> Self {
        match raw {
            "still" => ShootMode::Still,
            "movie" => ShootMode::Movie,
            other => ShootMode::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ShootMode::Still => "still",
            ShootMode::Movie => "movie",
            ShootMode::Other(raw) => raw,
        }
    }
}

impl fmt::Display for ShootMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A selectable camera parameter: current value plus allowed candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Setting<T> {
    pub current: T,
    pub candidates: Vec<T>,
}

impl<T> Setting<T> {
    pub fn new(current: T, candidates: Vec<T>) -> Self {
        Self {
            current,
            candidates,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub struct ZoomInfo {
    /// Overall position, 0..=100.
    pub position: u8,
    pub number_of_boxes: u32,
    pub current_box_index: u32,
    pub position_in_box: u8,
}

/// Exposure compensation range, expressed in step indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EvInfo {
    pub current_index: i32,
    pub min_index: i32,
    pub max_index: i32,
    pub step_definition: i32,
}

/// One `getEvent` result. Absent members are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct EventSnapshot {
    pub available_apis: Option<BTreeSet<String>>,
    pub camera_state: Option<CameraState>,
    pub liveview_available: Option<bool>,
    pub postview_size: Option<Setting<String>>,
    pub self_timer: Option<Setting<u32>>,
    pub shoot_mode: Option<Setting<ShootMode>>,
    pub exposure_mode: Option<Setting<String>>,
    pub f_number: Option<Setting<String>>,
    pub shutter_speed: Option<Setting<String>>,
    pub iso_speed_rate: Option<Setting<String>>,
    pub ev_info: Option<EvInfo>,
    pub program_shift: Option<bool>,
    pub zoom_info: Option<ZoomInfo>,
}
