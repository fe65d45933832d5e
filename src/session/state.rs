use std::fmt;

use serde::Serialize;

use crate::liveview::{Frame, RenderGuard};
use crate::picture::PictureEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Discovering,
    Negotiating,
    Ready,
    LiveViewActive,
}

impl SessionState {
    /// Capability negotiation has succeeded.
    pub fn is_ready(self) -> bool {
        matches!(self, SessionState::Ready | SessionState::LiveViewActive)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Discovering => "discovering",
            SessionState::Negotiating => "negotiating",
            SessionState::Ready => "ready",
            SessionState::LiveViewActive => "liveview",
        };
        f.write_str(name)
    }
}

/// Result of `take_picture` when no command error surfaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Refused locally; nothing was sent.
    Skipped,
    /// The device is still busy with a previous capture.
    InProgress,
    /// One event per returned image URL.
    Captured(Vec<PictureEvent>),
}

/// A decoded frame plus the guard that keeps newer frames out until dropped.
#[derive(Debug)]
pub struct FrameDelivery {
    pub frame: Frame,
    pub guard: RenderGuard,
}
