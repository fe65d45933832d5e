pub mod camera_client;
pub mod config;
pub mod event_observer;
pub mod liveview;
pub mod picture;
pub mod session;
pub mod types;

pub use camera_client::models::{DeviceInfo, EventMember, Status, StatusUpdate};
pub use config::Config;
pub use session::{CaptureOutcome, DeviceSession, SessionDeps, SessionState};
pub use types::{CameraError, StatusCode};
