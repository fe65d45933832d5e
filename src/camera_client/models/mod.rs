mod device;
mod event;
mod status;

pub use device::{DeviceInfo, CAMERA_SERVICE};
pub use event::{
    CameraState, EvInfo, EventMember, EventSnapshot, Setting, ShootMode, ZoomInfo,
};
pub use status::{Status, StatusStore, StatusUpdate};
