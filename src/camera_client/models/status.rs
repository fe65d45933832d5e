use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::broadcast;

use super::event::{
    CameraState, EvInfo, EventMember, EventSnapshot, Setting, ShootMode, ZoomInfo,
};

const UPDATE_CHANNEL_CAPACITY: usize = 64;

/// Local view of the camera: device-reported values plus session flags.
#[derive(Debug, Clone, Serialize, Default, PartialEq, Eq)]
pub struct Status {
    pub is_connected: bool,
    pub is_available_connecting: bool,
    pub is_available_shooting: bool,
    pub is_taking_picture: bool,
    pub method_types: BTreeSet<String>,
    pub postview_image_size: Option<String>,
    pub available_postview_sizes: Vec<String>,

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

impl Status {
    /// Whether capability negotiation advertised `method`.
    pub fn supports(&self, method: &str) -> bool {
        self.method_types.contains(method)
    }

    /// Clear everything reported through `getEvent`.
    pub fn init_event_params(&mut self) {
        self.available_apis = None;
        self.camera_state = None;
        self.liveview_available = None;
        self.postview_size = None;
        self.self_timer = None;
        self.shoot_mode = None;
        self.exposure_mode = None;
        self.f_number = None;
        self.shutter_speed = None;
        self.iso_speed_rate = None;
        self.ev_info = None;
        self.program_shift = None;
        self.zoom_info = None;
    }

    /// Apply every member of `event` that differs from the stored value and
    /// return the members that changed, in declaration order.
    pub fn apply_event(&mut self, event: &EventSnapshot) -> Vec<EventMember> {
        let mut changed = Vec::new();

        if replace_if_changed(&mut self.available_apis, &event.available_apis) {
            changed.push(EventMember::AvailableApis);
        }
        if replace_if_changed(&mut self.camera_state, &event.camera_state) {
            changed.push(EventMember::CameraStatus);
        }
        if replace_if_changed(&mut self.liveview_available, &event.liveview_available) {
            changed.push(EventMember::LiveviewAvailable);
        }
        if replace_if_changed(&mut self.postview_size, &event.postview_size) {
            if let Some(size) = &self.postview_size {
                self.postview_image_size = Some(size.current.clone());
                if !size.candidates.is_empty() {
                    self.available_postview_sizes = size.candidates.clone();
                }
            }
            changed.push(EventMember::PostviewSize);
        }
        if replace_if_changed(&mut self.self_timer, &event.self_timer) {
            changed.push(EventMember::SelfTimer);
        }
        if replace_if_changed(&mut self.shoot_mode, &event.shoot_mode) {
            changed.push(EventMember::ShootMode);
        }
        if replace_if_changed(&mut self.exposure_mode, &event.exposure_mode) {
            changed.push(EventMember::ExposureMode);
        }
        if replace_if_changed(&mut self.f_number, &event.f_number) {
            changed.push(EventMember::FNumber);
        }
        if replace_if_changed(&mut self.shutter_speed, &event.shutter_speed) {
            changed.push(EventMember::ShutterSpeed);
        }
        if replace_if_changed(&mut self.iso_speed_rate, &event.iso_speed_rate) {
            changed.push(EventMember::IsoSpeedRate);
        }
        if replace_if_changed(&mut self.ev_info, &event.ev_info) {
            changed.push(EventMember::EvInfo);
        }
        if replace_if_changed(&mut self.program_shift, &event.program_shift) {
            changed.push(EventMember::ProgramShift);
        }
        if replace_if_changed(&mut self.zoom_info, &event.zoom_info) {
            changed.push(EventMember::ZoomInfo);
        }

        changed
    }
}

fn replace_if_changed<T: Clone + PartialEq>(stored: &mut Option<T>, latest: &Option<T>) -> bool {
    if stored == latest {
        return false;
    }
    *stored = latest.clone();
    true
}

/// Published after every status mutation.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: Status,
    pub changed: Option<EventMember>,
}

/// Serializes all writes to the shared `Status` and fans out change notifications.
pub struct StatusStore {
    inner: Mutex<Status>,
    updates: broadcast::Sender<StatusUpdate>,
}

impl StatusStore {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(Status::default()),
            updates,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.updates.subscribe()
    }

    pub fn snapshot(&self) -> Status {
        self.lock().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&Status) -> R) -> R {
        f(&self.lock())
    }

    /// Mutate under the lock and publish the resulting snapshot.
    pub fn update<R>(&self, f: impl FnOnce(&mut Status) -> R) -> R {
        let mut guard = self.lock();
        let result = f(&mut guard);
        self.send(guard.clone(), None);
        result
    }

    /// Like `update`, but publishes only when `f` reports a change.
    pub fn update_if(&self, f: impl FnOnce(&mut Status) -> bool) -> bool {
        let mut guard = self.lock();
        let changed = f(&mut guard);
        if changed {
            self.send(guard.clone(), None);
        }
        changed
    }

    /// Diff one event batch without publishing; the caller notifies per member.
    pub fn apply_event(&self, event: &EventSnapshot) -> Vec<EventMember> {
        self.lock().apply_event(event)
    }

    pub fn init_event_params(&self) {
        self.lock().init_event_params();
    }

    pub fn reset(&self) {
        self.update(|status| *status = Status::default());
    }

    pub fn publish(&self, changed: Option<EventMember>) {
        let status = self.snapshot();
        self.send(status, changed);
    }

    fn send(&self, status: Status, changed: Option<EventMember>) {
        // No subscribers is not an error.
        let _ = self.updates.send(StatusUpdate { status, changed });
    }

    fn lock(&self) -> MutexGuard<'_, Status> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for StatusStore {
    fn default() -> Self {
        Self::new()
    }
}
