use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::camera_client::models::{EventSnapshot, ShootMode};
use crate::types::{CameraError, StatusCode};

use super::{CameraApi, ZoomDirection, ZoomMovement};

/// Scripted in-memory camera. Records every call by method name.
pub struct FakeCameraApi {
    pub calls: Mutex<Vec<String>>,
    pub method_types: Mutex<Vec<String>>,
    pub liveview_url: String,
    pub pictures: Mutex<VecDeque<Result<Vec<String>, StatusCode>>>,
    /// Pending `getEvent` results; an empty queue blocks the poll forever.
    pub events: Mutex<VecDeque<Result<EventSnapshot, StatusCode>>>,
    pub failures: Mutex<HashMap<&'static str, StatusCode>>,
    /// When set, each `getEvent` waits for one permit before answering.
    pub event_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeCameraApi {
    pub fn new(methods: &[&str]) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            method_types: Mutex::new(methods.iter().map(|m| m.to_string()).collect()),
            liveview_url: "http://camera.local/liveview".to_string(),
            pictures: Mutex::new(VecDeque::new()),
            events: Mutex::new(VecDeque::new()),
            failures: Mutex::new(HashMap::new()),
            event_gate: Mutex::new(None),
        }
    }

    /// Hold every `getEvent` until the returned handle is notified.
    pub fn gate_events(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.event_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn push_event(&self, event: Result<EventSnapshot, StatusCode>) {
        self.events.lock().unwrap().push_back(event);
    }

    pub fn push_picture(&self, result: Result<Vec<String>, StatusCode>) {
        self.pictures.lock().unwrap().push_back(result);
    }

    pub fn fail(&self, method: &'static str, code: StatusCode) {
        self.failures.lock().unwrap().insert(method, code);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(method))
            .count()
    }

    fn record(&self, method: &'static str) -> Result<(), CameraError> {
        self.calls.lock().unwrap().push(method.to_string());
        match self.failures.lock().unwrap().get(method) {
            Some(code) => Err(CameraError::api(method, *code)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CameraApi for FakeCameraApi {
    async fn get_method_types(&self, _version: &str) -> Result<Vec<String>, CameraError> {
        self.record("getMethodTypes")?;
        Ok(self.method_types.lock().unwrap().clone())
    }

    async fn start_rec_mode(&self) -> Result<(), CameraError> {
        self.record("startRecMode")
    }

    async fn start_liveview(&self) -> Result<String, CameraError> {
        self.record("startLiveview")?;
        Ok(self.liveview_url.clone())
    }

    async fn get_postview_image_size(&self) -> Result<String, CameraError> {
        self.record("getPostviewImageSize")?;
        Ok("2M".to_string())
    }

    async fn get_available_postview_image_size(
        &self,
    ) -> Result<(String, Vec<String>), CameraError> {
        self.record("getAvailablePostviewImageSize")?;
        Ok(("2M".to_string(), vec!["2M".to_string(), "Original".to_string()]))
    }

    async fn set_postview_image_size(&self, _size: &str) -> Result<(), CameraError> {
        self.record("setPostviewImageSize")
    }

    async fn act_take_picture(&self) -> Result<Vec<String>, CameraError> {
        self.record("actTakePicture")?;
        let next = self.pictures.lock().unwrap().pop_front();
        match next {
            Some(Ok(urls)) => Ok(urls),
            Some(Err(code)) => Err(CameraError::api("actTakePicture", code)),
            None => Ok(vec!["http://camera.local/postview/pict0001.jpg".to_string()]),
        }
    }

    async fn act_zoom(
        &self,
        _direction: ZoomDirection,
        _movement: ZoomMovement,
    ) -> Result<(), CameraError> {
        self.record("actZoom")
    }

    async fn set_shoot_mode(&self, _mode: &ShootMode) -> Result<(), CameraError> {
        self.record("setShootMode")
    }

    async fn set_self_timer(&self, _seconds: u32) -> Result<(), CameraError> {
        self.record("setSelfTimer")
    }

    async fn get_event(&self, long_polling: bool) -> Result<EventSnapshot, CameraError> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("getEvent({long_polling})"));
        let gate = self.event_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let next = self.events.lock().unwrap().pop_front();
        match next {
            Some(Ok(event)) => Ok(event),
            Some(Err(code)) => Err(CameraError::api("getEvent", code)),
            None => std::future::pending().await,
        }
    }
}
