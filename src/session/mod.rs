//! Device session: discovery, capability negotiation, live-view and event
//! observation for one camera at a time.

mod capture;
mod state;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::{debug, info, trace, warn};

use crate::camera_client::api::{CameraApi, ZoomDirection, ZoomMovement};
use crate::camera_client::helpers::{ACT_ZOOM, START_REC_MODE};
use crate::camera_client::models::{DeviceInfo, ShootMode, Status, StatusStore, StatusUpdate};
use crate::camera_client::{
    ApiConnector, DeviceFinder, HttpConnector, SsdpDeviceFinder, StaticDeviceFinder,
};
use crate::config::Config;
use crate::event_observer::{EventObserver, ObserverListener};
use crate::liveview::{HttpStreamOpener, LiveviewClient, LiveviewListener, StreamOpener};
use crate::picture::{HttpPictureDownloader, PictureDownloader, PictureEvent};
use crate::types::CameraError;

pub use state::{CaptureOutcome, FrameDelivery, SessionState};

const PICTURE_CHANNEL_CAPACITY: usize = 16;

/// Transports the session drives. Swapped for fakes in tests.
pub struct SessionDeps {
    pub finder: Arc<dyn DeviceFinder>,
    pub connector: Arc<dyn ApiConnector>,
    pub streams: Arc<dyn StreamOpener>,
    pub downloader: Arc<dyn PictureDownloader>,
}

impl SessionDeps {
    /// HTTP transports. A configured endpoint replaces SSDP discovery.
    pub fn http(config: &Config) -> Result<Self, CameraError> {
        let connector = HttpConnector::new(config)?;
        let finder: Arc<dyn DeviceFinder> = match &config.camera_endpoint {
            Some(endpoint) => Arc::new(StaticDeviceFinder::new(endpoint.clone())),
            None => Arc::new(SsdpDeviceFinder::new(connector.http().clone())),
        };
        let downloader = HttpPictureDownloader::new(
            connector.http().clone(),
            config.download_path(),
            config.download_timeout(),
        );
        Ok(Self {
            finder,
            streams: Arc::new(HttpStreamOpener::new()?),
            downloader: Arc::new(downloader),
            connector: Arc::new(connector),
        })
    }
}

#[derive(Default)]
struct Shared {
    state: SessionState,
    device: Option<DeviceInfo>,
    api: Option<Arc<dyn CameraApi>>,
    liveview_url: Option<String>,
    observer: Option<Arc<EventObserver>>,
    discovery: Option<(u64, AbortHandle)>,
    discovery_seq: u64,
    /// Identifies the live-view connection whose callbacks are honored.
    liveview_generation: u64,
}

struct Inner {
    config: Config,
    deps: SessionDeps,
    status: Arc<StatusStore>,
    shared: Mutex<Shared>,
    epoch: AtomicU64,
    liveview: LiveviewClient,
    frames_tx: mpsc::Sender<FrameDelivery>,
    frames_rx: Mutex<Option<mpsc::Receiver<FrameDelivery>>>,
    pictures: broadcast::Sender<PictureEvent>,
}

/// Cheap to clone; all clones drive the same session.
#[derive(Clone)]
pub struct DeviceSession {
    inner: Arc<Inner>,
}

impl DeviceSession {
    pub fn new(config: Config, deps: SessionDeps) -> Self {
        let liveview =
            LiveviewClient::new(Arc::clone(&deps.streams), config.liveview_stall_timeout());
        let (frames_tx, frames_rx) = mpsc::channel(1);
        let (pictures, _) = broadcast::channel(PICTURE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                config,
                deps,
                status: Arc::new(StatusStore::new()),
                shared: Mutex::new(Shared::default()),
                epoch: AtomicU64::new(0),
                liveview,
                frames_tx,
                frames_rx: Mutex::new(Some(frames_rx)),
                pictures,
            }),
        }
    }

    pub fn with_http(config: Config) -> Result<Self, CameraError> {
        let deps = SessionDeps::http(&config)?;
        Ok(Self::new(config, deps))
    }

    pub fn state(&self) -> SessionState {
        self.shared().state
    }

    pub fn device(&self) -> Option<DeviceInfo> {
        self.shared().device.clone()
    }

    pub fn status(&self) -> Status {
        self.inner.status.snapshot()
    }

    pub fn liveview_url(&self) -> Option<String> {
        self.shared().liveview_url.clone()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.inner.status.subscribe()
    }

    pub fn subscribe_pictures(&self) -> broadcast::Receiver<PictureEvent> {
        self.inner.pictures.subscribe()
    }

    /// The single consumer end of the frame channel. `None` once taken.
    pub fn take_frames(&self) -> Option<mpsc::Receiver<FrameDelivery>> {
        self.inner
            .frames_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn is_event_observer_active(&self) -> bool {
        self.shared()
            .observer
            .as_ref()
            .map(|observer| observer.is_active())
            .unwrap_or(false)
    }

    /// Search for a camera. A newer call cancels this one, which then
    /// resolves with `Cancelled` and leaves the session untouched.
    ///
    /// Any device already held is dropped first, as with `refresh`.
    pub async fn start_discovery(&self, timeout: Duration) -> Result<DeviceInfo, CameraError> {
        if !matches!(self.state(), SessionState::Idle | SessionState::Discovering) {
            info!("Dropping current device for a new discovery");
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            reset(&self.inner);
        }

        let finder = Arc::clone(&self.inner.deps.finder);
        let task = tokio::spawn(async move { finder.search(timeout).await });

        let (seq, epoch) = {
            let mut shared = self.shared();
            shared.discovery_seq += 1;
            let seq = shared.discovery_seq;
            if let Some((_, prior)) = shared.discovery.replace((seq, task.abort_handle())) {
                prior.abort();
                debug!("Cancelled previous discovery");
            }
            shared.state = SessionState::Discovering;
            (seq, self.epoch())
        };
        info!(timeout_secs = timeout.as_secs(), "Searching for camera");

        let result = match task.await {
            Ok(result) => result,
            Err(err) if err.is_cancelled() => return Err(CameraError::Cancelled),
            Err(err) => Err(CameraError::InvalidState(format!("discovery task failed: {err}"))),
        };

        let mut shared = self.shared();
        let current = shared.discovery.as_ref().map(|(id, _)| *id) == Some(seq);
        if !current || epoch != self.epoch() {
            return Err(CameraError::Cancelled);
        }
        shared.discovery = None;

        let connected = result.and_then(|device| {
            let endpoint = device.camera_endpoint().ok_or_else(|| {
                CameraError::InvalidResponse("device has no camera endpoint".to_string())
            })?;
            let api = self.inner.deps.connector.connect(endpoint)?;
            Ok((device, api))
        });

        match connected {
            Ok((device, api)) => {
                info!(
                    device = %device.display_name(),
                    location = device.location.as_deref().unwrap_or("-"),
                    "Camera found"
                );
                shared.device = Some(device.clone());
                shared.api = Some(api);
                shared.liveview_url = None;
                shared.state = SessionState::Negotiating;
                drop(shared);
                self.inner.status.update(|status| {
                    status.is_available_connecting = true;
                    status.method_types.clear();
                });
                Ok(device)
            }
            Err(err) => {
                warn!(error = ?err, "Discovery failed");
                shared.state = SessionState::Idle;
                Err(err)
            }
        }
    }

    /// Fetch the list of methods the device supports and become `Ready`.
    pub async fn negotiate_capabilities(&self) -> Result<(), CameraError> {
        let (api, epoch) = {
            let shared = self.shared();
            let negotiable =
                shared.state == SessionState::Negotiating || shared.state.is_ready();
            match &shared.api {
                Some(api) if negotiable => (Arc::clone(api), self.epoch()),
                _ => return Err(CameraError::NotReady("negotiate_capabilities")),
            }
        };

        let methods = match api.get_method_types(&self.inner.config.api_version).await {
            Ok(methods) => methods,
            Err(err) => {
                warn!(error = ?err, "Capability negotiation failed");
                return Err(err);
            }
        };

        {
            let mut shared = self.shared();
            if epoch != self.epoch() {
                return Err(CameraError::Cancelled);
            }
            if shared.state == SessionState::Negotiating {
                shared.state = SessionState::Ready;
            }
        }
        info!(count = methods.len(), "Negotiated camera capabilities");
        self.inner.status.update(|status| {
            status.method_types = methods.into_iter().collect();
        });
        Ok(())
    }

    /// Ask the device for a live-view stream and remember its URL.
    pub async fn start_liveview(&self) -> Result<String, CameraError> {
        let (api, epoch) = self.ready_api("start_liveview")?;

        if self.inner.status.read(|status| status.supports(START_REC_MODE)) {
            if let Err(err) = api.start_rec_mode().await {
                warn!(error = ?err, "startRecMode failed");
                return Err(err);
            }
        }
        let url = match api.start_liveview().await {
            Ok(url) => url,
            Err(err) => {
                warn!(error = ?err, "startLiveview failed");
                return Err(err);
            }
        };

        {
            let mut shared = self.shared();
            if epoch != self.epoch() {
                return Err(CameraError::Cancelled);
            }
            shared.liveview_url = Some(url.clone());
            shared.state = SessionState::LiveViewActive;
        }
        info!(url = %url, "Liveview started");
        self.inner.status.update(|status| status.is_connected = true);

        refresh_postview_sizes(&self.inner, &*api).await;
        Ok(url)
    }

    /// Open the stream behind the live-view URL.
    ///
    /// Callbacks from an earlier connection are ignored from here on.
    pub fn connect_liveview(&self) -> Result<(), CameraError> {
        let mut shared = self.shared();
        let url = match (&shared.liveview_url, shared.state.is_ready()) {
            (Some(url), true) => url.clone(),
            _ => return Err(CameraError::NotReady("connect_liveview")),
        };
        let generation = shared.liveview_generation + 1;
        let listener = self.liveview_listener(self.epoch(), generation);

        // Callbacks lock `shared`, so none observe the old generation.
        self.inner.liveview.open_connection(&url, listener)?;
        shared.liveview_generation = generation;
        shared.state = SessionState::LiveViewActive;
        Ok(())
    }

    fn liveview_listener(&self, epoch: u64, generation: u64) -> LiveviewListener {
        let weak = Arc::downgrade(&self.inner);
        let first_frame = Arc::new(AtomicBool::new(true));
        let frames_tx = self.inner.frames_tx.clone();
        let closed_weak = weak.clone();

        LiveviewListener::new()
            .on_frame(move |frame, guard| {
                if first_frame.swap(false, Ordering::AcqRel) {
                    tokio::spawn(on_first_frame(weak.clone(), epoch, generation));
                }
                if let Err(err) = frames_tx.try_send(FrameDelivery { frame, guard }) {
                    // Dropping the delivery releases the render guard.
                    trace!(error = %err, "Frame not delivered");
                }
            })
            .on_closed(move || on_liveview_closed(&closed_weak, epoch, generation))
    }

    /// Stop streaming but keep the device session.
    pub fn close_liveview(&self) {
        {
            let mut shared = self.shared();
            shared.liveview_generation += 1;
            if shared.state == SessionState::LiveViewActive {
                shared.state = SessionState::Ready;
            }
        }
        self.inner.liveview.close_connection();
        self.inner
            .status
            .update_if(|status| std::mem::replace(&mut status.is_available_shooting, false));
    }

    pub fn start_event_observer(&self) -> Result<(), CameraError> {
        let (api, epoch) = self.ready_api("start_event_observer")?;
        let observer = {
            let mut shared = self.shared();
            Arc::clone(
                shared
                    .observer
                    .get_or_insert_with(|| Arc::new(EventObserver::new(api))),
            )
        };

        let weak = Arc::downgrade(&self.inner);
        let listener = ObserverListener::new()
            .on_change(|member| debug!(?member, "Camera status changed"))
            .on_stop(move || {
                warn!("Event observation stopped");
                if let Some(inner) = weak.upgrade() {
                    terminate(&inner, epoch);
                }
            });
        observer.start(Arc::clone(&self.inner.status), listener)
    }

    pub fn stop_event_observer(&self) {
        let observer = self.shared().observer.take();
        if let Some(observer) = observer {
            observer.stop();
        }
    }

    /// Full bring-up: discover, negotiate, start and open live-view, observe events.
    pub async fn connect(&self) -> Result<DeviceInfo, CameraError> {
        let device = self.start_discovery(self.inner.config.discovery_timeout()).await?;
        self.negotiate_capabilities().await?;
        self.start_liveview().await?;
        self.connect_liveview()?;
        self.start_event_observer()?;
        Ok(device)
    }

    /// Zoom is sent even when the device did not advertise it.
    pub async fn zoom(
        &self,
        direction: ZoomDirection,
        movement: ZoomMovement,
    ) -> Result<(), CameraError> {
        let (api, _) = self.ready_api("zoom")?;
        if !self.inner.status.read(|status| status.supports(ACT_ZOOM)) {
            warn!("actZoom is not advertised by the camera");
        }
        api.act_zoom(direction, movement).await.inspect_err(|err| {
            warn!(error = ?err, ?direction, ?movement, "Zoom failed");
        })
    }

    pub async fn set_shoot_mode(&self, mode: ShootMode) -> Result<(), CameraError> {
        let (api, _) = self.ready_api("set_shoot_mode")?;
        api.set_shoot_mode(&mode).await.inspect_err(|err| {
            warn!(error = ?err, mode = %mode, "setShootMode failed");
        })
    }

    pub async fn set_self_timer(&self, seconds: u32) -> Result<(), CameraError> {
        let (api, _) = self.ready_api("set_self_timer")?;
        api.set_self_timer(seconds).await.inspect_err(|err| {
            warn!(error = ?err, seconds, "setSelfTimer failed");
        })
    }

    /// The requested size is stored locally before the command is sent.
    pub async fn set_postview_image_size(&self, size: &str) -> Result<(), CameraError> {
        if size.trim().is_empty() {
            return Err(CameraError::InvalidArgument("size"));
        }
        let (api, _) = self.ready_api("set_postview_image_size")?;
        self.inner
            .status
            .update(|status| status.postview_image_size = Some(size.to_string()));
        api.set_postview_image_size(size).await.inspect_err(|err| {
            warn!(error = ?err, size, "setPostviewImageSize failed");
        })
    }

    /// Drop the device and return to `Idle`. Safe to call repeatedly.
    pub fn refresh(&self) {
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        reset(&self.inner);
        info!("Session refreshed");
    }

    fn ready_api(
        &self,
        operation: &'static str,
    ) -> Result<(Arc<dyn CameraApi>, u64), CameraError> {
        let shared = self.shared();
        match (&shared.api, shared.state.is_ready()) {
            (Some(api), true) => Ok((Arc::clone(api), self.epoch())),
            _ => Err(CameraError::NotReady(operation)),
        }
    }

    fn epoch(&self) -> u64 {
        self.inner.epoch.load(Ordering::Acquire)
    }

    fn shared(&self) -> MutexGuard<'_, Shared> {
        lock_shared(&self.inner)
    }
}

fn lock_shared(inner: &Inner) -> MutexGuard<'_, Shared> {
    inner.shared.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn refresh_postview_sizes(inner: &Inner, api: &dyn CameraApi) {
    match api.get_available_postview_image_size().await {
        Ok((current, sizes)) => inner.status.update(|status| {
            status.postview_image_size = Some(current);
            status.available_postview_sizes = sizes;
        }),
        Err(err) => debug!(error = ?err, "Postview sizes unavailable"),
    }
}

fn liveview_is_current(inner: &Inner, epoch: u64, generation: u64) -> bool {
    inner.epoch.load(Ordering::Acquire) == epoch
        && lock_shared(inner).liveview_generation == generation
}

async fn on_first_frame(weak: Weak<Inner>, epoch: u64, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if !liveview_is_current(&inner, epoch, generation) {
        return;
    }
    info!("First liveview frame received");
    inner
        .status
        .update(|status| status.is_available_shooting = true);

    let Some(api) = lock_shared(&inner).api.clone() else {
        return;
    };
    match api.get_method_types(&inner.config.api_version).await {
        Ok(methods) if liveview_is_current(&inner, epoch, generation) => {
            inner
                .status
                .update(|status| status.method_types = methods.into_iter().collect());
        }
        Ok(_) => return,
        Err(err) => debug!(error = ?err, "Method list refresh failed"),
    }
    refresh_postview_sizes(&inner, &*api).await;
}

fn on_liveview_closed(weak: &Weak<Inner>, epoch: u64, generation: u64) {
    let Some(inner) = weak.upgrade() else {
        return;
    };
    let unexpected = {
        let shared = lock_shared(&inner);
        if shared.liveview_generation != generation {
            trace!(generation, "Ignoring close of a replaced liveview connection");
            return;
        }
        shared.state == SessionState::LiveViewActive
    };
    if unexpected {
        warn!("Liveview stream ended");
        terminate(&inner, epoch);
    } else {
        inner
            .status
            .update_if(|status| std::mem::replace(&mut status.is_available_shooting, false));
    }
}

/// Stream or poll termination: back to `Idle` unless the epoch already moved on.
fn terminate(inner: &Inner, epoch: u64) {
    if inner
        .epoch
        .compare_exchange(epoch, epoch + 1, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    reset(inner);
}

fn reset(inner: &Inner) {
    let (discovery, observer) = {
        let mut shared = lock_shared(inner);
        let discovery = shared.discovery.take();
        let observer = shared.observer.take();
        shared.device = None;
        shared.api = None;
        shared.liveview_url = None;
        shared.liveview_generation += 1;
        shared.state = SessionState::Idle;
        (discovery, observer)
    };
    if let Some((_, handle)) = discovery {
        handle.abort();
    }
    if let Some(observer) = observer {
        observer.stop();
    }
    inner.liveview.close_connection();
    inner.status.reset();
}
