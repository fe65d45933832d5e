//! Long-polling observer that keeps a `StatusStore` in sync with the camera.
//!
//! The first `getEvent` is a plain query; every following one is a long poll
//! the device holds open until something changes. Each snapshot is diffed
//! against the stored status and one notification fires per changed member.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::camera_client::api::CameraApi;
use crate::camera_client::helpers::{classify_poll_failure, PollFailure};
use crate::camera_client::models::{EventMember, EventSnapshot, StatusStore};
use crate::types::CameraError;

pub const RETRY_LIMIT: u32 = 3;
pub const RETRY_INTERVAL: Duration = Duration::from_secs(3);

pub type ChangeHandler = Box<dyn Fn(EventMember) + Send + Sync>;
pub type StopHandler = Box<dyn FnOnce() + Send>;

#[derive(Default)]
pub struct ObserverListener {
    on_change: Option<ChangeHandler>,
    on_stop: Option<StopHandler>,
}

impl ObserverListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_change(mut self, handler: impl Fn(EventMember) + Send + Sync + 'static) -> Self {
        self.on_change = Some(Box::new(handler));
        self
    }

    /// Fires once when polling gives up on its own. Not called by `stop()`.
    pub fn on_stop(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.on_stop = Some(Box::new(handler));
        self
    }
}

struct Callbacks {
    on_change: ChangeHandler,
    on_stop: StopHandler,
}

/// Holds the callbacks of one run. Emptied exactly once, by whoever stops first.
type ListenerSlot = Arc<Mutex<Option<Callbacks>>>;

struct Running {
    listener: ListenerSlot,
    task: JoinHandle<()>,
}

pub struct EventObserver {
    api: Arc<dyn CameraApi>,
    running: Mutex<Option<Running>>,
}

impl EventObserver {
    pub fn new(api: Arc<dyn CameraApi>) -> Self {
        Self {
            api,
            running: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|running| lock_slot(&running.listener).is_some())
            .unwrap_or(false)
    }

    pub fn start(
        &self,
        status: Arc<StatusStore>,
        listener: ObserverListener,
    ) -> Result<(), CameraError> {
        let (Some(on_change), Some(on_stop)) = (listener.on_change, listener.on_stop) else {
            return Err(CameraError::InvalidArgument("listener"));
        };

        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = running.as_ref() {
            if lock_slot(&current.listener).is_some() {
                return Err(CameraError::InvalidState(
                    "event observer already running".to_string(),
                ));
            }
        }

        status.init_event_params();
        let listener: ListenerSlot = Arc::new(Mutex::new(Some(Callbacks { on_change, on_stop })));
        let task = tokio::spawn(poll_loop(
            Arc::clone(&self.api),
            status,
            Arc::clone(&listener),
        ));
        *running = Some(Running { listener, task });
        info!("Event observer started");
        Ok(())
    }

    /// Stop polling. No change notification fires once this returns.
    pub fn stop(&self) {
        let Some(running) = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };
        // Waits for an in-flight diff cycle to finish.
        let callbacks = lock_slot(&running.listener).take();
        running.task.abort();
        if callbacks.is_some() {
            info!("Event observer stopped");
        }
    }
}

impl Drop for EventObserver {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(api: Arc<dyn CameraApi>, status: Arc<StatusStore>, listener: ListenerSlot) {
    let mut long_polling = false;
    let mut failures = 0u32;

    loop {
        match api.get_event(long_polling).await {
            Ok(event) => {
                failures = 0;
                if !run_diff_cycle(&status, &listener, event).await {
                    return;
                }
                long_polling = true;
            }
            Err(err) => match classify_poll_failure(err.status_code()) {
                PollFailure::Transient => {
                    failures += 1;
                    if failures >= RETRY_LIMIT {
                        error!(error = ?err, failures, "Event polling gave up");
                        finish(&listener);
                        return;
                    }
                    warn!(error = ?err, failures, "Event polling failed, retrying");
                    sleep(RETRY_INTERVAL).await;
                }
                PollFailure::DuplicatePolling => {
                    warn!("Another event poll is already pending on the device");
                    std::future::pending::<()>().await;
                }
                PollFailure::Fatal => {
                    error!(error = ?err, "Event polling failed");
                    finish(&listener);
                    return;
                }
            },
        }
    }
}

/// Diff one snapshot on the blocking pool. Returns `false` once stopped.
async fn run_diff_cycle(
    status: &Arc<StatusStore>,
    listener: &ListenerSlot,
    event: EventSnapshot,
) -> bool {
    let status = Arc::clone(status);
    let listener = Arc::clone(listener);

    let cycle = tokio::task::spawn_blocking(move || {
        let slot = lock_slot(&listener);
        let Some(callbacks) = slot.as_ref() else {
            return false;
        };
        let changed = status.apply_event(&event);
        if !changed.is_empty() {
            debug!(?changed, "Event members changed");
        }
        for member in changed {
            status.publish(Some(member));
            (callbacks.on_change)(member);
        }
        true
    });

    match cycle.await {
        Ok(alive) => alive,
        Err(err) => {
            error!(error = ?err, "Event diff cycle panicked");
            false
        }
    }
}

fn finish(listener: &ListenerSlot) {
    let callbacks = lock_slot(listener).take();
    if let Some(callbacks) = callbacks {
        (callbacks.on_stop)();
    }
}

fn lock_slot(slot: &ListenerSlot) -> std::sync::MutexGuard<'_, Option<Callbacks>> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::sync::mpsc;

    use super::*;
    use crate::camera_client::api::testing::FakeCameraApi;
    use crate::camera_client::models::{CameraState, ZoomInfo};
    use crate::types::StatusCode;

    fn idle() -> EventSnapshot {
        EventSnapshot {
            camera_state: Some(CameraState::Idle),
            ..Default::default()
        }
    }

    fn counting_listener() -> (
        ObserverListener,
        mpsc::UnboundedReceiver<EventMember>,
        Arc<AtomicUsize>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let stops = Arc::new(AtomicUsize::new(0));
        let stop_count = Arc::clone(&stops);
        let listener = ObserverListener::new()
            .on_change(move |member| {
                let _ = tx.send(member);
            })
            .on_stop(move || {
                stop_count.fetch_add(1, Ordering::SeqCst);
            });
        (listener, rx, stops)
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn notifies_only_changed_members() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Ok(idle()));
        api.push_event(Ok(idle()));
        let mut zoomed = idle();
        zoomed.zoom_info = Some(ZoomInfo {
            position: 40,
            number_of_boxes: 1,
            current_box_index: 0,
            position_in_box: 40,
        });
        api.push_event(Ok(zoomed));

        let status = Arc::new(StatusStore::new());
        let observer = EventObserver::new(api.clone());
        let (listener, mut changes, _) = counting_listener();
        observer.start(Arc::clone(&status), listener).unwrap();

        assert_eq!(changes.recv().await, Some(EventMember::CameraStatus));
        assert_eq!(changes.recv().await, Some(EventMember::ZoomInfo));
        assert_eq!(status.snapshot().zoom_info.map(|z| z.position), Some(40));

        while api.count("getEvent") < 4 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            api.calls(),
            vec!["getEvent(false)", "getEvent(true)", "getEvent(true)", "getEvent(true)"]
        );
        assert!(changes.try_recv().is_err());
        observer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn three_timeouts_stop_once_without_a_fourth_request() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        for _ in 0..4 {
            api.push_event(Err(StatusCode::TIMEOUT));
        }
        let observer = EventObserver::new(api.clone());
        let (listener, _changes, stops) = counting_listener();
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        sleep(RETRY_INTERVAL * 10).await;
        assert_eq!(api.count("getEvent"), 3);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!observer.is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn success_resets_the_failure_counter() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Err(StatusCode::SERVICE_UNAVAILABLE));
        api.push_event(Err(StatusCode::CAMERA_NOT_READY));
        api.push_event(Ok(idle()));
        api.push_event(Err(StatusCode::NOT_ACCEPTABLE));
        api.push_event(Err(StatusCode::ILLEGAL_STATE));

        let observer = EventObserver::new(api.clone());
        let (listener, _changes, stops) = counting_listener();
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        sleep(RETRY_INTERVAL * 10).await;
        // Two failures, one success, two failures, then a blocked long poll.
        assert_eq!(api.count("getEvent"), 6);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert!(observer.is_active());
        observer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn retries_wait_the_fixed_interval() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Err(StatusCode::TIMEOUT));
        let observer = EventObserver::new(api.clone());
        let (listener, _changes, _) = counting_listener();
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        settle().await;
        assert_eq!(api.count("getEvent"), 1);
        sleep(RETRY_INTERVAL - Duration::from_millis(100)).await;
        assert_eq!(api.count("getEvent"), 1);
        sleep(Duration::from_millis(200)).await;
        assert_eq!(api.count("getEvent"), 2);
        observer.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_polling_parks_without_stopping() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Err(StatusCode::DUPLICATE_POLLING));
        api.push_event(Ok(idle()));
        let observer = EventObserver::new(api.clone());
        let (listener, _changes, stops) = counting_listener();
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        sleep(RETRY_INTERVAL * 5).await;
        assert_eq!(api.count("getEvent"), 1);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert!(observer.is_active());

        observer.stop();
        assert!(!observer.is_active());
    }

    #[tokio::test]
    async fn fatal_code_stops_immediately() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Err(StatusCode::NO_SUCH_METHOD));
        let observer = EventObserver::new(api.clone());
        let (listener, _changes, stops) = counting_listener();
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        while stops.load(Ordering::SeqCst) == 0 {
            tokio::task::yield_now().await;
        }
        assert_eq!(api.count("getEvent"), 1);
        assert!(!observer.is_active());
    }

    #[tokio::test]
    async fn start_validates_listener_and_state() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        let observer = EventObserver::new(api);
        let status = Arc::new(StatusStore::new());

        let err = observer
            .start(Arc::clone(&status), ObserverListener::new().on_change(|_| {}))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument(_)));

        let (listener, _changes, _) = counting_listener();
        observer.start(Arc::clone(&status), listener).unwrap();
        let (again, _changes, _) = counting_listener();
        assert!(matches!(
            observer.start(Arc::clone(&status), again),
            Err(CameraError::InvalidState(_))
        ));

        observer.stop();
        observer.stop();
        let (restart, _changes, _) = counting_listener();
        observer.start(status, restart).unwrap();
        observer.stop();
    }

    #[tokio::test]
    async fn start_clears_previous_event_members() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        let status = Arc::new(StatusStore::new());
        status.update(|s| {
            s.is_connected = true;
            s.camera_state = Some(CameraState::Recording);
        });

        let observer = EventObserver::new(api);
        let (listener, _changes, _) = counting_listener();
        observer.start(Arc::clone(&status), listener).unwrap();

        let snapshot = status.snapshot();
        assert!(snapshot.camera_state.is_none());
        assert!(snapshot.is_connected);
        observer.stop();
    }

    #[tokio::test]
    async fn response_arriving_after_stop_is_discarded() {
        let api = Arc::new(FakeCameraApi::new(&[]));
        let release = api.gate_events();
        api.push_event(Ok(idle()));
        api.push_event(Err(StatusCode::NO_SUCH_METHOD));

        let status = Arc::new(StatusStore::new());
        let observer = EventObserver::new(api.clone());
        let (listener, mut changes, stops) = counting_listener();
        observer.start(Arc::clone(&status), listener).unwrap();
        while api.count("getEvent") < 1 {
            tokio::task::yield_now().await;
        }

        observer.stop();
        release.notify_one();
        release.notify_one();
        settle().await;
        sleep(Duration::from_millis(50)).await;

        assert!(changes.try_recv().is_err());
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert_eq!(api.count("getEvent"), 1);
        assert!(status.snapshot().camera_state.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_waits_for_a_running_diff_cycle() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Barrier;

        let api = Arc::new(FakeCameraApi::new(&[]));
        api.push_event(Ok(idle()));
        let mut zoomed = idle();
        zoomed.zoom_info = Some(ZoomInfo::default());
        api.push_event(Ok(zoomed));

        let entered = Arc::new(Barrier::new(2));
        let resume = Arc::new(Barrier::new(2));
        let notified = Arc::new(AtomicUsize::new(0));
        let stops = Arc::new(AtomicUsize::new(0));
        let listener = {
            let first = AtomicBool::new(true);
            let (entered, resume) = (Arc::clone(&entered), Arc::clone(&resume));
            let notified = Arc::clone(&notified);
            let stops = Arc::clone(&stops);
            ObserverListener::new()
                .on_change(move |_| {
                    notified.fetch_add(1, Ordering::SeqCst);
                    if first.swap(false, Ordering::SeqCst) {
                        entered.wait();
                        resume.wait();
                    }
                })
                .on_stop(move || {
                    stops.fetch_add(1, Ordering::SeqCst);
                })
        };

        let observer = Arc::new(EventObserver::new(api.clone()));
        observer.start(Arc::new(StatusStore::new()), listener).unwrap();

        let waiter = Arc::clone(&entered);
        tokio::task::spawn_blocking(move || waiter.wait()).await.unwrap();
        let stopping = {
            let observer = Arc::clone(&observer);
            let notified = Arc::clone(&notified);
            tokio::task::spawn_blocking(move || {
                observer.stop();
                notified.load(Ordering::SeqCst)
            })
        };
        sleep(Duration::from_millis(20)).await;
        assert!(!stopping.is_finished());

        let waiter = Arc::clone(&resume);
        tokio::task::spawn_blocking(move || waiter.wait()).await.unwrap();
        let at_stop = stopping.await.unwrap();
        sleep(Duration::from_millis(50)).await;

        assert!(at_stop >= 1);
        assert_eq!(notified.load(Ordering::SeqCst), at_stop);
        assert_eq!(stops.load(Ordering::SeqCst), 0);
        assert!(!observer.is_active());
    }
}
