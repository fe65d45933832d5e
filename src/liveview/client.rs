use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::types::CameraError;

use super::framer::{Frame, StreamFramer, COMMON_HEADER_LEN, PAYLOAD_HEADER_LEN};
use super::reader::{ChunkReader, StreamOpener};

pub type FrameHandler = Box<dyn Fn(Frame, RenderGuard) + Send + Sync>;
pub type ClosedHandler = Box<dyn FnOnce() + Send>;

/// Callbacks for one live-view connection. Both are required.
#[derive(Default)]
pub struct LiveviewListener {
    on_frame: Option<FrameHandler>,
    on_closed: Option<ClosedHandler>,
}

impl LiveviewListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame(mut self, handler: impl Fn(Frame, RenderGuard) + Send + Sync + 'static) -> Self {
        self.on_frame = Some(Box::new(handler));
        self
    }

    pub fn on_closed(mut self, handler: impl FnOnce() + Send + 'static) -> Self {
        self.on_closed = Some(Box::new(handler));
        self
    }
}

/// Set while a delivered frame is still being rendered.
#[derive(Clone, Default)]
pub struct FrameGate {
    busy: Arc<AtomicBool>,
}

impl FrameGate {
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn try_acquire(&self) -> Option<RenderGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RenderGuard {
                busy: Arc::clone(&self.busy),
            })
    }
}

/// Held by the renderer; dropping it lets the next frame through.
#[derive(Debug)]
pub struct RenderGuard {
    busy: Arc<AtomicBool>,
}

impl RenderGuard {
    pub fn finish(self) {}
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

struct Active {
    open: Arc<AtomicBool>,
    gate: FrameGate,
}

/// Maintains one live-view connection and decodes frames from it.
pub struct LiveviewClient {
    opener: Arc<dyn StreamOpener>,
    current: Mutex<Option<Active>>,
    dropped: Arc<AtomicU64>,
    stall_timeout: Duration,
}

impl LiveviewClient {
    pub fn new(opener: Arc<dyn StreamOpener>, stall_timeout: Duration) -> Self {
        Self {
            opener,
            current: Mutex::new(None),
            dropped: Arc::new(AtomicU64::new(0)),
            stall_timeout,
        }
    }

    pub fn is_open(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.open.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Whether a frame of the latest connection is still being rendered.
    pub fn is_frame_in_progress(&self) -> bool {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|active| active.gate.is_busy())
            .unwrap_or(false)
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Start streaming from `url`. `on_closed` fires exactly once when the
    /// connection ends for any reason.
    pub fn open_connection(
        &self,
        url: &str,
        listener: LiveviewListener,
    ) -> Result<JoinHandle<()>, CameraError> {
        if url.trim().is_empty() {
            return Err(CameraError::InvalidArgument("url"));
        }
        let (Some(on_frame), Some(on_closed)) = (listener.on_frame, listener.on_closed) else {
            return Err(CameraError::InvalidArgument("listener"));
        };

        // Each connection gets its own gate so a closing one cannot hold
        // back frames of its successor.
        let (open, gate) = {
            let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
            if current
                .as_ref()
                .map(|active| active.open.load(Ordering::Acquire))
                .unwrap_or(false)
            {
                return Err(CameraError::InvalidState(
                    "liveview connection already open".to_string(),
                ));
            }
            let open = Arc::new(AtomicBool::new(true));
            let gate = FrameGate::default();
            *current = Some(Active {
                open: Arc::clone(&open),
                gate: gate.clone(),
            });
            (open, gate)
        };

        let connection = Connection {
            opener: Arc::clone(&self.opener),
            url: url.to_string(),
            open,
            gate,
            dropped: Arc::clone(&self.dropped),
            stall_timeout: self.stall_timeout,
        };

        Ok(tokio::spawn(async move {
            match connection.run(&on_frame).await {
                Ok(()) => info!("Liveview connection closed"),
                Err(CameraError::StreamClosed(reason)) => {
                    info!(reason = %reason, "Liveview connection closed")
                }
                Err(err) => warn!(error = ?err, "Liveview connection failed"),
            }
            connection.open.store(false, Ordering::Release);
            on_closed();
        }))
    }

    /// Ask the read loop to stop at its next read boundary.
    pub fn close_connection(&self) {
        let current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(active) = current.as_ref() {
            if active.open.swap(false, Ordering::AcqRel) {
                debug!("Closing liveview connection");
            }
        }
    }
}

struct Connection {
    opener: Arc<dyn StreamOpener>,
    url: String,
    open: Arc<AtomicBool>,
    gate: FrameGate,
    dropped: Arc<AtomicU64>,
    stall_timeout: Duration,
}

impl Connection {
    async fn run(&self, on_frame: &FrameHandler) -> Result<(), CameraError> {
        let source = self.opener.open(&self.url).await?;
        let mut reader = ChunkReader::new(source, self.stall_timeout);

        loop {
            let frame = self.next_frame(&mut reader).await?;
            if !self.open.load(Ordering::Acquire) {
                return Ok(());
            }
            match self.gate.try_acquire() {
                Some(guard) => on_frame(frame, guard),
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    trace!(sequence = frame.sequence, "Renderer busy, dropping frame");
                }
            }
        }
    }

    /// Accumulate one packet, validating each header before reading past
    /// it, then decode the whole packet.
    async fn next_frame(&self, reader: &mut ChunkReader) -> Result<Frame, CameraError> {
        let mut packet = reader.read_exact(COMMON_HEADER_LEN, &self.open).await?;
        StreamFramer::parse_common_header(&packet)?;

        packet.extend(reader.read_exact(PAYLOAD_HEADER_LEN, &self.open).await?);
        let header = StreamFramer::parse_payload_header(&packet[COMMON_HEADER_LEN..])?;

        packet.extend(reader.read_exact(header.body_len(), &self.open).await?);
        let (frame, _) = StreamFramer::decode(&packet)?;
        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::super::framer::encode_packet;
    use super::super::reader::testing::ScriptedSource;
    use super::super::reader::ByteSource;
    use super::*;

    /// Hands out one scripted source per `open`.
    struct ScriptedOpener {
        sources: StdMutex<VecDeque<ScriptedSource>>,
    }

    impl ScriptedOpener {
        fn new(chunks: Vec<Vec<u8>>, hang_at_end: bool) -> Arc<Self> {
            Self::sequence(vec![ScriptedSource::new(chunks, hang_at_end)])
        }

        fn sequence(sources: Vec<ScriptedSource>) -> Arc<Self> {
            Arc::new(Self {
                sources: StdMutex::new(sources.into()),
            })
        }
    }

    #[async_trait]
    impl StreamOpener for ScriptedOpener {
        async fn open(&self, _url: &str) -> Result<Box<dyn ByteSource>, CameraError> {
            match self.sources.lock().unwrap().pop_front() {
                Some(source) => Ok(Box::new(source)),
                None => Err(CameraError::StreamClosed("already consumed".to_string())),
            }
        }
    }

    fn closed_signal() -> (oneshot::Receiver<()>, impl FnOnce() + Send + 'static) {
        let (tx, rx) = oneshot::channel();
        (rx, move || {
            let _ = tx.send(());
        })
    }

    #[tokio::test]
    async fn rejects_missing_arguments() {
        let client = LiveviewClient::new(ScriptedOpener::new(vec![], false), Duration::from_secs(1));

        let err = client
            .open_connection("", LiveviewListener::new().on_frame(|_, _| {}).on_closed(|| {}))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument("url")));

        let err = client
            .open_connection("http://cam/liveview", LiveviewListener::new().on_frame(|_, _| {}))
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidArgument("listener")));
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn delivers_frames_in_order_then_closes_once() {
        let mut stream = encode_packet(1, b"first", 3);
        stream.extend(encode_packet(2, b"second", 0));
        // Split at awkward boundaries.
        let chunks = stream.chunks(50).map(|c| c.to_vec()).collect();
        let client = LiveviewClient::new(ScriptedOpener::new(chunks, false), Duration::from_secs(1));

        let frames = Arc::new(StdMutex::new(Vec::new()));
        let closed = Arc::new(AtomicUsize::new(0));
        let (done, signal) = closed_signal();
        let sink = Arc::clone(&frames);
        let closed_count = Arc::clone(&closed);

        let handle = client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(move |frame, guard| {
                        sink.lock().unwrap().push(frame.data.clone());
                        guard.finish();
                    })
                    .on_closed(move || {
                        closed_count.fetch_add(1, Ordering::SeqCst);
                        signal();
                    }),
            )
            .unwrap();

        done.await.unwrap();
        handle.await.unwrap();
        let frames = frames.lock().unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(&frames[0][..], b"first");
        assert_eq!(&frames[1][..], b"second");
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn busy_renderer_drops_frames_without_closing() {
        let mut stream = Vec::new();
        for seq in 0..4 {
            stream.extend(encode_packet(seq, &[seq as u8; 16], 0));
        }
        let client = LiveviewClient::new(
            ScriptedOpener::new(vec![stream], true),
            Duration::from_secs(30),
        );

        let held = Arc::new(StdMutex::new(Vec::new()));
        let delivered = Arc::clone(&held);
        let (done, signal) = closed_signal();
        client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(move |frame, guard| {
                        // Never finish rendering: keep the guard alive.
                        delivered.lock().unwrap().push((frame.sequence, guard));
                    })
                    .on_closed(signal),
            )
            .unwrap();

        while client.dropped_frames() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(client.is_open());
        assert!(client.is_frame_in_progress());
        assert_eq!(held.lock().unwrap().len(), 1);
        assert_eq!(held.lock().unwrap()[0].0, 0);

        held.lock().unwrap().clear();
        assert!(!client.is_frame_in_progress());

        client.close_connection();
        done.await.unwrap();
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn framing_error_closes_connection() {
        let mut stream = encode_packet(1, b"ok", 0);
        let mut bad = encode_packet(2, b"bad", 0);
        bad[0] = 0x00;
        stream.extend(bad);
        let client = LiveviewClient::new(ScriptedOpener::new(vec![stream], true), Duration::from_secs(30));

        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let (done, signal) = closed_signal();
        client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(move |_, _| {
                        seen.fetch_add(1, Ordering::SeqCst);
                    })
                    .on_closed(signal),
            )
            .unwrap();

        done.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn second_open_is_rejected_and_close_is_idempotent() {
        let client = LiveviewClient::new(ScriptedOpener::new(vec![], true), Duration::from_secs(30));
        let closed = Arc::new(AtomicUsize::new(0));
        let closed_count = Arc::clone(&closed);
        let (done, signal) = closed_signal();

        let handle = client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(|_, _| {})
                    .on_closed(move || {
                        closed_count.fetch_add(1, Ordering::SeqCst);
                        signal();
                    }),
            )
            .unwrap();

        let err = client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new().on_frame(|_, _| {}).on_closed(|| {}),
            )
            .unwrap_err();
        assert!(matches!(err, CameraError::InvalidState(_)));

        client.close_connection();
        client.close_connection();
        done.await.unwrap();
        handle.await.unwrap();
        client.close_connection();
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn reopened_connection_is_not_gated_by_the_previous_one() {
        let first = ScriptedSource::new(vec![encode_packet(1, b"old", 0)], true);
        let second = ScriptedSource::new(vec![encode_packet(1, b"new", 0)], true);
        let client = LiveviewClient::new(
            ScriptedOpener::sequence(vec![first, second]),
            Duration::from_secs(30),
        );

        let (old_frame_tx, mut old_frame_rx) = tokio::sync::mpsc::unbounded_channel();
        let (old_done, old_signal) = closed_signal();
        client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(move |frame, guard| {
                        // Keep rendering the old frame past the reconnect.
                        let _ = old_frame_tx.send((frame, guard));
                    })
                    .on_closed(old_signal),
            )
            .unwrap();
        let (old_frame, old_guard) = old_frame_rx.recv().await.unwrap();
        assert_eq!(&old_frame.data[..], b"old");

        client.close_connection();
        old_done.await.unwrap();

        let (new_frame_tx, mut new_frame_rx) = tokio::sync::mpsc::unbounded_channel();
        let (new_done, new_signal) = closed_signal();
        client
            .open_connection(
                "http://cam/liveview",
                LiveviewListener::new()
                    .on_frame(move |frame, guard| {
                        let _ = new_frame_tx.send(frame);
                        guard.finish();
                    })
                    .on_closed(new_signal),
            )
            .unwrap();

        let frame = new_frame_rx.recv().await.unwrap();
        assert_eq!(&frame.data[..], b"new");
        assert_eq!(client.dropped_frames(), 0);
        drop(old_guard);

        client.close_connection();
        new_done.await.unwrap();
    }
}
