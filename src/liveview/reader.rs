use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::types::CameraError;

pub const READ_BUFFER_SIZE: usize = 8192;
const STALL_BACKOFF: Duration = Duration::from_millis(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Raw body of a live-view connection.
#[async_trait]
pub trait ByteSource: Send {
    /// `Ok(None)` once the peer has closed the stream. An empty chunk is a
    /// stall, not an end.
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, CameraError>;
}

#[async_trait]
impl ByteSource for reqwest::Response {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>, CameraError> {
        Ok(self.chunk().await?)
    }
}

/// Opens the byte stream behind a live-view URL.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, CameraError>;
}

pub struct HttpStreamOpener {
    http: Client,
}

impl HttpStreamOpener {
    /// The stream is unbounded, so only the connect phase gets a timeout.
    pub fn new() -> Result<Self, CameraError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(CameraError::Http)?;
        Ok(Self { http })
    }
}

#[async_trait]
impl StreamOpener for HttpStreamOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn ByteSource>, CameraError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::StreamClosed(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }
        debug!(url, "Connected liveview stream");
        Ok(Box::new(response))
    }
}

/// Accumulates exact byte counts from a chunked source through a fixed buffer.
pub struct ChunkReader {
    source: Box<dyn ByteSource>,
    pending: Bytes,
    buffer: Box<[u8]>,
    stall_timeout: Duration,
}

impl ChunkReader {
    pub fn new(source: Box<dyn ByteSource>, stall_timeout: Duration) -> Self {
        Self {
            source,
            pending: Bytes::new(),
            buffer: vec![0u8; READ_BUFFER_SIZE].into_boxed_slice(),
            stall_timeout,
        }
    }

    /// Read exactly `len` bytes. `open` is checked before every read.
    pub async fn read_exact(&mut self, len: usize, open: &AtomicBool) -> Result<Vec<u8>, CameraError> {
        let mut output = Vec::with_capacity(len);
        let mut stalled_since: Option<Instant> = None;

        while output.len() < len {
            if !open.load(Ordering::Acquire) {
                return Err(CameraError::StreamClosed("closed by client".to_string()));
            }

            let want = (len - output.len()).min(self.buffer.len());
            let read = self.fill(want).await?;
            if read > 0 {
                output.extend_from_slice(&self.buffer[..read]);
                stalled_since = None;
                continue;
            }

            let since = *stalled_since.get_or_insert_with(|| {
                debug!("No data has been read by this trial");
                Instant::now()
            });
            if since.elapsed() >= self.stall_timeout {
                return Err(CameraError::StreamClosed(format!(
                    "no data for {:?}",
                    self.stall_timeout
                )));
            }
            sleep(STALL_BACKOFF).await;
        }

        Ok(output)
    }

    async fn fill(&mut self, want: usize) -> Result<usize, CameraError> {
        if self.pending.is_empty() {
            match self.source.next_chunk().await? {
                Some(chunk) => self.pending = chunk,
                None => return Err(CameraError::StreamClosed("closed by peer".to_string())),
            }
        }
        let n = want.min(self.pending.len());
        let chunk = self.pending.split_to(n);
        self.buffer[..n].copy_from_slice(&chunk);
        Ok(n)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;

    #[tokio::test]
    async fn accumulates_across_chunks_and_empty_reads() {
        let source = ScriptedSource::new(vec![vec![1, 2], vec![], vec![3, 4, 5], vec![6]], false);
        let mut reader = ChunkReader::new(Box::new(source), Duration::from_secs(1));
        let open = AtomicBool::new(true);

        assert_eq!(reader.read_exact(4, &open).await.unwrap(), vec![1, 2, 3, 4]);
        assert_eq!(reader.read_exact(2, &open).await.unwrap(), vec![5, 6]);
        assert!(matches!(
            reader.read_exact(1, &open).await,
            Err(CameraError::StreamClosed(_))
        ));
    }

    #[tokio::test]
    async fn closed_flag_stops_reading() {
        let source = ScriptedSource::new(vec![vec![1, 2, 3]], false);
        let mut reader = ChunkReader::new(Box::new(source), Duration::from_secs(1));
        let open = AtomicBool::new(false);

        assert!(matches!(
            reader.read_exact(1, &open).await,
            Err(CameraError::StreamClosed(reason)) if reason == "closed by client"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn continuous_stall_times_out() {
        let source = ScriptedSource::new(vec![vec![1]], true);
        let mut reader = ChunkReader::new(Box::new(source), Duration::from_secs(2));
        let open = AtomicBool::new(true);

        let started = Instant::now();
        let err = reader.read_exact(2, &open).await.unwrap_err();
        assert!(matches!(err, CameraError::StreamClosed(_)));
        assert!(started.elapsed() >= Duration::from_secs(2));
    }
}
