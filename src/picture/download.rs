//! Saves captured pictures from the camera into the download directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use reqwest::Client;
use tempfile::NamedTempFile;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::liveview::ByteSource;
use crate::types::CameraError;

pub const DEFAULT_EXTENSION: &str = "jpg";

#[async_trait]
pub trait PictureDownloader: Send + Sync {
    /// Fetch `url` and return where it was stored.
    async fn download(&self, url: &str) -> Result<PathBuf, CameraError>;
}

/// Shares the command client but replaces its timeout on every transfer.
pub struct HttpPictureDownloader {
    http: Client,
    download_dir: PathBuf,
    timeout: Duration,
}

impl HttpPictureDownloader {
    pub fn new(http: Client, download_dir: PathBuf, timeout: Duration) -> Self {
        Self {
            http,
            download_dir,
            timeout,
        }
    }
}

#[async_trait]
impl PictureDownloader for HttpPictureDownloader {
    async fn download(&self, url: &str) -> Result<PathBuf, CameraError> {
        let mut response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await?
            .error_for_status()?;
        debug!(url, bytes = ?response.content_length(), "Downloading picture");

        let path = save_stream(&mut response, &self.download_dir, &file_name_for(url)).await?;
        info!(url, path = %path.display(), "Saved picture");
        Ok(path)
    }
}

/// Write a chunked body into `dir/name`. The file only appears once complete.
pub async fn save_stream(
    source: &mut dyn ByteSource,
    dir: &Path,
    name: &str,
) -> Result<PathBuf, CameraError> {
    fs::create_dir_all(dir).await?;
    let partial = NamedTempFile::new_in(dir)?;
    let mut file = File::from_std(partial.reopen()?);
    let mut written: u64 = 0;

    while let Some(chunk) = source.next_chunk().await? {
        file.write_all(&chunk).await?;
        written = written.saturating_add(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    let destination = unique_destination(dir, name).await;
    partial
        .persist(&destination)
        .map_err(|err| CameraError::Io(err.error))?;
    debug!(bytes = written, path = %destination.display(), "Picture written");
    Ok(destination)
}

/// Last path segment of `url`, or a timestamp when the URL has none.
pub fn file_name_for(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or_default();
    let segment = path
        .rsplit('/')
        .next()
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && !segment.contains(':'));

    match segment {
        Some(segment) if segment.contains('.') => segment.to_string(),
        Some(segment) => format!("{segment}.{DEFAULT_EXTENSION}"),
        None => timestamped_name(DEFAULT_EXTENSION),
    }
}

fn timestamped_name(extension: &str) -> String {
    format!("{}.{extension}", Local::now().format("%Y%m%d_%H%M%S%3f"))
}

async fn unique_destination(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !fs::try_exists(&candidate).await.unwrap_or(false) {
        return candidate;
    }
    let (stem, extension) = name
        .rsplit_once('.')
        .unwrap_or((name, DEFAULT_EXTENSION));
    dir.join(format!(
        "{stem}_{}.{extension}",
        Local::now().format("%Y%m%d_%H%M%S%3f")
    ))
}
