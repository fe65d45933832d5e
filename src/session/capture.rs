use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::camera_client::models::CameraState;
use crate::picture::{DownloadFailure, PictureDownloader, PictureEvent};
use crate::types::{CameraError, StatusCode};

use super::{CaptureOutcome, DeviceSession};

const ORIGINAL_SIZE: &str = "Original";

impl DeviceSession {
    /// Capture a still and download every resulting image.
    ///
    /// Refused without sending anything while a capture is pending or the
    /// camera reports a state other than idle. `is_taking_picture` clears
    /// only after every download has finished.
    pub async fn take_picture(&self) -> Result<CaptureOutcome, CameraError> {
        let (api, epoch) = self.ready_api("take_picture")?;

        let accepted = self.inner.status.update_if(|status| {
            let idle = matches!(status.camera_state, None | Some(CameraState::Idle));
            if status.is_taking_picture || !idle {
                return false;
            }
            status.is_taking_picture = true;
            true
        });
        if !accepted {
            info!("Camera is busy, skipping capture");
            return Ok(CaptureOutcome::Skipped);
        }

        let (shot, size) = tokio::join!(api.act_take_picture(), api.get_postview_image_size());
        let urls = match shot {
            Ok(urls) => urls,
            Err(err) if err.status_code() == StatusCode::STILL_CAPTURING_NOT_FINISHED => {
                info!("Previous capture still in progress");
                return Ok(CaptureOutcome::InProgress);
            }
            Err(err) => {
                warn!(error = ?err, "actTakePicture failed");
                self.finish_capture(epoch);
                return Err(err);
            }
        };

        let original_size = match size {
            Ok(size) => size == ORIGINAL_SIZE,
            Err(_) => self
                .inner
                .status
                .read(|status| status.postview_image_size.as_deref() == Some(ORIGINAL_SIZE)),
        };

        let events = download_all(&self.inner.deps.downloader, urls, original_size).await;
        if epoch == self.epoch() {
            for event in &events {
                // Nobody listening is fine.
                let _ = self.inner.pictures.send(event.clone());
            }
        }
        self.finish_capture(epoch);
        Ok(CaptureOutcome::Captured(events))
    }

    fn finish_capture(&self, epoch: u64) {
        if epoch != self.epoch() {
            return;
        }
        self.inner
            .status
            .update_if(|status| std::mem::replace(&mut status.is_taking_picture, false));
    }
}

/// Download every URL concurrently. Events come back in URL order.
async fn download_all(
    downloader: &Arc<dyn PictureDownloader>,
    urls: Vec<String>,
    original_size: bool,
) -> Vec<PictureEvent> {
    let mut downloads = JoinSet::new();
    for (index, url) in urls.iter().cloned().enumerate() {
        let downloader = Arc::clone(downloader);
        downloads.spawn(async move {
            let result = downloader.download(&url).await;
            (index, url, result)
        });
    }

    let mut events: Vec<Option<PictureEvent>> = vec![None; urls.len()];
    while let Some(joined) = downloads.join_next().await {
        let Ok((index, url, result)) = joined else {
            continue;
        };
        let event = match result {
            Ok(path) => PictureEvent::Saved {
                url,
                path,
                original_size,
            },
            Err(err) => {
                warn!(url = %url, error = ?err, "Picture download failed");
                PictureEvent::Failed {
                    url,
                    failure: DownloadFailure::from_error(&err),
                    original_size,
                }
            }
        };
        events[index] = Some(event);
    }

    urls.into_iter()
        .zip(events)
        .map(|(url, event)| {
            event.unwrap_or(PictureEvent::Failed {
                url,
                failure: DownloadFailure::Unknown,
                original_size,
            })
        })
        .collect()
}
