use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use camera_remote::camera_client::api::{ZoomDirection, ZoomMovement};
use camera_remote::camera_client::models::ShootMode;
use camera_remote::picture::PictureEvent;
use camera_remote::{CameraError, Config, DeviceSession};

#[tokio::main]
async fn main() -> Result<(), CameraError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::load().await;
    let session = DeviceSession::with_http(config)?;

    spawn_status_logger(&session);
    spawn_picture_logger(&session);
    spawn_frame_consumer(&session);

    match session.connect().await {
        Ok(device) => info!(device = %device.display_name(), "Camera ready"),
        Err(err) => warn!(error = ?err, "Camera bring-up failed, type `connect` to retry"),
    }

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !run_command(&session, line.trim()).await {
                    break;
                }
            }
        }
    }

    session.refresh();
    info!("Shutting down");
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn run_command(session: &DeviceSession, line: &str) -> bool {
    let mut words = line.split_whitespace();
    let result = match (words.next(), words.next()) {
        (None, _) => Ok(()),
        (Some("quit" | "exit"), _) => return false,
        (Some("connect"), _) => session.connect().await.map(|_| ()),
        (Some("refresh"), _) => {
            session.refresh();
            Ok(())
        }
        (Some("shoot"), _) => session
            .take_picture()
            .await
            .map(|outcome| info!(?outcome, "Capture finished")),
        (Some("zoom"), Some(direction)) => match direction {
            "in" => session.zoom(ZoomDirection::In, ZoomMovement::OneShot).await,
            "out" => session.zoom(ZoomDirection::Out, ZoomMovement::OneShot).await,
            _ => Err(CameraError::InvalidArgument("zoom direction")),
        },
        (Some("mode"), Some(mode)) => session.set_shoot_mode(ShootMode::from_raw(mode)).await,
        (Some("timer"), Some(seconds)) => match seconds.parse() {
            Ok(seconds) => session.set_self_timer(seconds).await,
            Err(_) => Err(CameraError::InvalidArgument("timer seconds")),
        },
        (Some("size"), Some(size)) => session.set_postview_image_size(size).await,
        (Some("status"), _) => {
            info!(state = %session.state(), status = ?session.status(), "Session status");
            Ok(())
        }
        (Some(other), _) => {
            warn!(command = other, "Unknown command");
            Ok(())
        }
    };

    if let Err(err) = result {
        error!(error = ?err, command = line, "Command failed");
    }
    true
}

fn spawn_status_logger(session: &DeviceSession) {
    let mut updates = session.subscribe_status();
    tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => match update.changed {
                    Some(member) => info!(?member, "Camera status changed"),
                    None => info!(
                        connected = update.status.is_connected,
                        shooting = update.status.is_available_shooting,
                        taking_picture = update.status.is_taking_picture,
                        "Session status updated"
                    ),
                },
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Status updates lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

fn spawn_picture_logger(session: &DeviceSession) {
    let mut pictures = session.subscribe_pictures();
    tokio::spawn(async move {
        loop {
            match pictures.recv().await {
                Ok(PictureEvent::Saved { path, .. }) => {
                    info!(path = %path.display(), "Picture saved")
                }
                Ok(PictureEvent::Failed { url, failure, .. }) => {
                    warn!(url = %url, ?failure, "Picture download failed")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Picture events lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}

/// Headless renderer: accepts each frame and releases it right away.
fn spawn_frame_consumer(session: &DeviceSession) {
    let Some(mut frames) = session.take_frames() else {
        return;
    };
    tokio::spawn(async move {
        let mut received: u64 = 0;
        while let Some(delivery) = frames.recv().await {
            received += 1;
            if received % 100 == 1 {
                tracing::debug!(
                    sequence = delivery.frame.sequence,
                    bytes = delivery.frame.len(),
                    received,
                    "Liveview frame"
                );
            }
            delivery.guard.finish();
        }
    });
}
