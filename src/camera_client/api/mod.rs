mod queries;
mod responses;
#[cfg(test)]
pub(crate) mod testing;
mod types;

use async_trait::async_trait;

use crate::camera_client::models::{EventSnapshot, ShootMode};
use crate::types::CameraError;

pub use queries::{RpcRequest, ZoomDirection, ZoomMovement};
pub use responses::{
    first_string, parse_available_sizes, parse_method_types, parse_picture_urls, RpcResponse,
};
pub use types::parse_event;

/// Command transport towards one camera endpoint.
#[async_trait]
pub trait CameraApi: Send + Sync {
    async fn get_method_types(&self, version: &str) -> Result<Vec<String>, CameraError>;

    async fn start_rec_mode(&self) -> Result<(), CameraError>;

    /// Returns the URL of the live-view byte stream.
    async fn start_liveview(&self) -> Result<String, CameraError>;

    async fn get_postview_image_size(&self) -> Result<String, CameraError>;

    /// Returns the current size and all selectable sizes.
    async fn get_available_postview_image_size(
        &self,
    ) -> Result<(String, Vec<String>), CameraError>;

    async fn set_postview_image_size(&self, size: &str) -> Result<(), CameraError>;

    /// Returns one or more image URLs.
    async fn act_take_picture(&self) -> Result<Vec<String>, CameraError>;

    async fn act_zoom(
        &self,
        direction: ZoomDirection,
        movement: ZoomMovement,
    ) -> Result<(), CameraError>;

    async fn set_shoot_mode(&self, mode: &ShootMode) -> Result<(), CameraError>;

    async fn set_self_timer(&self, seconds: u32) -> Result<(), CameraError>;

    async fn get_event(&self, long_polling: bool) -> Result<EventSnapshot, CameraError>;
}
