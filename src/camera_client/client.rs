use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use crate::config::Config;
use crate::types::CameraError;

use super::api::{
    first_string, parse_available_sizes, parse_event, parse_method_types, parse_picture_urls,
    CameraApi, ZoomDirection, ZoomMovement,
};
use super::core::HttpClient;
use super::helpers::{ACT_TAKE_PICTURE, ACT_ZOOM, GET_EVENT, START_REC_MODE};
use super::models::{EventSnapshot, ShootMode};

/// Camera service client speaking the JSON-RPC protocol over HTTP.
pub struct CameraServiceClient {
    http: HttpClient,
    long_polling_timeout: Duration,
}

impl CameraServiceClient {
    pub fn new(http: Client, endpoint: &str, long_polling_timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(http, endpoint),
            long_polling_timeout,
        }
    }

    pub fn endpoint(&self) -> &str {
        self.http.endpoint()
    }

    async fn call_unit(&self, method: &str, params: Vec<Value>) -> Result<(), CameraError> {
        self.http.call(method, params).await.map(|_| ())
    }
}

#[async_trait]
impl CameraApi for CameraServiceClient {
    async fn get_method_types(&self, version: &str) -> Result<Vec<String>, CameraError> {
        let result = self
            .http
            .call("getMethodTypes", vec![json!(version)])
            .await?;
        Ok(parse_method_types(&result, version))
    }

    async fn start_rec_mode(&self) -> Result<(), CameraError> {
        self.call_unit(START_REC_MODE, Vec::new()).await
    }

    async fn start_liveview(&self) -> Result<String, CameraError> {
        let result = self.http.call("startLiveview", Vec::new()).await?;
        first_string(&result, "startLiveview")
    }

    async fn get_postview_image_size(&self) -> Result<String, CameraError> {
        let result = self.http.call("getPostviewImageSize", Vec::new()).await?;
        first_string(&result, "getPostviewImageSize")
    }

    async fn get_available_postview_image_size(
        &self,
    ) -> Result<(String, Vec<String>), CameraError> {
        let result = self
            .http
            .call("getAvailablePostviewImageSize", Vec::new())
            .await?;
        parse_available_sizes(&result)
    }

    async fn set_postview_image_size(&self, size: &str) -> Result<(), CameraError> {
        self.call_unit("setPostviewImageSize", vec![json!(size)])
            .await
    }

    async fn act_take_picture(&self) -> Result<Vec<String>, CameraError> {
        let result = self.http.call(ACT_TAKE_PICTURE, Vec::new()).await?;
        parse_picture_urls(&result)
    }

    async fn act_zoom(
        &self,
        direction: ZoomDirection,
        movement: ZoomMovement,
    ) -> Result<(), CameraError> {
        self.call_unit(
            ACT_ZOOM,
            vec![json!(direction.as_param()), json!(movement.as_param())],
        )
        .await
    }

    async fn set_shoot_mode(&self, mode: &ShootMode) -> Result<(), CameraError> {
        self.call_unit("setShootMode", vec![json!(mode.as_str())])
            .await
    }

    async fn set_self_timer(&self, seconds: u32) -> Result<(), CameraError> {
        self.call_unit("setSelfTimer", vec![json!(seconds)]).await
    }

    async fn get_event(&self, long_polling: bool) -> Result<EventSnapshot, CameraError> {
        // The device may hold a long poll open far longer than a normal request.
        let timeout = long_polling.then_some(self.long_polling_timeout);
        let result = self
            .http
            .call_with_timeout(GET_EVENT, vec![json!(long_polling)], timeout)
            .await?;
        Ok(parse_event(&result))
    }
}

/// Builds a command client for a discovered endpoint.
pub trait ApiConnector: Send + Sync {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn CameraApi>, CameraError>;
}

/// Connector backed by one shared `reqwest::Client`.
pub struct HttpConnector {
    http: Client,
    long_polling_timeout: Duration,
}

impl HttpConnector {
    pub fn new(config: &Config) -> Result<Self, CameraError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(CameraError::Http)?;
        Ok(Self {
            http,
            long_polling_timeout: config.long_polling_timeout(),
        })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }
}

impl ApiConnector for HttpConnector {
    fn connect(&self, endpoint: &str) -> Result<Arc<dyn CameraApi>, CameraError> {
        if endpoint.trim().is_empty() {
            return Err(CameraError::InvalidArgument("endpoint"));
        }
        Ok(Arc::new(CameraServiceClient::new(
            self.http.clone(),
            endpoint,
            self.long_polling_timeout,
        )))
    }
}
