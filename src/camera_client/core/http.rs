use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::camera_client::api::{RpcRequest, RpcResponse};
use crate::camera_client::helpers::RPC_VERSION;
use crate::types::{CameraError, StatusCode};

/// Thin JSON-RPC transport bound to one service endpoint.
pub struct HttpClient {
    http: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl HttpClient {
    pub fn new(http: Client, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn call(&self, method: &str, params: Vec<Value>) -> Result<Vec<Value>, CameraError> {
        self.call_with_timeout(method, params, None).await
    }

    pub async fn call_with_timeout(
        &self,
        method: &str,
        params: Vec<Value>,
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>, CameraError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = RpcRequest {
            method,
            params,
            id,
            version: RPC_VERSION,
        };
        debug!(method, id, endpoint = %self.endpoint, "Sending camera request");

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(CameraError::api(method, status_from_http(response.status())));
        }

        let envelope: RpcResponse = response.json().await?;
        envelope.into_result(method)
    }
}

fn status_from_http(status: reqwest::StatusCode) -> StatusCode {
    match status.as_u16() {
        406 => StatusCode::NOT_ACCEPTABLE,
        503 => StatusCode::SERVICE_UNAVAILABLE,
        code => StatusCode(code as i32),
    }
}
