//! Device discovery over SSDP.
//!
//! An M-SEARCH is multicast on the local link; every reply carries a
//! `LOCATION` header pointing at a device description XML, which lists the
//! JSON-RPC services the device offers.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::types::CameraError;

use super::helpers::join_url;
use super::models::{DeviceInfo, CAMERA_SERVICE};

const SSDP_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;
const SEARCH_TARGET: &str = "urn:schemas-sony-com:service:ScalarWebAPI:1";
const RESEND_INTERVAL: Duration = Duration::from_secs(2);

/// Discovery transport: resolves the first camera that answers.
#[async_trait]
pub trait DeviceFinder: Send + Sync {
    async fn search(&self, timeout: Duration) -> Result<DeviceInfo, CameraError>;
}

pub struct SsdpDeviceFinder {
    http: Client,
}

impl SsdpDeviceFinder {
    pub fn new(http: Client) -> Self {
        Self { http }
    }

    async fn describe(&self, location: &str) -> Result<DeviceInfo, CameraError> {
        let response = self.http.get(location).send().await?;
        if !response.status().is_success() {
            return Err(CameraError::InvalidResponse(format!(
                "{} returned {}",
                location,
                response.status()
            )));
        }
        let body = response.text().await?;
        let mut info = parse_device_description(&body).ok_or_else(|| {
            CameraError::InvalidResponse(format!("{location} has no camera service"))
        })?;
        info.location = Some(location.to_string());
        Ok(info)
    }

    /// `describe`, cut off at the search deadline.
    async fn describe_before(
        &self,
        location: &str,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<DeviceInfo, CameraError> {
        timeout_at(deadline, self.describe(location))
            .await
            .map_err(|_| CameraError::DiscoveryTimeout(timeout.as_secs()))?
    }
}

#[async_trait]
impl DeviceFinder for SsdpDeviceFinder {
    async fn search(&self, timeout: Duration) -> Result<DeviceInfo, CameraError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
        let target = SocketAddr::from((SSDP_ADDR, SSDP_PORT));
        let request = search_request(timeout);
        let deadline = Instant::now() + timeout;
        let mut next_send = Instant::now();
        let mut buf = vec![0u8; 2048];

        loop {
            if Instant::now() >= next_send {
                socket.send_to(request.as_bytes(), target).await?;
                next_send = Instant::now() + RESEND_INTERVAL;
                debug!("Sent SSDP M-SEARCH");
            }

            let wait_until = next_send.min(deadline);
            match timeout_at(wait_until, socket.recv_from(&mut buf)).await {
                Ok(Ok((len, from))) => {
                    let reply = String::from_utf8_lossy(&buf[..len]);
                    let Some(location) = header_value(&reply, "LOCATION") else {
                        continue;
                    };
                    debug!(%from, location, "SSDP reply");
                    match self.describe_before(location, deadline, timeout).await {
                        Ok(info) => {
                            info!(model = %info.model_name, name = %info.friendly_name, "Found device");
                            return Ok(info);
                        }
                        Err(err @ CameraError::DiscoveryTimeout(_)) => return Err(err),
                        Err(err) => {
                            warn!(location, error = ?err, "Ignoring SSDP reply");
                        }
                    }
                }
                Ok(Err(err)) => return Err(CameraError::Io(err)),
                Err(_) if Instant::now() >= deadline => {
                    return Err(CameraError::DiscoveryTimeout(timeout.as_secs()));
                }
                Err(_) => {}
            }
        }
    }
}

/// Finder that always answers with a configured endpoint.
pub struct StaticDeviceFinder {
    endpoint: String,
}

impl StaticDeviceFinder {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl DeviceFinder for StaticDeviceFinder {
    async fn search(&self, _timeout: Duration) -> Result<DeviceInfo, CameraError> {
        let mut endpoints = HashMap::new();
        endpoints.insert(CAMERA_SERVICE.to_string(), self.endpoint.clone());
        Ok(DeviceInfo::new("", "Configured camera", endpoints))
    }
}

fn search_request(timeout: Duration) -> String {
    let mx = timeout.as_secs().clamp(1, 5);
    format!(
        "M-SEARCH * HTTP/1.1\r\nHOST: {SSDP_ADDR}:{SSDP_PORT}\r\nMAN: \"ssdp:discover\"\r\nMX: {mx}\r\nST: {SEARCH_TARGET}\r\n\r\n"
    )
}

fn header_value<'a>(reply: &'a str, name: &str) -> Option<&'a str> {
    reply.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case(name)
            .then(|| value.trim())
            .filter(|value| !value.is_empty())
    })
}

/// Extract identity and service endpoints from a device description.
/// Returns `None` unless a camera service is listed.
pub fn parse_device_description(xml: &str) -> Option<DeviceInfo> {
    let model_name = extract_tag(xml, "modelName").unwrap_or_default();
    let friendly_name = extract_tag(xml, "friendlyName").unwrap_or_default();

    let mut endpoints = HashMap::new();
    let mut rest = xml;
    while let Some(service) = extract_tag(rest, "av:X_ScalarWebAPI_Service") {
        let service_type = extract_tag(service, "av:X_ScalarWebAPI_ServiceType");
        let action_url = extract_tag(service, "av:X_ScalarWebAPI_ActionList_URL");
        if let (Some(service_type), Some(action_url)) = (service_type, action_url) {
            endpoints.insert(service_type.to_string(), join_url(action_url, service_type));
        }
        let end_tag = "</av:X_ScalarWebAPI_Service>";
        let Some(pos) = rest.find(end_tag) else {
            break;
        };
        rest = &rest[pos + end_tag.len()..];
    }

    if !endpoints.contains_key(CAMERA_SERVICE) {
        return None;
    }
    Some(DeviceInfo::new(model_name, friendly_name, endpoints))
}

fn extract_tag<'a>(contents: &'a str, tag: &str) -> Option<&'a str> {
    let start_tag = format!("<{tag}>");
    let end_tag = format!("</{tag}>");
    let start = contents.find(&start_tag)? + start_tag.len();
    let rest = &contents[start..];
    let end = rest.find(&end_tag)?;
    Some(rest[..end].trim())
}
