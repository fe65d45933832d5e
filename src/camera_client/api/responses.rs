use serde::Deserialize;
use serde_json::Value;

use crate::types::{CameraError, StatusCode};

/// Envelope returned for every camera call: either `result` or `error: [code, message]`.
#[derive(Debug, Deserialize)]
pub struct RpcResponse {
    #[serde(default)]
    pub result: Option<Vec<Value>>,
    #[serde(default)]
    pub error: Option<Vec<Value>>,
    #[serde(default)]
    pub id: Option<u64>,
}

impl RpcResponse {
    pub fn into_result(self, method: &str) -> Result<Vec<Value>, CameraError> {
        if let Some(error) = self.error {
            let code = error
                .first()
                .and_then(|v| v.as_i64())
                .map(|c| StatusCode(c as i32))
                .unwrap_or(StatusCode::ANY);
            return Err(CameraError::api(method, code));
        }
        self.result.ok_or_else(|| {
            CameraError::InvalidResponse(format!("{method} returned neither result nor error"))
        })
    }
}

/// Names from a `getMethodTypes` result, restricted to `version`.
pub fn parse_method_types(result: &[Value], version: &str) -> Vec<String> {
    let Some(entries) = result.first().and_then(|v| v.as_array()) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| entry.as_array())
        .filter(|entry| {
            entry
                .get(3)
                .and_then(|v| v.as_str())
                .map(|v| v == version)
                .unwrap_or(true)
        })
        .filter_map(|entry| entry.first().and_then(|v| v.as_str()))
        .map(|name| name.to_string())
        .collect()
}

pub fn first_string(result: &[Value], method: &str) -> Result<String, CameraError> {
    result
        .first()
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| CameraError::InvalidResponse(format!("{method} returned no string")))
}

pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str())
                .map(|s| s.to_string())
                .collect()
        })
        .unwrap_or_default()
}

/// `getAvailablePostviewImageSize` returns `[current, [candidates...]]`.
pub fn parse_available_sizes(result: &[Value]) -> Result<(String, Vec<String>), CameraError> {
    let current = first_string(result, "getAvailablePostviewImageSize")?;
    Ok((current, string_list(result.get(1))))
}

/// `actTakePicture` returns `[[url, ...]]`.
pub fn parse_picture_urls(result: &[Value]) -> Result<Vec<String>, CameraError> {
    let urls = string_list(result.first());
    if urls.is_empty() {
        return Err(CameraError::InvalidResponse(
            "actTakePicture returned no image URL".to_string(),
        ));
    }
    Ok(urls)
}
