use std::collections::HashMap;

use serde::Serialize;

pub const CAMERA_SERVICE: &str = "camera";

/// Identity of a discovered device. Replaced wholesale on every discovery.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct DeviceInfo {
    pub model_name: String,
    pub friendly_name: String,
    pub endpoints: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl DeviceInfo {
    pub fn new(
        model_name: impl Into<String>,
        friendly_name: impl Into<String>,
        endpoints: HashMap<String, String>,
    ) -> Self {
        Self {
            model_name: model_name.into(),
            friendly_name: friendly_name.into(),
            endpoints,
            location: None,
        }
    }

    pub fn camera_endpoint(&self) -> Option<&str> {
        self.endpoints.get(CAMERA_SERVICE).map(String::as_str)
    }

    /// Name shown to users, preferring the friendly name.
    pub fn display_name(&self) -> &str {
        if self.friendly_name.is_empty() {
            &self.model_name
        } else {
            &self.friendly_name
        }
    }
}
