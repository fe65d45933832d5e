use serde::Serialize;
use serde_json::Value;

/// JSON-RPC style body accepted by the camera endpoint.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a> {
    pub method: &'a str,
    pub params: Vec<Value>,
    pub id: u64,
    pub version: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomDirection {
    In,
    Out,
}

impl ZoomDirection {
    pub fn as_param(self) -> &'static str {
        match self {
            ZoomDirection::In => "in",
            ZoomDirection::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomMovement {
    Start,
    Stop,
    OneShot,
}

impl ZoomMovement {
    pub fn as_param(self) -> &'static str {
        match self {
            ZoomMovement::Start => "start",
            ZoomMovement::Stop => "stop",
            ZoomMovement::OneShot => "1shot",
        }
    }
}
