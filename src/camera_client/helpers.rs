use crate::types::StatusCode;

/// Version field sent with every request body.
pub const RPC_VERSION: &str = "1.0";

pub const START_REC_MODE: &str = "startRecMode";
pub const ACT_ZOOM: &str = "actZoom";
pub const ACT_TAKE_PICTURE: &str = "actTakePicture";
pub const GET_EVENT: &str = "getEvent";

/// How the event observer treats a failed `getEvent`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFailure {
    /// Worth another attempt after the retry interval.
    Transient,
    /// Another poll is already pending on the device.
    DuplicatePolling,
    Fatal,
}

pub fn classify_poll_failure(code: StatusCode) -> PollFailure {
    match code {
        StatusCode::NOT_ACCEPTABLE
        | StatusCode::CAMERA_NOT_READY
        | StatusCode::ILLEGAL_STATE
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::TIMEOUT
        | StatusCode::ANY => PollFailure::Transient,
        StatusCode::DUPLICATE_POLLING => PollFailure::DuplicatePolling,
        _ => PollFailure::Fatal,
    }
}

/// Join a service base URL and a path segment without doubling slashes.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
