use serde_json::Value;

use crate::camera_client::models::{
    CameraState, EvInfo, EventSnapshot, Setting, ShootMode, ZoomInfo,
};

use super::responses::string_list;

/// Build an `EventSnapshot` from a `getEvent` result array.
///
/// Elements are matched by their `type` field rather than by position, since
/// the slot layout differs between firmware versions. Nested arrays (used for
/// `takePicture`) are searched one level deep.
pub fn parse_event(result: &[Value]) -> EventSnapshot {
    let mut snapshot = EventSnapshot::default();
    for element in result {
        match element {
            Value::Object(_) => apply_element(&mut snapshot, element),
            Value::Array(items) => {
                for item in items.iter().filter(|item| item.is_object()) {
                    apply_element(&mut snapshot, item);
                }
            }
            _ => {}
        }
    }
    snapshot
}

fn apply_element(snapshot: &mut EventSnapshot, element: &Value) {
    let Some(kind) = element.get("type").and_then(|v| v.as_str()) else {
        return;
    };
    match kind {
        "availableApiList" => {
            snapshot.available_apis = Some(string_list(element.get("names")).into_iter().collect());
        }
        "cameraStatus" => {
            snapshot.camera_state = str_field(element, "cameraStatus").map(CameraState::from_raw);
        }
        "zoomInformation" => snapshot.zoom_info = parse_zoom(element),
        "liveviewStatus" => {
            snapshot.liveview_available = element.get("liveviewStatus").and_then(|v| v.as_bool());
        }
        "postviewImageSize" => {
            snapshot.postview_size = string_setting(
                element,
                "currentPostviewImageSize",
                "postviewImageSizeCandidates",
            );
        }
        "selfTimer" => {
            snapshot.self_timer = element
                .get("currentSelfTimer")
                .and_then(|v| v.as_u64())
                .map(|current| {
                    let candidates = element
                        .get("selfTimerCandidates")
                        .and_then(|v| v.as_array())
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(|v| v.as_u64())
                                .map(|v| v as u32)
                                .collect()
                        })
                        .unwrap_or_default();
                    Setting::new(current as u32, candidates)
                });
        }
        "shootMode" => {
            snapshot.shoot_mode =
                string_setting(element, "currentShootMode", "shootModeCandidates").map(|s| {
                    Setting::new(
                        ShootMode::from_raw(&s.current),
                        s.candidates.iter().map(|c| ShootMode::from_raw(c)).collect(),
                    )
                });
        }
        "exposureMode" => {
            snapshot.exposure_mode =
                string_setting(element, "currentExposureMode", "exposureModeCandidates");
        }
        "fNumber" => {
            snapshot.f_number = string_setting(element, "currentFNumber", "fNumberCandidates");
        }
        "shutterSpeed" => {
            snapshot.shutter_speed =
                string_setting(element, "currentShutterSpeed", "shutterSpeedCandidates");
        }
        "isoSpeedRate" => {
            snapshot.iso_speed_rate =
                string_setting(element, "currentIsoSpeedRate", "isoSpeedRateCandidates");
        }
        "exposureCompensation" => snapshot.ev_info = parse_ev(element),
        "programShift" => {
            snapshot.program_shift = element.get("isShifted").and_then(|v| v.as_bool());
        }
        _ => {}
    }
}

fn str_field<'a>(element: &'a Value, key: &str) -> Option<&'a str> {
    element.get(key).and_then(|v| v.as_str())
}

fn int_field(element: &Value, key: &str) -> Option<i64> {
    element.get(key).and_then(|v| v.as_i64())
}

fn string_setting(element: &Value, current: &str, candidates: &str) -> Option<Setting<String>> {
    str_field(element, current)
        .map(|value| Setting::new(value.to_string(), string_list(element.get(candidates))))
}

fn parse_zoom(element: &Value) -> Option<ZoomInfo> {
    let position = int_field(element, "zoomPosition")?;
    Some(ZoomInfo {
        position: position.clamp(0, 100) as u8,
        number_of_boxes: int_field(element, "zoomNumberBox").unwrap_or(1).max(0) as u32,
        current_box_index: int_field(element, "zoomIndexCurrentBox").unwrap_or(0).max(0) as u32,
        position_in_box: int_field(element, "zoomPositionCurrentBox")
            .unwrap_or(position)
            .clamp(0, 100) as u8,
    })
}

fn parse_ev(element: &Value) -> Option<EvInfo> {
    Some(EvInfo {
        current_index: int_field(element, "currentExposureCompensation")? as i32,
        min_index: int_field(element, "minExposureCompensation").unwrap_or(0) as i32,
        max_index: int_field(element, "maxExposureCompensation").unwrap_or(0) as i32,
        step_definition: int_field(element, "stepIndexOfExposureCompensation").unwrap_or(1) as i32,
    })
}
