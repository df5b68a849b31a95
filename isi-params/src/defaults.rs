use serde_json::{json, Map, Value};

use crate::schema::{ParamKind, ParamSpec};
use crate::ParamGroup;

pub(crate) fn schema_for(group: ParamGroup) -> Vec<ParamSpec> {
    match group {
        ParamGroup::Session => vec![
            ParamSpec {
                name: "session_name",
                kind: ParamKind::String,
            },
            ParamSpec {
                name: "animal_id",
                kind: ParamKind::String,
            },
            ParamSpec {
                name: "animal_age",
                kind: ParamKind::String,
            },
        ],
        ParamGroup::Monitor => vec![
            ParamSpec {
                name: "monitor_width_px",
                kind: ParamKind::Int { min: 1, max: 16384 },
            },
            ParamSpec {
                name: "monitor_height_px",
                kind: ParamKind::Int { min: 1, max: 16384 },
            },
            ParamSpec {
                name: "monitor_width_cm",
                kind: ParamKind::Float { min: 0.1, max: 1000.0 },
            },
            ParamSpec {
                name: "monitor_height_cm",
                kind: ParamKind::Float { min: 0.1, max: 1000.0 },
            },
            ParamSpec {
                name: "monitor_distance_cm",
                kind: ParamKind::Float { min: 0.1, max: 1000.0 },
            },
            ParamSpec {
                name: "monitor_fps",
                kind: ParamKind::Int { min: 1, max: 1000 },
            },
            ParamSpec {
                name: "monitor_lateral_angle_deg",
                kind: ParamKind::Float { min: -180.0, max: 180.0 },
            },
            ParamSpec {
                name: "monitor_tilt_angle_deg",
                kind: ParamKind::Float { min: -180.0, max: 180.0 },
            },
        ],
        ParamGroup::Stimulus => vec![
            ParamSpec {
                name: "bar_width_deg",
                kind: ParamKind::Float { min: 0.1, max: 180.0 },
            },
            ParamSpec {
                name: "drift_speed_deg_per_sec",
                kind: ParamKind::Float { min: 0.01, max: 1000.0 },
            },
            ParamSpec {
                name: "checkerboard_size_deg",
                kind: ParamKind::Float { min: 0.1, max: 180.0 },
            },
            ParamSpec {
                name: "flicker_hz",
                kind: ParamKind::Float { min: 0.0, max: 120.0 },
            },
            ParamSpec {
                name: "contrast",
                kind: ParamKind::Float { min: 0.0, max: 1.0 },
            },
            ParamSpec {
                name: "background_luminance",
                kind: ParamKind::Float { min: 0.0, max: 1.0 },
            },
        ],
        ParamGroup::Camera => vec![
            ParamSpec {
                name: "selected_camera",
                kind: ParamKind::String,
            },
            ParamSpec {
                name: "camera_width_px",
                kind: ParamKind::Int { min: 1, max: 16384 },
            },
            ParamSpec {
                name: "camera_height_px",
                kind: ParamKind::Int { min: 1, max: 16384 },
            },
            ParamSpec {
                name: "camera_fps",
                kind: ParamKind::Float { min: 0.1, max: 1000.0 },
            },
            ParamSpec {
                name: "development_mode",
                kind: ParamKind::Bool,
            },
        ],
        ParamGroup::Acquisition => vec![
            ParamSpec {
                name: "baseline_sec",
                kind: ParamKind::Float { min: 0.0, max: 86400.0 },
            },
            ParamSpec {
                name: "between_sec",
                kind: ParamKind::Float { min: 0.0, max: 86400.0 },
            },
            ParamSpec {
                name: "cycles",
                kind: ParamKind::Int { min: 1, max: 100_000 },
            },
            ParamSpec {
                name: "directions",
                kind: ParamKind::StringList,
            },
        ],
        ParamGroup::Analysis => vec![ParamSpec {
            name: "fft_window",
            kind: ParamKind::String,
        }],
    }
}

pub(crate) fn defaults_for(group: ParamGroup) -> Map<String, Value> {
    let value = match group {
        ParamGroup::Session => json!({
            "session_name": "unnamed_session",
            "animal_id": "",
            "animal_age": "",
        }),
        ParamGroup::Monitor => json!({
            "monitor_width_px": 1920,
            "monitor_height_px": 1080,
            "monitor_width_cm": 33.6,
            "monitor_height_cm": 25.2,
            "monitor_distance_cm": 10.0,
            "monitor_fps": 60,
            "monitor_lateral_angle_deg": 0.0,
            "monitor_tilt_angle_deg": 0.0,
        }),
        ParamGroup::Stimulus => json!({
            "bar_width_deg": 20.0,
            "drift_speed_deg_per_sec": 15.0,
            "checkerboard_size_deg": 25.0,
            "flicker_hz": 6.0,
            "contrast": 1.0,
            "background_luminance": 0.5,
        }),
        ParamGroup::Camera => json!({
            "selected_camera": "",
            "camera_width_px": 640,
            "camera_height_px": 480,
            "camera_fps": 30.0,
            "development_mode": false,
        }),
        ParamGroup::Acquisition => json!({
            "baseline_sec": 5.0,
            "between_sec": 5.0,
            "cycles": 10,
            "directions": ["LR", "RL", "TB", "BT"],
        }),
        ParamGroup::Analysis => json!({
            "fft_window": "hann",
        }),
    };
    value.as_object().cloned().unwrap_or_default()
}
