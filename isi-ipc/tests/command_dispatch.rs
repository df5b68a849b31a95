//! Exercises the command dispatcher directly (no stdio transport), the
//! way an embedder driving `isi_ipc::dispatch` in-process would.

use std::sync::Arc;
use std::time::Duration;

use isi_ipc::AppContext;
use isi_params::ParamStore;
use serde_json::{json, Map, Value};

fn ctx() -> (Arc<AppContext>, crossbeam_channel::Receiver<isi_ipc::PubEvent>, tempfile::TempDir) {
    let store = Arc::new(ParamStore::in_memory());
    let (tx, rx) = crossbeam_channel::unbounded();
    let dir = tempfile::tempdir().unwrap();
    let ctx = Arc::new(AppContext::new(store, dir.path().to_path_buf(), tx));
    (ctx, rx, dir)
}

fn obj(pairs: &[(&str, Value)]) -> Map<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

#[test]
fn ping_succeeds() {
    let (ctx, _rx, _dir) = ctx();
    let fields = isi_ipc::dispatch(&ctx, "ping", &Map::new()).unwrap();
    assert_eq!(fields.get("pong"), Some(&Value::Bool(true)));
}

#[test]
fn unknown_command_is_rejected() {
    let (ctx, _rx, _dir) = ctx();
    let err = isi_ipc::dispatch(&ctx, "not_a_real_command", &Map::new()).unwrap_err();
    assert!(matches!(err, isi_ipc::IpcError::UnknownCommand(cmd) if cmd == "not_a_real_command"));
}

#[test]
fn get_all_parameters_includes_every_group() {
    let (ctx, _rx, _dir) = ctx();
    let fields = isi_ipc::dispatch(&ctx, "get_all_parameters", &Map::new()).unwrap();
    let params = fields.get("parameters").unwrap().as_object().unwrap();
    for group in ["session", "monitor", "stimulus", "camera", "acquisition", "analysis"] {
        assert!(params.contains_key(group), "missing group {group}");
    }
}

#[test]
fn update_then_get_parameter_group_round_trips() {
    let (ctx, _rx, _dir) = ctx();
    let updates = obj(&[("monitor_width_px", json!(64))]);
    let params = obj(&[("group", json!("monitor")), ("parameters", Value::Object(updates))]);
    let fields = isi_ipc::dispatch(&ctx, "update_parameter_group", &params).unwrap();
    let changed = fields.get("changed_keys").unwrap().as_array().unwrap();
    assert!(changed.iter().any(|v| v == "monitor_width_px"));

    let fields = isi_ipc::dispatch(&ctx, "get_parameter_group", &obj(&[("group", json!("monitor"))])).unwrap();
    let group = fields.get("parameters").unwrap().as_object().unwrap();
    assert_eq!(group.get("monitor_width_px"), Some(&json!(64)));
}

#[test]
fn update_parameter_group_rejects_unknown_key() {
    let (ctx, _rx, _dir) = ctx();
    let updates = obj(&[("not_a_real_key", json!(1))]);
    let params = obj(&[("group", json!("monitor")), ("parameters", Value::Object(updates))]);
    assert!(isi_ipc::dispatch(&ctx, "update_parameter_group", &params).is_err());
}

#[test]
fn list_sessions_on_empty_root_is_empty() {
    let (ctx, _rx, _dir) = ctx();
    let fields = isi_ipc::dispatch(&ctx, "list_sessions", &Map::new()).unwrap();
    assert_eq!(fields.get("sessions").unwrap().as_array().unwrap().len(), 0);
}

#[test]
fn get_system_health_reports_idle_mode() {
    let (ctx, _rx, _dir) = ctx();
    let fields = isi_ipc::dispatch(&ctx, "get_system_health", &obj(&[("include_details", json!(true))])).unwrap();
    assert_eq!(fields.get("mode"), Some(&json!("idle")));
    assert!(fields.contains_key("sync_sample_count"));
}

#[test]
fn start_then_stop_acquisition_runs_end_to_end() {
    let (ctx, rx, _dir) = ctx();

    let monitor = obj(&[
        ("monitor_width_px", json!(8)),
        ("monitor_height_px", json!(6)),
        ("monitor_width_cm", json!(33.6)),
        ("monitor_height_cm", json!(25.2)),
        ("monitor_distance_cm", json!(10.0)),
    ]);
    isi_ipc::dispatch(&ctx, "update_parameter_group", &obj(&[("group", json!("monitor")), ("parameters", Value::Object(monitor))])).unwrap();

    let stimulus = obj(&[("drift_speed_deg_per_sec", json!(600.0))]);
    isi_ipc::dispatch(&ctx, "update_parameter_group", &obj(&[("group", json!("stimulus")), ("parameters", Value::Object(stimulus))])).unwrap();

    let camera = obj(&[
        ("camera_width_px", json!(8)),
        ("camera_height_px", json!(6)),
        ("camera_fps", json!(100.0)),
        ("development_mode", json!(true)),
    ]);
    isi_ipc::dispatch(&ctx, "update_parameter_group", &obj(&[("group", json!("camera")), ("parameters", Value::Object(camera))])).unwrap();

    let acquisition = obj(&[
        ("baseline_sec", json!(0.01)),
        ("between_sec", json!(0.01)),
        ("cycles", json!(1)),
        ("directions", json!(["LR"])),
    ]);
    isi_ipc::dispatch(&ctx, "update_parameter_group", &obj(&[("group", json!("acquisition")), ("parameters", Value::Object(acquisition))])).unwrap();

    isi_ipc::dispatch(&ctx, "start_acquisition", &Map::new()).unwrap();
    assert!(isi_ipc::dispatch(&ctx, "start_acquisition", &Map::new()).is_err());

    let mut saw_progress = false;
    while let Ok(event) = rx.recv_timeout(Duration::from_secs(5)) {
        if matches!(event, isi_ipc::PubEvent::AcquisitionProgress { .. }) {
            saw_progress = true;
        }
        if matches!(event, isi_ipc::PubEvent::SystemState { .. }) {
            break;
        }
    }
    assert!(saw_progress);

    isi_ipc::dispatch(&ctx, "stop_acquisition", &Map::new()).unwrap();
    assert!(isi_ipc::dispatch(&ctx, "stop_acquisition", &Map::new()).is_err());
}
