//! Command dispatch for every entry in the §6 command vocabulary. Each
//! handler takes the already-parsed request params and returns the
//! fields a success response should carry; the transport layer wraps
//! the result into `Response::ok`/`Response::err`.

use std::str::FromStr;

use isi_params::ParamGroup;
use isi_types::Direction;
use serde_json::{json, Map, Value};

use crate::context::AppContext;
use crate::{IpcError, Result};

fn require_str<'a>(params: &'a Map<String, Value>, key: &str) -> Result<&'a str> {
    params
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| IpcError::Validation(format!("missing or non-string field '{key}'")))
}

fn require_u32(params: &Map<String, Value>, key: &str) -> Result<u32> {
    params
        .get(key)
        .and_then(Value::as_u64)
        .map(|v| v as u32)
        .ok_or_else(|| IpcError::Validation(format!("missing or non-integer field '{key}'")))
}

fn require_direction(params: &Map<String, Value>, key: &str) -> Result<Direction> {
    let raw = require_str(params, key)?;
    Direction::from_str(raw).map_err(|_| IpcError::Validation(format!("unknown direction '{raw}'")))
}

pub fn dispatch(ctx: &AppContext, command: &str, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    match command {
        "ping" => ping(),
        "start_acquisition" => start_acquisition(ctx),
        "stop_acquisition" => stop_acquisition(ctx),
        "get_acquisition_status" => get_acquisition_status(ctx),
        "set_acquisition_mode" => set_acquisition_mode(ctx, params),
        "display_black_screen" => display_black_screen(ctx),
        "get_all_parameters" => get_all_parameters(ctx),
        "get_parameter_group" => get_parameter_group(ctx, params),
        "update_parameter_group" => update_parameter_group(ctx, params),
        "reset_to_defaults" => reset_to_defaults(ctx),
        "get_parameter_info" => get_parameter_info(ctx),
        "get_stimulus_frame" => get_stimulus_frame(ctx, params),
        "list_sessions" => list_sessions(ctx),
        "load_session" => load_session(ctx, params),
        "get_session_data" => get_session_data(ctx, params),
        "get_playback_frame" => get_playback_frame(ctx, params),
        "start_playback_sequence" => start_playback_sequence(ctx),
        "stop_playback_sequence" => stop_playback_sequence(ctx),
        "get_system_health" => get_system_health(ctx, params),
        other => Err(IpcError::UnknownCommand(other.to_string())),
    }
}

fn ping() -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    fields.insert("pong".into(), Value::Bool(true));
    Ok(fields)
}

fn start_acquisition(ctx: &AppContext) -> Result<Map<String, Value>> {
    ctx.start_acquisition()?;
    Ok(Map::new())
}

fn stop_acquisition(ctx: &AppContext) -> Result<Map<String, Value>> {
    ctx.stop_acquisition()?;
    Ok(Map::new())
}

fn get_acquisition_status(ctx: &AppContext) -> Result<Map<String, Value>> {
    let mut fields = Map::new();
    match ctx.acquisition_status() {
        Some(status) => {
            fields.insert("active".into(), Value::Bool(status.active));
            fields.insert(
                "direction".into(),
                status.direction.map(|d| Value::String(d.to_string())).unwrap_or(Value::Null),
            );
            fields.insert("generated".into(), Value::from(status.generated));
            fields.insert("expected".into(), Value::from(status.expected));
        }
        None => {
            fields.insert("active".into(), Value::Bool(false));
        }
    }
    fields.insert("mode".into(), Value::String(ctx.state.mode().to_string()));
    Ok(fields)
}

/// Switches between Idle/Preview rendering: `mode: "preview"` renders
/// the requested frame (or a black screen if no frame fields are given),
/// `mode: "idle"` exits preview. Recording must be driven through
/// `start_acquisition`/`stop_acquisition`, not this command, matching
/// the state coordinator's own transition rules.
fn set_acquisition_mode(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let mode = require_str(params, "mode")?;
    let preview = ctx.preview_controller();
    match mode {
        "preview" => {
            preview.enter()?;
            if params.contains_key("direction") {
                let direction = require_direction(params, "direction")?;
                let frame_index = require_u32(params, "frame_index")?;
                let show_bar_mask = params.get("show_bar_mask").and_then(Value::as_bool).unwrap_or(true);
                let camera = ctx.store.get_group(ParamGroup::Camera);
                let camera_fps = camera.get("camera_fps").and_then(Value::as_f64).unwrap_or(30.0);
                let total_frames = preview_total_frames(ctx, direction, camera_fps);
                preview.render_frame(direction, frame_index, total_frames, show_bar_mask)?;
            } else {
                preview.render_background();
            }
        }
        "idle" => preview.exit(),
        other => return Err(IpcError::Validation(format!("unknown mode '{other}'"))),
    }
    Ok(Map::new())
}

fn preview_total_frames(ctx: &AppContext, direction: Direction, camera_fps: f64) -> u32 {
    ctx.current_generator().sweep_frame_count(direction, camera_fps).max(1)
}

fn display_black_screen(ctx: &AppContext) -> Result<Map<String, Value>> {
    let preview = ctx.preview_controller();
    preview.enter()?;
    preview.render_background();
    Ok(Map::new())
}

fn get_all_parameters(ctx: &AppContext) -> Result<Map<String, Value>> {
    let all = ctx.store.get_all();
    let mut groups = Map::new();
    for (group, values) in all {
        groups.insert(group.as_str().to_string(), Value::Object(values));
    }
    let mut fields = Map::new();
    fields.insert("parameters".into(), Value::Object(groups));
    Ok(fields)
}

fn get_parameter_group(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let group = ParamGroup::parse(require_str(params, "group")?)?;
    let mut fields = Map::new();
    fields.insert("group".into(), Value::String(group.as_str().to_string()));
    fields.insert("parameters".into(), Value::Object(ctx.store.get_group(group)));
    Ok(fields)
}

fn update_parameter_group(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let group = ParamGroup::parse(require_str(params, "group")?)?;
    let updates = params
        .get("parameters")
        .and_then(Value::as_object)
        .ok_or_else(|| IpcError::Validation("missing 'parameters' object".into()))?
        .clone();
    let changed = ctx.store.update_group(group, updates)?;
    let mut fields = Map::new();
    fields.insert(
        "changed_keys".into(),
        Value::Array(changed.into_iter().map(Value::String).collect()),
    );
    Ok(fields)
}

fn reset_to_defaults(ctx: &AppContext) -> Result<Map<String, Value>> {
    ctx.store.reset_to_defaults()?;
    Ok(Map::new())
}

fn get_parameter_info(ctx: &AppContext) -> Result<Map<String, Value>> {
    let mut groups = Map::new();
    for group in ParamGroup::ALL {
        let specs = ctx.store.schema(group);
        let values: Vec<Value> = specs
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "kind": format!("{:?}", s.kind),
                })
            })
            .collect();
        groups.insert(group.as_str().to_string(), Value::Array(values));
    }
    let mut fields = Map::new();
    fields.insert("schema".into(), Value::Object(groups));
    Ok(fields)
}

fn get_stimulus_frame(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let direction = require_direction(params, "direction")?;
    let frame_index = require_u32(params, "frame_index")?;
    let show_bar_mask = params.get("show_bar_mask").and_then(Value::as_bool).unwrap_or(true);
    let camera = ctx.store.get_group(ParamGroup::Camera);
    let camera_fps = camera.get("camera_fps").and_then(Value::as_f64).unwrap_or(30.0);
    let total_frames = preview_total_frames(ctx, direction, camera_fps);

    let preview = ctx.preview_controller();
    preview.enter()?;
    preview.render_frame(direction, frame_index, total_frames, show_bar_mask)?;

    let mut fields = Map::new();
    fields.insert("direction".into(), Value::String(direction.to_string()));
    fields.insert("frame_index".into(), Value::from(frame_index));
    fields.insert("total_frames".into(), Value::from(total_frames));
    Ok(fields)
}

fn list_sessions(ctx: &AppContext) -> Result<Map<String, Value>> {
    let sessions = isi_session::list_sessions(&ctx.sessions_root)?;
    let items: Vec<Value> = sessions
        .into_iter()
        .map(|s| {
            json!({
                "path": s.path.display().to_string(),
                "session_name": s.session_name,
                "animal_id": s.animal_id,
                "directions": s.directions.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
            })
        })
        .collect();
    let mut fields = Map::new();
    fields.insert("sessions".into(), Value::Array(items));
    Ok(fields)
}

fn load_session(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let path = require_str(params, "session_path")?;
    ctx.load_session(std::path::PathBuf::from(path))?;
    Ok(Map::new())
}

fn get_session_data(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let direction = match params.get("direction") {
        Some(v) => Direction::from_str(v.as_str().unwrap_or_default())
            .map_err(|_| IpcError::Validation("unknown direction".into()))?,
        None => {
            return ctx.with_playback(|session| {
                let mut fields = Map::new();
                fields.insert(
                    "metadata".into(),
                    serde_json::to_value(session.metadata()).unwrap_or(Value::Null),
                );
                Ok(fields)
            });
        }
    };
    ctx.with_playback(|session| {
        let events = session.session_data(direction)?;
        let mut fields = Map::new();
        fields.insert("direction".into(), Value::String(direction.to_string()));
        fields.insert(
            "events".into(),
            serde_json::to_value(events).unwrap_or(Value::Array(vec![])),
        );
        Ok(fields)
    })
}

fn get_playback_frame(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    let direction = require_direction(params, "direction")?;
    let frame_index = require_u32(params, "frame_index")?;
    ctx.with_playback(|session| {
        let (frame, timestamp_us) = session.camera_frame(direction, frame_index)?;
        let id = frame_index as u64;
        ctx.bus.publish_camera(&frame, id, frame_index as i32, timestamp_us);
        let mut fields = Map::new();
        fields.insert("direction".into(), Value::String(direction.to_string()));
        fields.insert("frame_index".into(), Value::from(frame_index));
        fields.insert("timestamp_us".into(), Value::from(timestamp_us));
        Ok(fields)
    })
}

fn start_playback_sequence(ctx: &AppContext) -> Result<Map<String, Value>> {
    ctx.start_playback_sequence()?;
    Ok(Map::new())
}

fn stop_playback_sequence(ctx: &AppContext) -> Result<Map<String, Value>> {
    ctx.stop_playback_sequence();
    Ok(Map::new())
}

fn get_system_health(ctx: &AppContext, params: &Map<String, Value>) -> Result<Map<String, Value>> {
    // `use_cache` is accepted for wire compatibility; health here is always computed fresh.
    let include_details = params.get("include_details").and_then(Value::as_bool).unwrap_or(false);
    let mut fields = Map::new();
    fields.insert("mode".into(), Value::String(ctx.state.mode().to_string()));
    fields.insert("is_ready".into(), Value::Bool(true));
    if include_details {
        let stats = ctx.tracker.stats(1.0);
        fields.insert("sync_sample_count".into(), Value::from(stats.count));
        fields.insert("sync_mean_diff_ms".into(), json!(stats.mean_diff_ms));
        fields.insert("sync_std_diff_ms".into(), json!(stats.std_diff_ms));
    }
    Ok(fields)
}
