use chrono::{DateTime, Utc};
use isi_types::{Direction, TimestampSource};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `metadata.json` as fixed by §6: top-level identifying fields plus a
/// parameter-group snapshot and the timestamp-provenance block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_name: String,
    pub animal_id: String,
    pub animal_age: String,
    pub timestamp: DateTime<Utc>,
    pub acquisition: AcquisitionSnapshot,
    pub camera: Map<String, Value>,
    pub monitor: Map<String, Value>,
    pub stimulus: Map<String, Value>,
    pub timestamp_info: TimestampInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionSnapshot {
    pub baseline_sec: f64,
    pub between_sec: f64,
    pub cycles: u32,
    pub directions: Vec<Direction>,
    pub camera_fps: f64,
}

/// Provenance block: names the actual source of camera timestamps for
/// this recording, never inferred after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampInfo {
    pub camera_timestamp_source: TimestampSource,
    pub stimulus_timestamp_source: &'static str,
    pub synchronization_method: &'static str,
}

impl TimestampInfo {
    pub fn new(camera_timestamp_source: TimestampSource) -> Self {
        Self {
            camera_timestamp_source,
            stimulus_timestamp_source: "software",
            synchronization_method: "camera_triggered",
        }
    }
}
