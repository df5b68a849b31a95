use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One line of the request stream: `{"type": "...", "messageId": "...", ...extra fields}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(rename = "type")]
    pub command: String,
    #[serde(rename = "messageId", default)]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

/// One line of the response stream. Every response echoes `messageId` if
/// the request supplied one and always carries `success` and `type`.
#[derive(Debug, Clone, Serialize)]
pub struct Response {
    pub success: bool,
    #[serde(rename = "type")]
    pub command: String,
    #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Response {
    pub fn ok(command: impl Into<String>, message_id: Option<String>, fields: Map<String, Value>) -> Self {
        Self {
            success: true,
            command: command.into(),
            message_id,
            fields,
        }
    }

    pub fn err(command: impl Into<String>, message_id: Option<String>, error: impl std::fmt::Display) -> Self {
        let mut fields = Map::new();
        fields.insert("error".to_string(), Value::String(error.to_string()));
        Self {
            success: false,
            command: command.into(),
            message_id,
            fields,
        }
    }
}

/// Asynchronous pub-events, written to the pub channel independent of
/// request/response traffic (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum PubEvent {
    #[serde(rename = "acquisition_progress")]
    AcquisitionProgress {
        phase: String,
        direction: Option<String>,
        cycle: Option<u32>,
    },
    #[serde(rename = "acquisition_direction_complete")]
    AcquisitionDirectionComplete {
        direction: String,
        generated: u32,
        expected: u32,
        complete: bool,
    },
    #[serde(rename = "stimulus_preview")]
    StimulusPreview {
        frame_id: u64,
        direction: String,
        frame_index: u32,
    },
    #[serde(rename = "playback_progress")]
    PlaybackProgress {
        direction: String,
        frame_index: u32,
    },
    #[serde(rename = "playback_complete")]
    PlaybackComplete,
    #[serde(rename = "unified_stimulus_library_invalidated")]
    StimulusLibraryInvalidated { changed_keys: Vec<String> },
    #[serde(rename = "system_state")]
    SystemState {
        state: String,
        display_text: String,
        is_ready: bool,
        is_error: bool,
    },
}
