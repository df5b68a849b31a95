//! Session recording (C8) and playback (C10).
//!
//! Recording buffers per-direction stimulus events and camera frames in
//! memory and flushes them to HDF5 + JSON on `stop_recording`, always via
//! write-to-temp-then-rename so a crash mid-write never leaves a partial
//! file at its final name. Playback is read-only: it opens the same
//! files back up and replays them at the recorded `camera_fps`.

mod metadata;
mod playback;
mod recorder;

pub use metadata::{AcquisitionSnapshot, SessionMetadata, TimestampInfo};
pub use playback::{list_sessions, PlaybackSession, SessionSummary};
pub use recorder::{SessionRecorder, StimulusEventRecord};

use isi_types::Direction;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no active recording buffer for direction {0}")]
    NotRecording(Direction),
    #[error("camera frame buffer does not divide evenly into {n} frames of {h}x{w}")]
    ShapeMismatch { n: usize, h: usize, w: usize },
    #[error("frame_index {frame_index} out of range for {total} recorded frames")]
    FrameIndexOutOfRange { frame_index: u32, total: u32 },
    #[error("session directory {0:?} has no metadata.json")]
    MissingMetadata(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("HDF5 error: {0}")]
    Hdf5(#[from] hdf5::Error),
}

pub type Result<T> = std::result::Result<T, SessionError>;
