//! Shared value types for the ISI acquisition controller.
//!
//! Every other crate in the workspace depends on this one for the data
//! model fixed by the acquisition spec: directions, phases, modes,
//! frame/metadata pairs, and sync samples. No component logic lives
//! here, only constructors and validation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four drifting-bar sweep axes.
///
/// `RL` is the time-reverse of `LR`; `BT` is the time-reverse of `TB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    LR,
    RL,
    TB,
    BT,
}

impl Direction {
    pub const ALL: [Direction; 4] = [Direction::LR, Direction::RL, Direction::TB, Direction::BT];

    pub fn as_str(self) -> &'static str {
        match self {
            Direction::LR => "LR",
            Direction::RL => "RL",
            Direction::TB => "TB",
            Direction::BT => "BT",
        }
    }

    /// True for the horizontal axis (LR/RL); false for vertical (TB/BT).
    pub fn is_horizontal(self) -> bool {
        matches!(self, Direction::LR | Direction::RL)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown direction: {0}")]
pub struct ParseDirectionError(String);

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LR" => Ok(Direction::LR),
            "RL" => Ok(Direction::RL),
            "TB" => Ok(Direction::TB),
            "BT" => Ok(Direction::BT),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

/// Acquisition phase, sequenced monotonically within a run by the phase
/// machine (C6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Idle,
    InitialBaseline,
    Stimulus,
    BetweenTrials,
    FinalBaseline,
    Complete,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "IDLE",
            Phase::InitialBaseline => "INITIAL_BASELINE",
            Phase::Stimulus => "STIMULUS",
            Phase::BetweenTrials => "BETWEEN_TRIALS",
            Phase::FinalBaseline => "FINAL_BASELINE",
            Phase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level mutually-exclusive operating mode (C2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Idle,
    Preview,
    Recording,
    Playback,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Idle => "idle",
            Mode::Preview => "preview",
            Mode::Recording => "recording",
            Mode::Playback => "playback",
        };
        f.write_str(s)
    }
}

/// Where a camera capture timestamp came from. Recorded verbatim into
/// `metadata.json.timestamp_info` for scientific provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampSource {
    Hardware,
    Software,
    SoftwareDevMode,
}

impl TimestampSource {
    pub fn as_str(self) -> &'static str {
        match self {
            TimestampSource::Hardware => "hardware",
            TimestampSource::Software => "software",
            TimestampSource::SoftwareDevMode => "software_dev_mode",
        }
    }
}

impl fmt::Display for TimestampSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ParamsError {
    #[error("baseline_sec must be >= 0, got {0}")]
    NegativeBaseline(f64),
    #[error("between_sec must be >= 0, got {0}")]
    NegativeBetween(f64),
    #[error("cycles must be >= 1, got {0}")]
    ZeroCycles(u32),
    #[error("directions must be non-empty")]
    EmptyDirections,
    #[error("directions must not contain duplicates")]
    DuplicateDirection,
    #[error("camera_fps must be > 0, got {0}")]
    NonPositiveFps(f64),
}

/// Immutable parameters for one acquisition run.
///
/// A run materializes as `directions.len() * cycles` stimulus trials plus
/// bracketing and inter-trial baselines. All fields must be explicitly
/// supplied; there are no defaults (§3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcquisitionParams {
    pub baseline_sec: f64,
    pub between_sec: f64,
    pub cycles: u32,
    pub directions: Vec<Direction>,
    pub camera_fps: f64,
}

impl AcquisitionParams {
    pub fn new(
        baseline_sec: f64,
        between_sec: f64,
        cycles: u32,
        directions: Vec<Direction>,
        camera_fps: f64,
    ) -> Result<Self, ParamsError> {
        if baseline_sec < 0.0 {
            return Err(ParamsError::NegativeBaseline(baseline_sec));
        }
        if between_sec < 0.0 {
            return Err(ParamsError::NegativeBetween(between_sec));
        }
        if cycles < 1 {
            return Err(ParamsError::ZeroCycles(cycles));
        }
        if directions.is_empty() {
            return Err(ParamsError::EmptyDirections);
        }
        let mut seen = std::collections::HashSet::new();
        for d in &directions {
            if !seen.insert(*d) {
                return Err(ParamsError::DuplicateDirection);
            }
        }
        if !(camera_fps > 0.0) {
            return Err(ParamsError::NonPositiveFps(camera_fps));
        }
        Ok(Self {
            baseline_sec,
            between_sec,
            cycles,
            directions,
            camera_fps,
        })
    }

    /// Total number of stimulus trials in this run.
    pub fn trial_count(&self) -> usize {
        self.directions.len() * self.cycles as usize
    }
}

/// Metadata accompanying one rendered [`StimulusFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StimulusMeta {
    pub frame_index: u32,
    pub total_frames: u32,
    pub direction: Direction,
    pub angle_degrees: f32,
    pub timestamp_us: i64,
    pub channels: u8,
}

/// A single grayscale stimulus frame, fixed `(height, width)`, uint8.
#[derive(Debug, Clone, PartialEq)]
pub struct StimulusFrame {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl StimulusFrame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize);
        Self {
            width,
            height,
            data,
        }
    }
}

/// Metadata accompanying one captured [`CameraFrame`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraMeta {
    pub frame_index: u64,
    pub capture_timestamp_us: i64,
    pub camera_name: String,
    pub timestamp_source: TimestampSource,
}

/// A captured camera frame. Grayscale when destined for recording, RGBA
/// when destined for display via the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraFrame {
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub data: Vec<u8>,
}

impl CameraFrame {
    pub fn new(width: u32, height: u32, channels: u8, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height) as usize * channels as usize);
        Self {
            width,
            height,
            channels,
            data,
        }
    }
}

/// One `(cam_ts, stim_ts, frame_id)` tuple with derived signed delta,
/// accepted by the sync tracker (C1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncSample {
    pub camera_timestamp_us: i64,
    pub stimulus_timestamp_us: i64,
    pub frame_id: u64,
    pub signed_delta_us: i64,
}

impl SyncSample {
    pub fn new(camera_timestamp_us: i64, stimulus_timestamp_us: i64, frame_id: u64) -> Self {
        Self {
            camera_timestamp_us,
            stimulus_timestamp_us,
            frame_id,
            signed_delta_us: camera_timestamp_us - stimulus_timestamp_us,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_round_trips_through_str() {
        for d in Direction::ALL {
            assert_eq!(Direction::from_str(d.as_str()).unwrap(), d);
        }
    }

    #[test]
    fn params_reject_empty_directions() {
        let err = AcquisitionParams::new(1.0, 1.0, 1, vec![], 30.0).unwrap_err();
        assert_eq!(err, ParamsError::EmptyDirections);
    }

    #[test]
    fn params_reject_duplicate_directions() {
        let err =
            AcquisitionParams::new(1.0, 1.0, 1, vec![Direction::LR, Direction::LR], 30.0)
                .unwrap_err();
        assert_eq!(err, ParamsError::DuplicateDirection);
    }

    #[test]
    fn params_trial_count() {
        let p = AcquisitionParams::new(
            0.5,
            0.5,
            3,
            vec![Direction::LR, Direction::RL],
            30.0,
        )
        .unwrap();
        assert_eq!(p.trial_count(), 6);
    }

    #[test]
    fn sync_sample_computes_signed_delta() {
        let s = SyncSample::new(1_000_100, 1_000_000, 7);
        assert_eq!(s.signed_delta_us, 100);
    }
}
