//! Shared-frame bus (C3) and state coordinator (C2).
//!
//! The bus owns two independent byte regions — one for stimulus frames,
//! one for camera frames — plus a side-channel metadata stream per
//! region and a small cell holding the timestamp of the last published
//! stimulus frame, which the camera capture loop reads to emit sync
//! samples without the capture loop and the stimulus generator needing
//! any direct reference to each other.

mod region;
mod state;

pub use region::FrameRegion;
pub use state::{StateCoordinator, TransitionOutcome};

use isi_types::{CameraFrame, Direction, StimulusFrame};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Fixed wire shape for a published frame descriptor (§6). Used for both
/// the stimulus and camera metadata channels; fields that do not apply
/// to a given region (e.g. `direction` for a camera frame) carry a
/// region-appropriate default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameDescriptor {
    pub frame_id: u64,
    pub timestamp_us: i64,
    pub frame_index: i32,
    pub direction: String,
    pub angle_degrees: f32,
    pub width_px: i32,
    pub height_px: i32,
    pub data_size_bytes: i32,
    pub offset_bytes: i64,
    pub total_frames: i32,
    pub start_angle: f32,
    pub end_angle: f32,
    pub shm_path: String,
    pub channels: i32,
}

const METADATA_CHANNEL_CAPACITY: usize = 256;
const STIMULUS_REGION_BYTES: usize = 64 * 1024 * 1024;
const CAMERA_REGION_BYTES: usize = 64 * 1024 * 1024;

struct LastStimulusTimestamp {
    value: Mutex<Option<(i64, u64)>>,
}

impl LastStimulusTimestamp {
    fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }
}

/// The shared-frame bus: two ring regions, two non-blocking metadata
/// channels, and the last-stimulus-timestamp side channel.
pub struct SharedFrameBus {
    pub stimulus_region: FrameRegion,
    pub camera_region: FrameRegion,
    stimulus_meta_tx: crossbeam_channel::Sender<FrameDescriptor>,
    stimulus_meta_rx: crossbeam_channel::Receiver<FrameDescriptor>,
    camera_meta_tx: crossbeam_channel::Sender<FrameDescriptor>,
    camera_meta_rx: crossbeam_channel::Receiver<FrameDescriptor>,
    last_stimulus_timestamp: LastStimulusTimestamp,
    stimulus_shm_path: String,
    camera_shm_path: String,
}

impl Default for SharedFrameBus {
    fn default() -> Self {
        Self::new("/dev/shm/isi_stimulus", "/dev/shm/isi_camera")
    }
}

impl SharedFrameBus {
    pub fn new(stimulus_shm_path: impl Into<String>, camera_shm_path: impl Into<String>) -> Self {
        let (stimulus_meta_tx, stimulus_meta_rx) =
            crossbeam_channel::bounded(METADATA_CHANNEL_CAPACITY);
        let (camera_meta_tx, camera_meta_rx) = crossbeam_channel::bounded(METADATA_CHANNEL_CAPACITY);
        Self {
            stimulus_region: FrameRegion::new("stimulus", STIMULUS_REGION_BYTES),
            camera_region: FrameRegion::new("camera", CAMERA_REGION_BYTES),
            stimulus_meta_tx,
            stimulus_meta_rx,
            camera_meta_tx,
            camera_meta_rx,
            last_stimulus_timestamp: LastStimulusTimestamp::new(),
            stimulus_shm_path: stimulus_shm_path.into(),
            camera_shm_path: camera_shm_path.into(),
        }
    }

    /// Publish a stimulus frame: write its pixels into the stimulus
    /// region, send a descriptor on the metadata channel, and record it
    /// as the last stimulus timestamp for the camera loop to correlate
    /// against.
    pub fn publish_stimulus(
        &self,
        frame: &StimulusFrame,
        frame_id: u64,
        frame_index: i32,
        total_frames: i32,
        direction: Direction,
        angle_degrees: f32,
        start_angle: f32,
        end_angle: f32,
        timestamp_us: i64,
    ) {
        let offset = self.stimulus_region.write(&frame.data);
        let desc = FrameDescriptor {
            frame_id,
            timestamp_us,
            frame_index,
            direction: direction.to_string(),
            angle_degrees,
            width_px: frame.width as i32,
            height_px: frame.height as i32,
            data_size_bytes: frame.data.len() as i32,
            offset_bytes: offset as i64,
            total_frames,
            start_angle,
            end_angle,
            shm_path: self.stimulus_shm_path.clone(),
            channels: 1,
        };
        self.set_last_stimulus_timestamp(timestamp_us, frame_id);
        if self.stimulus_meta_tx.try_send(desc).is_err() {
            log::warn!("stimulus metadata channel full, dropping descriptor for frame {frame_id}");
        }
    }

    /// Publish a displayable (RGBA) camera frame.
    pub fn publish_camera(
        &self,
        frame: &CameraFrame,
        frame_id: u64,
        frame_index: i32,
        timestamp_us: i64,
    ) {
        let offset = self.camera_region.write(&frame.data);
        let desc = FrameDescriptor {
            frame_id,
            timestamp_us,
            frame_index,
            direction: String::new(),
            angle_degrees: 0.0,
            width_px: frame.width as i32,
            height_px: frame.height as i32,
            data_size_bytes: frame.data.len() as i32,
            offset_bytes: offset as i64,
            total_frames: 0,
            start_angle: 0.0,
            end_angle: 0.0,
            shm_path: self.camera_shm_path.clone(),
            channels: frame.channels as i32,
        };
        if self.camera_meta_tx.try_send(desc).is_err() {
            log::warn!("camera metadata channel full, dropping descriptor for frame {frame_id}");
        }
    }

    /// Publish the uniform baseline/between-trials frame. Unlike
    /// `publish_stimulus`, this does not touch the last-stimulus-timestamp
    /// cell — baseline frames are not sweep frames and must never feed
    /// the sync tracker.
    pub fn publish_baseline(&self, frame: &StimulusFrame, frame_id: u64, timestamp_us: i64) {
        let offset = self.stimulus_region.write(&frame.data);
        let desc = FrameDescriptor {
            frame_id,
            timestamp_us,
            frame_index: -1,
            direction: String::new(),
            angle_degrees: 0.0,
            width_px: frame.width as i32,
            height_px: frame.height as i32,
            data_size_bytes: frame.data.len() as i32,
            offset_bytes: offset as i64,
            total_frames: 0,
            start_angle: 0.0,
            end_angle: 0.0,
            shm_path: self.stimulus_shm_path.clone(),
            channels: 1,
        };
        if self.stimulus_meta_tx.try_send(desc).is_err() {
            log::warn!("stimulus metadata channel full, dropping baseline descriptor for frame {frame_id}");
        }
    }

    pub fn stimulus_metadata_receiver(&self) -> &crossbeam_channel::Receiver<FrameDescriptor> {
        &self.stimulus_meta_rx
    }

    pub fn camera_metadata_receiver(&self) -> &crossbeam_channel::Receiver<FrameDescriptor> {
        &self.camera_meta_rx
    }

    pub fn set_last_stimulus_timestamp(&self, ts_us: i64, frame_id: u64) {
        *self.last_stimulus_timestamp.value.lock() = Some((ts_us, frame_id));
    }

    pub fn get_last_stimulus_timestamp(&self) -> Option<(i64, u64)> {
        *self.last_stimulus_timestamp.value.lock()
    }

    /// Mandatory on every phase-entry into a non-Stimulus phase, to
    /// prevent stale sync samples leaking across phase gaps.
    pub fn clear_last_stimulus_timestamp(&self) {
        *self.last_stimulus_timestamp.value.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stim_frame() -> StimulusFrame {
        StimulusFrame::new(4, 4, vec![7u8; 16])
    }

    #[test]
    fn publish_stimulus_updates_last_timestamp_and_sends_descriptor() {
        let bus = SharedFrameBus::default();
        bus.publish_stimulus(&stim_frame(), 1, 0, 10, Direction::LR, 5.0, -10.0, 10.0, 1_000);
        assert_eq!(bus.get_last_stimulus_timestamp(), Some((1_000, 1)));
        let desc = bus.stimulus_metadata_receiver().try_recv().unwrap();
        assert_eq!(desc.frame_id, 1);
        assert_eq!(desc.width_px, 4);
        assert_eq!(desc.channels, 1);
    }

    #[test]
    fn publish_baseline_does_not_set_last_stimulus_timestamp() {
        let bus = SharedFrameBus::default();
        bus.publish_baseline(&stim_frame(), 9, 5_000);
        assert_eq!(bus.get_last_stimulus_timestamp(), None);
        let desc = bus.stimulus_metadata_receiver().try_recv().unwrap();
        assert_eq!(desc.frame_id, 9);
        assert_eq!(desc.frame_index, -1);
    }

    #[test]
    fn clear_removes_last_stimulus_timestamp() {
        let bus = SharedFrameBus::default();
        bus.set_last_stimulus_timestamp(42, 1);
        bus.clear_last_stimulus_timestamp();
        assert_eq!(bus.get_last_stimulus_timestamp(), None);
    }
}
