use std::collections::HashMap;
use std::path::PathBuf;

use hdf5::types::VarLenUnicode;
use isi_types::{CameraFrame, Direction, StimulusMeta};
use ndarray::Array3;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::metadata::SessionMetadata;
use crate::{Result, SessionError};

/// One row of `{D}_events.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StimulusEventRecord {
    pub timestamp: i64,
    pub frame_id: u64,
    pub frame_index: u32,
    pub angle: f32,
}

#[derive(Default)]
struct DirectionBuffer {
    stimulus_events: Vec<StimulusEventRecord>,
    stimulus_timestamps: Vec<i64>,
    stimulus_frame_indices: Vec<i32>,
    stimulus_angles: Vec<f32>,
    camera_timestamps: Vec<i64>,
    camera_frames: Vec<u8>,
    frame_width: u32,
    frame_height: u32,
}

/// Buffers per-direction stimulus events and camera frames in memory,
/// flushed to HDF5 and JSON on `stop_recording`. Every file is written
/// to a `.tmp` sibling first and only appears at its final name once
/// `std::fs::rename` succeeds, so a crash mid-write never leaves a
/// partial file at the name playback/analysis look for.
pub struct SessionRecorder {
    dir: PathBuf,
    buffers: Mutex<HashMap<Direction, DirectionBuffer>>,
}

impl SessionRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            buffers: Mutex::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        &self.dir
    }

    /// Begins buffering for `direction`, discarding any previous buffer
    /// for it that was never flushed.
    pub fn start_recording(&self, direction: Direction) {
        self.buffers
            .lock()
            .insert(direction, DirectionBuffer::default());
    }

    pub fn record_stimulus_frame(&self, direction: Direction, meta: &StimulusMeta) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let buf = buffers
            .get_mut(&direction)
            .ok_or(SessionError::NotRecording(direction))?;
        buf.stimulus_events.push(StimulusEventRecord {
            timestamp: meta.timestamp_us,
            frame_id: meta.frame_index as u64,
            frame_index: meta.frame_index,
            angle: meta.angle_degrees,
        });
        buf.stimulus_timestamps.push(meta.timestamp_us);
        buf.stimulus_frame_indices.push(meta.frame_index as i32);
        buf.stimulus_angles.push(meta.angle_degrees);
        Ok(())
    }

    pub fn record_camera_frame(
        &self,
        direction: Direction,
        frame: &CameraFrame,
        timestamp_us: i64,
    ) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let buf = buffers
            .get_mut(&direction)
            .ok_or(SessionError::NotRecording(direction))?;
        if buf.camera_timestamps.is_empty() {
            buf.frame_width = frame.width;
            buf.frame_height = frame.height;
        }
        buf.camera_timestamps.push(timestamp_us);
        buf.camera_frames.extend_from_slice(&frame.data);
        Ok(())
    }

    pub fn stimulus_event_count(&self, direction: Direction) -> usize {
        self.buffers
            .lock()
            .get(&direction)
            .map(|b| b.stimulus_events.len())
            .unwrap_or(0)
    }

    pub fn camera_frame_count(&self, direction: Direction) -> usize {
        self.buffers
            .lock()
            .get(&direction)
            .map(|b| b.camera_timestamps.len())
            .unwrap_or(0)
    }

    /// Flushes `direction`'s buffer to `{D}_events.json`, `{D}_stimulus.h5`
    /// and `{D}_camera.h5`, then drops the in-memory buffer. A direction
    /// that was never started flushes nothing and returns `Ok`.
    pub fn stop_recording(
        &self,
        direction: Direction,
        monitor: &Map<String, Value>,
        camera: &Map<String, Value>,
    ) -> Result<()> {
        let buf = { self.buffers.lock().remove(&direction) };
        let Some(buf) = buf else {
            return Ok(());
        };

        write_events_json(&self.dir, direction, &buf.stimulus_events)?;
        write_stimulus_h5(&self.dir, direction, &buf, monitor)?;
        write_camera_h5(&self.dir, direction, &buf, monitor, camera)?;
        Ok(())
    }

    pub fn save_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        atomic_write_json(&self.dir.join("metadata.json"), metadata)
    }
}

fn atomic_write_json<T: Serialize>(final_path: &std::path::Path, value: &T) -> Result<()> {
    let tmp = final_path.with_extension(append_tmp(final_path));
    let text = serde_json::to_string_pretty(value)?;
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, final_path)?;
    Ok(())
}

fn append_tmp(path: &std::path::Path) -> String {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{ext}.tmp"),
        None => "tmp".to_string(),
    }
}

fn write_events_json(
    dir: &std::path::Path,
    direction: Direction,
    events: &[StimulusEventRecord],
) -> Result<()> {
    let final_path = dir.join(format!("{}_events.json", direction.as_str()));
    atomic_write_json(&final_path, &events)
}

fn numeric_attr(file: &hdf5::File, key: &str, value: &Value) -> Result<()> {
    if let Some(i) = value.as_i64() {
        file.new_attr::<i64>().create(key)?.write_scalar(&i)?;
    } else if let Some(f) = value.as_f64() {
        file.new_attr::<f64>().create(key)?.write_scalar(&f)?;
    } else if let Some(s) = value.as_str() {
        let v: VarLenUnicode = s.parse().unwrap_or_default();
        file.new_attr::<VarLenUnicode>().create(key)?.write_scalar(&v)?;
    }
    Ok(())
}

fn write_stimulus_h5(
    dir: &std::path::Path,
    direction: Direction,
    buf: &DirectionBuffer,
    monitor: &Map<String, Value>,
) -> Result<()> {
    let final_path = dir.join(format!("{}_stimulus.h5", direction.as_str()));
    let tmp_path = dir.join(format!("{}_stimulus.h5.tmp", direction.as_str()));
    {
        let file = hdf5::File::create(&tmp_path)?;
        let n = buf.stimulus_timestamps.len();

        file.new_dataset::<i64>()
            .shape(n)
            .create("timestamps")?
            .write(&buf.stimulus_timestamps)?;
        file.new_dataset::<i32>()
            .shape(n)
            .create("frame_indices")?
            .write(&buf.stimulus_frame_indices)?;
        file.new_dataset::<f32>()
            .shape(n)
            .create("angles")?
            .write(&buf.stimulus_angles)?;

        for (key, value) in monitor {
            numeric_attr(&file, key, value)?;
        }
        let direction_str: VarLenUnicode = direction.as_str().parse().unwrap_or_default();
        file.new_attr::<VarLenUnicode>()
            .create("direction")?
            .write_scalar(&direction_str)?;
        file.new_attr::<i64>()
            .create("total_displayed")?
            .write_scalar(&(n as i64))?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}

fn write_camera_h5(
    dir: &std::path::Path,
    direction: Direction,
    buf: &DirectionBuffer,
    monitor: &Map<String, Value>,
    camera: &Map<String, Value>,
) -> Result<()> {
    let final_path = dir.join(format!("{}_camera.h5", direction.as_str()));
    let tmp_path = dir.join(format!("{}_camera.h5.tmp", direction.as_str()));
    {
        let file = hdf5::File::create(&tmp_path)?;
        let n = buf.camera_timestamps.len();
        let (h, w) = (buf.frame_height as usize, buf.frame_width as usize);

        let frames = Array3::from_shape_vec((n, h, w), buf.camera_frames.clone())
            .map_err(|_| SessionError::ShapeMismatch { n, h, w })?;

        file.new_dataset::<u8>()
            .shape((n, h, w))
            .deflate(4)
            .create("frames")?
            .write(&frames)?;
        file.new_dataset::<i64>()
            .shape(n)
            .create("timestamps")?
            .write(&buf.camera_timestamps)?;

        for (key, value) in monitor.iter().chain(camera.iter()) {
            numeric_attr(&file, key, value)?;
        }
        let direction_str: VarLenUnicode = direction.as_str().parse().unwrap_or_default();
        file.new_attr::<VarLenUnicode>()
            .create("direction")?
            .write_scalar(&direction_str)?;
    }
    std::fs::rename(&tmp_path, &final_path)?;
    Ok(())
}
