use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use isi_types::{CameraFrame, Direction};
use ndarray::{Array1, Array3};

use crate::metadata::SessionMetadata;
use crate::recorder::StimulusEventRecord;
use crate::{Result, SessionError};

/// A directory found under a sessions root that at least has a readable
/// `metadata.json` — enough to list without opening any HDF5 file.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub path: PathBuf,
    pub session_name: String,
    pub animal_id: String,
    pub directions: Vec<Direction>,
}

/// Scans `base_dir` for immediate subdirectories containing a
/// `metadata.json`, skipping (and logging) any that fail to parse
/// rather than aborting the whole listing.
pub fn list_sessions(base_dir: impl AsRef<Path>) -> Result<Vec<SessionSummary>> {
    let base_dir = base_dir.as_ref();
    if !base_dir.exists() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let meta_path = path.join("metadata.json");
        if !meta_path.exists() {
            continue;
        }
        match std::fs::read_to_string(&meta_path).ok().and_then(|t| serde_json::from_str::<SessionMetadata>(&t).ok()) {
            Some(meta) => out.push(SessionSummary {
                path,
                session_name: meta.session_name,
                animal_id: meta.animal_id,
                directions: meta.acquisition.directions,
            }),
            None => log::warn!("skipping session with unreadable metadata.json: {}", path.display()),
        }
    }
    Ok(out)
}

/// A loaded, read-only session: validated `metadata.json` plus on-demand
/// access to each recorded direction's events and camera frames.
pub struct PlaybackSession {
    dir: PathBuf,
    metadata: SessionMetadata,
}

impl PlaybackSession {
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let meta_path = dir.join("metadata.json");
        if !meta_path.exists() {
            return Err(SessionError::MissingMetadata(dir));
        }
        let text = std::fs::read_to_string(&meta_path)?;
        let metadata: SessionMetadata = serde_json::from_str(&text)?;
        Ok(Self { dir, metadata })
    }

    pub fn metadata(&self) -> &SessionMetadata {
        &self.metadata
    }

    pub fn session_data(&self, direction: Direction) -> Result<Vec<StimulusEventRecord>> {
        let path = self.dir.join(format!("{}_events.json", direction.as_str()));
        let text = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn open_camera_h5(&self, direction: Direction) -> Result<hdf5::File> {
        let path = self.dir.join(format!("{}_camera.h5", direction.as_str()));
        Ok(hdf5::File::open(&path)?)
    }

    /// Reads one frame by index out of `{D}_camera.h5`. Opens and closes
    /// the file per call; this crate favors simplicity over random-access
    /// performance since playback only needs to keep pace with
    /// `camera_fps`, not outrun it.
    pub fn camera_frame(&self, direction: Direction, frame_index: u32) -> Result<(CameraFrame, i64)> {
        let file = self.open_camera_h5(direction)?;
        let frames: Array3<u8> = file.dataset("frames")?.read()?;
        let timestamps: Array1<i64> = file.dataset("timestamps")?.read()?;
        let idx = frame_index as usize;
        let (n, h, w) = frames.dim();
        if idx >= n {
            return Err(SessionError::FrameIndexOutOfRange { frame_index, total: n as u32 });
        }
        let slice = frames.index_axis(ndarray::Axis(0), idx);
        let data = slice.iter().copied().collect();
        let frame = CameraFrame::new(w as u32, h as u32, 1, data);
        Ok((frame, timestamps[idx]))
    }

    /// Replays every recorded direction at `1/camera_fps`, calling `sink`
    /// with each frame. Per-frame failures (a missing direction's file,
    /// an out-of-range index) are logged and skipped; the sequence keeps
    /// going to the next frame rather than aborting, per the "best-effort"
    /// publication policy. `sink` returning `false` stops the sequence
    /// early (used for a mid-playback cancellation request).
    pub fn replay<F>(&self, mut sink: F) -> Result<()>
    where
        F: FnMut(Direction, u32, CameraFrame, i64) -> bool,
    {
        let fps = self.metadata.acquisition.camera_fps.max(0.1);
        let period = Duration::from_secs_f64(1.0 / fps);

        for &direction in &self.metadata.acquisition.directions {
            let file = match self.open_camera_h5(direction) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("playback: skipping {direction}: {e}");
                    continue;
                }
            };
            let frames: Array3<u8> = match file.dataset("frames").and_then(|d| d.read()) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("playback: failed reading frames for {direction}: {e}");
                    continue;
                }
            };
            let timestamps: Array1<i64> = match file.dataset("timestamps").and_then(|d| d.read()) {
                Ok(t) => t,
                Err(e) => {
                    log::warn!("playback: failed reading timestamps for {direction}: {e}");
                    continue;
                }
            };
            let (n, h, w) = frames.dim();
            for idx in 0..n {
                let slice = frames.index_axis(ndarray::Axis(0), idx);
                let data = slice.iter().copied().collect();
                let frame = CameraFrame::new(w as u32, h as u32, 1, data);
                if !sink(direction, idx as u32, frame, timestamps[idx]) {
                    return Ok(());
                }
                thread::sleep(period);
            }
        }
        Ok(())
    }
}
