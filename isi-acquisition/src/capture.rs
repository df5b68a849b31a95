use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use isi_bus::SharedFrameBus;
use isi_session::SessionRecorder;
use isi_sync::SyncTracker;
use isi_types::{Direction, TimestampSource};
use parking_lot::RwLock;

use crate::camera::{CameraSource, CaptureTimestamp};
use crate::controller::StimulusController;
use crate::{AcquisitionError, Result};

/// What the capture loop records to, while a direction is being
/// recorded. `None` means camera frames are only published for preview,
/// never written to disk.
pub struct RecordingTarget {
    pub direction: Direction,
    pub recorder: Arc<SessionRecorder>,
}

fn wall_clock_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Everything the camera capture loop (C7) needs, owned by whoever spawns
/// its thread and shared with the phase machine via `Arc`.
pub struct CaptureLoopContext {
    pub bus: Arc<SharedFrameBus>,
    pub tracker: Arc<SyncTracker>,
    pub controller: Arc<StimulusController>,
    pub recording_target: Arc<RwLock<Option<RecordingTarget>>>,
    pub development_mode: bool,
    pub target_fps: f64,
    pub show_bar_mask: bool,
    pub stop: Arc<AtomicBool>,
    frame_id: AtomicU64,
}

impl CaptureLoopContext {
    pub fn new(
        bus: Arc<SharedFrameBus>,
        tracker: Arc<SyncTracker>,
        controller: Arc<StimulusController>,
        development_mode: bool,
        target_fps: f64,
        show_bar_mask: bool,
    ) -> Self {
        Self {
            bus,
            tracker,
            controller,
            recording_target: Arc::new(RwLock::new(None)),
            development_mode,
            target_fps,
            show_bar_mask,
            stop: Arc::new(AtomicBool::new(false)),
            frame_id: AtomicU64::new(0),
        }
    }
}

/// Whether a capture iteration is allowed to record to disk, used to pick
/// the fail-fast-vs-log-and-continue error policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationMode {
    Recording,
    Preview,
}

/// Result of one capture iteration, for tests that want to assert on
/// what actually happened without driving a real thread loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationOutcome {
    pub recorded: bool,
    pub synced: bool,
    pub timestamp_source: TimestampSource,
}

/// Runs one capture → timestamp-resolve → publish → (record) → sync
/// iteration. Returns `Ok(None)` when the iteration was skipped after
/// logging (Preview mode, no usable timestamp). A hardware-timestamp
/// failure in Recording mode is returned as `Err` — the caller must
/// treat it as fatal per §4.7/§7.
pub fn capture_once(
    ctx: &CaptureLoopContext,
    camera: &mut dyn CameraSource,
    mode: IterationMode,
) -> Result<Option<IterationOutcome>> {
    let captured = camera
        .capture()
        .map_err(|e| AcquisitionError::CameraCapture(e.0))?;

    let (timestamp_us, source) = match captured.timestamp {
        CaptureTimestamp::Hardware(ts) => (ts, TimestampSource::Hardware),
        CaptureTimestamp::Unavailable => {
            if ctx.development_mode {
                match captured.fallback_timestamp_us {
                    Some(ts) => (ts, TimestampSource::Software),
                    None => (wall_clock_us(), TimestampSource::SoftwareDevMode),
                }
            } else if mode == IterationMode::Recording {
                return Err(AcquisitionError::NoHardwareTimestamp);
            } else {
                log::warn!("no hardware timestamp available, dropping preview frame");
                return Ok(None);
            }
        }
    };

    let frame_id = ctx.frame_id.fetch_add(1, Ordering::SeqCst);
    ctx.bus.publish_camera(&captured.rgba, frame_id, frame_id as i32, timestamp_us);

    let mut recorded = false;
    if mode == IterationMode::Recording {
        if let Some(target) = ctx.recording_target.read().as_ref() {
            target
                .recorder
                .record_camera_frame(target.direction, &captured.gray, timestamp_us)?;
            recorded = true;
        }
    }

    let stim_frame = ctx
        .controller
        .generate_next_frame(timestamp_us, ctx.show_bar_mask)
        .map_err(|e| AcquisitionError::StimulusGeneration(e.to_string()))?;

    if let Some((frame, meta)) = &stim_frame {
        let generator = ctx.controller.generator();
        let monitor = generator.monitor();
        let stim = generator.stimulus_params();
        let start_angle = isi_stim::frame_angle_deg(&monitor, &stim, meta.direction, 0, meta.total_frames);
        let end_angle = isi_stim::frame_angle_deg(
            &monitor,
            &stim,
            meta.direction,
            meta.total_frames.saturating_sub(1),
            meta.total_frames,
        );
        ctx.bus.publish_stimulus(
            frame,
            frame_id,
            meta.frame_index as i32,
            meta.total_frames as i32,
            meta.direction,
            meta.angle_degrees,
            start_angle as f32,
            end_angle as f32,
            meta.timestamp_us,
        );
        if recorded {
            if let Some(target) = ctx.recording_target.read().as_ref() {
                target.recorder.record_stimulus_frame(target.direction, meta)?;
            }
        }
    }

    let mut synced = false;
    if let Some((stim_ts, stim_frame_id)) = ctx.bus.get_last_stimulus_timestamp() {
        ctx.tracker.record(timestamp_us, Some(stim_ts), stim_frame_id);
        synced = true;
    }

    Ok(Some(IterationOutcome {
        recorded,
        synced,
        timestamp_source: source,
    }))
}

/// Runs `capture_once` in a loop at `1/target_fps` cadence until `stop`
/// is set. Meant to be the body of the capture thread spawned alongside
/// the phase machine; `capture_once` itself is what tests exercise
/// directly.
pub fn run_capture_loop(ctx: &CaptureLoopContext, camera: &mut dyn CameraSource, mode: IterationMode) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / ctx.target_fps.max(0.1));
    while !ctx.stop.load(Ordering::SeqCst) {
        match capture_once(ctx, camera, mode) {
            Ok(_) => {}
            Err(e) if mode == IterationMode::Preview => {
                log::warn!("preview capture error, continuing: {e}");
            }
            Err(e) => return Err(e),
        }
        std::thread::sleep(period);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CapturedFrame, SyntheticCameraSource};
    use isi_stim::{MonitorGeometry, StimulusGenerator, StimulusParams};

    fn ctx(development_mode: bool) -> CaptureLoopContext {
        let monitor = MonitorGeometry {
            width_px: 8,
            height_px: 6,
            width_cm: 33.6,
            height_cm: 25.2,
            distance_cm: 10.0,
            fps: 60,
        };
        let stim = StimulusParams {
            bar_width_deg: 20.0,
            drift_speed_deg_per_sec: 15.0,
            checkerboard_size_deg: 25.0,
            flicker_hz: 6.0,
            contrast: 1.0,
            background_luminance: 0.5,
        };
        let generator = Arc::new(StimulusGenerator::new(monitor, stim));
        let controller = Arc::new(StimulusController::new(generator));
        controller.start_direction(Direction::LR, 30.0);
        CaptureLoopContext::new(
            Arc::new(SharedFrameBus::default()),
            Arc::new(SyncTracker::default()),
            controller,
            development_mode,
            30.0,
            true,
        )
    }

    #[test]
    fn recording_without_hardware_timestamp_and_without_dev_mode_is_fatal() {
        let ctx = ctx(false);
        let mut camera = SyntheticCameraSource::new(8, 6, 1_000_000, 33_333);
        let err = capture_once(&ctx, &mut camera, IterationMode::Recording).unwrap_err();
        assert!(matches!(err, AcquisitionError::NoHardwareTimestamp));
    }

    #[test]
    fn preview_without_hardware_timestamp_and_without_dev_mode_is_skipped_not_fatal() {
        let ctx = ctx(false);
        let mut camera = SyntheticCameraSource::new(8, 6, 1_000_000, 33_333);
        let outcome = capture_once(&ctx, &mut camera, IterationMode::Preview).unwrap();
        assert!(outcome.is_none());
    }

    #[test]
    fn dev_mode_substitutes_deterministic_software_timestamp() {
        let ctx = ctx(true);
        let mut camera = SyntheticCameraSource::new(8, 6, 1_000_000, 33_333);
        let outcome = capture_once(&ctx, &mut camera, IterationMode::Recording).unwrap();
        assert!(outcome.is_some());
        let (stim_ts, _) = ctx.bus.get_last_stimulus_timestamp().unwrap();
        assert_eq!(stim_ts, 1_000_000);
    }

    #[test]
    fn hardware_timestamps_bypass_development_mode_gate() {
        let ctx = ctx(false);
        let mut camera = SyntheticCameraSource::new(8, 6, 2_000_000, 33_333).with_hardware_timestamps();
        let outcome = capture_once(&ctx, &mut camera, IterationMode::Recording).unwrap();
        assert!(outcome.is_some());
    }

    /// A source that offers no deterministic fallback, forcing the
    /// capture loop's development-mode substitution all the way to the
    /// wall clock rather than a source-provided value.
    struct NoFallbackCameraSource(SyntheticCameraSource);

    impl CameraSource for NoFallbackCameraSource {
        fn name(&self) -> &str {
            self.0.name()
        }

        fn capture(&mut self) -> std::result::Result<CapturedFrame, crate::camera::CameraSourceError> {
            let mut captured = self.0.capture()?;
            captured.fallback_timestamp_us = None;
            Ok(captured)
        }
    }

    #[test]
    fn dev_mode_without_fallback_substitutes_wall_clock_as_software_dev_mode() {
        let ctx = ctx(true);
        let mut camera = NoFallbackCameraSource(SyntheticCameraSource::new(8, 6, 1_000_000, 33_333));
        let outcome = capture_once(&ctx, &mut camera, IterationMode::Recording).unwrap().unwrap();
        assert_eq!(outcome.timestamp_source, TimestampSource::SoftwareDevMode);
    }
}
