//! Camera-triggered stimulus controller (C5), acquisition phase machine
//! (C6), camera capture loop (C7), and preview mode (C9).
//!
//! This crate owns the run loop logic only. The bus (C3), state
//! coordinator (C2), sync tracker (C1) and session recorder (C8) it
//! drives all live in their own crates; `AcquisitionController` here is
//! just the wiring that a binary (or the IPC layer) constructs once and
//! calls into.

mod camera;
mod capture;
mod controller;
mod phase;
mod preview;

pub use camera::{CameraSource, CameraSourceError, CaptureTimestamp, CapturedFrame, SyntheticCameraSource};
pub use capture::{capture_once, run_capture_loop, CaptureLoopContext, IterationMode, IterationOutcome, RecordingTarget};
pub use controller::{ControllerStatus, StimulusController, StopSummary};
pub use phase::{AcquisitionPhaseMachine, ControllerEvent};
pub use preview::PreviewController;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use isi_bus::{SharedFrameBus, StateCoordinator};
use isi_session::SessionRecorder;
use isi_stim::StimulusGenerator;
use isi_sync::SyncTracker;
use isi_types::{AcquisitionParams, Mode};
use parking_lot::RwLock;
use serde_json::{Map, Value};

#[derive(Debug, thiserror::Error)]
pub enum AcquisitionError {
    #[error("camera capture failed: {0}")]
    CameraCapture(String),
    #[error("no hardware timestamp available and development mode is disabled")]
    NoHardwareTimestamp,
    #[error("stimulus generation failed: {0}")]
    StimulusGeneration(String),
    #[error("cannot transition from {from} to {to}")]
    ModeTransitionForbidden { from: Mode, to: Mode },
    #[error("acquisition is already running")]
    AlreadyRunning,
    #[error(transparent)]
    Session(#[from] isi_session::SessionError),
}

pub type Result<T> = std::result::Result<T, AcquisitionError>;

/// Owns every long-lived component needed to run one acquisition and
/// exposes the handful of entry points a binary or IPC layer needs:
/// start a run on a background thread, stop it, and read back status.
/// There is deliberately no direct method call from the phase machine
/// into the capture loop or vice versa — they only ever touch shared
/// `Arc` state, so this struct is the only place that needs to know both
/// exist.
pub struct AcquisitionController {
    pub bus: Arc<SharedFrameBus>,
    pub state: Arc<StateCoordinator>,
    pub tracker: Arc<SyncTracker>,
    pub generator: Arc<StimulusGenerator>,
    stimulus_controller: Arc<StimulusController>,
    capture_ctx: Arc<CaptureLoopContext>,
    stop: Arc<AtomicBool>,
    handles: RwLock<Option<(JoinHandle<()>, JoinHandle<()>)>>,
}

impl AcquisitionController {
    pub fn new(
        bus: Arc<SharedFrameBus>,
        state: Arc<StateCoordinator>,
        tracker: Arc<SyncTracker>,
        generator: Arc<StimulusGenerator>,
        development_mode: bool,
        target_fps: f64,
        show_bar_mask: bool,
    ) -> Self {
        let stimulus_controller = Arc::new(StimulusController::new(generator.clone()));
        let capture_ctx = Arc::new(CaptureLoopContext::new(
            bus.clone(),
            tracker.clone(),
            stimulus_controller.clone(),
            development_mode,
            target_fps,
            show_bar_mask,
        ));
        Self {
            bus,
            state,
            tracker,
            generator,
            stimulus_controller,
            capture_ctx,
            stop: Arc::new(AtomicBool::new(false)),
            handles: RwLock::new(None),
        }
    }

    /// Starts a recording run: spawns the capture-loop thread and the
    /// phase-machine thread, wires them through the shared
    /// `recording_target` cell, and returns immediately. Progress is
    /// reported on `events`; the caller is responsible for draining it.
    pub fn start(
        &self,
        params: AcquisitionParams,
        session_dir: std::path::PathBuf,
        monitor: Map<String, Value>,
        camera: Map<String, Value>,
        mut camera_source: Box<dyn CameraSource>,
        events: crossbeam_channel::Sender<ControllerEvent>,
    ) -> Result<()> {
        if self.state.transition_to(Mode::Recording) == isi_bus::TransitionOutcome::Forbidden {
            return Err(AcquisitionError::AlreadyRunning);
        }

        let recorder = Arc::new(SessionRecorder::new(session_dir)?);
        self.stop.store(false, Ordering::SeqCst);
        self.capture_ctx.stop.store(false, Ordering::SeqCst);

        let capture_events = events.clone();

        let phase_machine = AcquisitionPhaseMachine::new(
            self.bus.clone(),
            self.state.clone(),
            self.stimulus_controller.clone(),
            self.generator.clone(),
            recorder,
            self.capture_ctx.recording_target.clone(),
            self.capture_ctx.stop.clone(),
            self.stop.clone(),
            events.clone(),
        );

        let capture_ctx = self.capture_ctx.clone();
        let capture_stop = self.stop.clone();
        let capture_state = self.state.clone();
        let capture_handle = std::thread::spawn(move || {
            if let Err(e) = run_capture_loop(&capture_ctx, camera_source.as_mut(), IterationMode::Recording) {
                log::error!("capture loop terminated: {e}");
                capture_stop.store(true, Ordering::SeqCst);
                capture_ctx.stop.store(true, Ordering::SeqCst);
                capture_state.transition_to(Mode::Idle);
                if capture_events
                    .send(ControllerEvent::Failed { message: e.to_string() })
                    .is_err()
                {
                    log::warn!("controller event channel closed, dropping fatal capture event");
                }
            }
        });

        let phase_stop = self.stop.clone();
        let phase_capture_stop = self.capture_ctx.stop.clone();
        let phase_state = self.state.clone();
        let phase_handle = std::thread::spawn(move || {
            if let Err(e) = phase_machine.run(&params, &monitor, &camera) {
                log::error!("phase machine terminated: {e}");
                phase_stop.store(true, Ordering::SeqCst);
                phase_capture_stop.store(true, Ordering::SeqCst);
                phase_state.transition_to(Mode::Idle);
                if events.send(ControllerEvent::Failed { message: e.to_string() }).is_err() {
                    log::warn!("controller event channel closed, dropping fatal phase event");
                }
            }
        });

        *self.handles.write() = Some((capture_handle, phase_handle));
        Ok(())
    }

    /// Requests cancellation and blocks until both threads exit.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some((capture_handle, phase_handle)) = self.handles.write().take() {
            let _ = phase_handle.join();
            let _ = capture_handle.join();
        }
    }

    pub fn status(&self) -> ControllerStatus {
        self.stimulus_controller.get_status()
    }
}
