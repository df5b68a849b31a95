use std::path::PathBuf;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use isi_acquisition::{AcquisitionController, ControllerEvent, PreviewController, SyntheticCameraSource};
use isi_bus::{SharedFrameBus, StateCoordinator};
use isi_params::{ParamGroup, ParamStore};
use isi_session::PlaybackSession;
use isi_stim::{MonitorGeometry, StimulusGenerator, StimulusParams};
use isi_sync::SyncTracker;
use isi_types::{AcquisitionParams, Direction, Mode};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::IpcError;

fn as_f64(m: &Map<String, Value>, key: &str) -> f64 {
    m.get(key).and_then(Value::as_f64).unwrap_or_default()
}

fn as_u32(m: &Map<String, Value>, key: &str) -> u32 {
    m.get(key).and_then(Value::as_u64).unwrap_or_default() as u32
}

fn monitor_geometry(monitor: &Map<String, Value>) -> MonitorGeometry {
    MonitorGeometry {
        width_px: as_u32(monitor, "monitor_width_px"),
        height_px: as_u32(monitor, "monitor_height_px"),
        width_cm: as_f64(monitor, "monitor_width_cm"),
        height_cm: as_f64(monitor, "monitor_height_cm"),
        distance_cm: as_f64(monitor, "monitor_distance_cm"),
        fps: as_u32(monitor, "monitor_fps"),
    }
}

fn stimulus_params(stimulus: &Map<String, Value>) -> StimulusParams {
    StimulusParams {
        bar_width_deg: as_f64(stimulus, "bar_width_deg"),
        drift_speed_deg_per_sec: as_f64(stimulus, "drift_speed_deg_per_sec"),
        checkerboard_size_deg: as_f64(stimulus, "checkerboard_size_deg"),
        flicker_hz: as_f64(stimulus, "flicker_hz"),
        contrast: as_f64(stimulus, "contrast"),
        background_luminance: as_f64(stimulus, "background_luminance"),
    }
}

/// Everything an IPC handler needs: the parameter store, the shared
/// components every mode is built from, and whatever run/session is
/// currently active. One instance lives for the whole process lifetime.
pub struct AppContext {
    pub store: Arc<ParamStore>,
    pub bus: Arc<SharedFrameBus>,
    pub state: Arc<StateCoordinator>,
    pub tracker: Arc<SyncTracker>,
    pub sessions_root: PathBuf,
    acquisition: RwLock<Option<Arc<AcquisitionController>>>,
    playback: RwLock<Option<Arc<PlaybackSession>>>,
    playback_stop: Arc<AtomicBool>,
    generator: Arc<StimulusGenerator>,
    pub events: crossbeam_channel::Sender<crate::protocol::PubEvent>,
}

impl AppContext {
    pub fn new(
        store: Arc<ParamStore>,
        sessions_root: PathBuf,
        events: crossbeam_channel::Sender<crate::protocol::PubEvent>,
    ) -> Self {
        let monitor = store.get_group(ParamGroup::Monitor);
        let stimulus = store.get_group(ParamGroup::Stimulus);
        let generator = Arc::new(StimulusGenerator::new(monitor_geometry(&monitor), stimulus_params(&stimulus)));

        let ctx = Self {
            store,
            bus: Arc::new(SharedFrameBus::default()),
            state: Arc::new(StateCoordinator::default()),
            tracker: Arc::new(SyncTracker::default()),
            sessions_root,
            acquisition: RwLock::new(None),
            playback: RwLock::new(None),
            playback_stop: Arc::new(AtomicBool::new(false)),
            generator,
            events,
        };
        ctx.subscribe_generator_to_params();
        ctx
    }

    /// Keeps the long-lived generator's cached invariants in step with the
    /// parameter store instead of rebuilding a `StimulusGenerator` from
    /// scratch on every call (§4.11/S5): a real change to `monitor` or
    /// `stimulus` updates the generator in place and publishes
    /// `unified_stimulus_library_invalidated`; a same-value update, which
    /// never reaches a subscriber per `ParamStore::update_group`, stays
    /// silent.
    fn subscribe_generator_to_params(&self) {
        let generator = self.generator.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        self.store.subscribe(
            ParamGroup::Monitor,
            Box::new(move |changed_keys| {
                let monitor = store.get_group(ParamGroup::Monitor);
                generator.update_monitor(monitor_geometry(&monitor));
                emit_library_invalidated(&events, changed_keys);
            }),
        );

        let generator = self.generator.clone();
        let store = self.store.clone();
        let events = self.events.clone();
        self.store.subscribe(
            ParamGroup::Stimulus,
            Box::new(move |changed_keys| {
                let stimulus = store.get_group(ParamGroup::Stimulus);
                generator.update_stimulus_params(stimulus_params(&stimulus));
                emit_library_invalidated(&events, changed_keys);
            }),
        );
    }

    pub fn current_generator(&self) -> Arc<StimulusGenerator> {
        self.generator.clone()
    }

    pub fn preview_controller(&self) -> PreviewController {
        PreviewController::new(self.bus.clone(), self.state.clone(), self.current_generator())
    }

    pub fn acquisition_params(&self) -> Result<AcquisitionParams, IpcError> {
        let acq = self.store.get_group(ParamGroup::Acquisition);
        let camera = self.store.get_group(ParamGroup::Camera);
        let directions: Vec<Direction> = acq
            .get("directions")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .filter_map(|s| Direction::from_str(s).ok())
                    .collect()
            })
            .unwrap_or_default();
        AcquisitionParams::new(
            as_f64(&acq, "baseline_sec"),
            as_f64(&acq, "between_sec"),
            as_u32(&acq, "cycles"),
            directions,
            as_f64(&camera, "camera_fps"),
        )
        .map_err(|e| IpcError::Validation(e.to_string()))
    }

    /// Starts a recording run with a synthetic camera source standing in
    /// for whatever hardware backend is configured elsewhere; production
    /// deployments swap this for a real `CameraSource`.
    pub fn start_acquisition(&self) -> Result<(), IpcError> {
        if self.acquisition.read().is_some() {
            return Err(IpcError::Precondition("acquisition already running".into()));
        }
        let params = self.acquisition_params()?;
        let session = self.store.get_group(ParamGroup::Session);
        let monitor = self.store.get_group(ParamGroup::Monitor);
        let camera = self.store.get_group(ParamGroup::Camera);
        let development_mode = camera.get("development_mode").and_then(Value::as_bool).unwrap_or(false);
        let camera_width = as_u32(&camera, "camera_width_px").max(1);
        let camera_height = as_u32(&camera, "camera_height_px").max(1);
        let camera_fps = as_f64(&camera, "camera_fps").max(0.1);

        let session_name = session
            .get("session_name")
            .and_then(Value::as_str)
            .unwrap_or("unnamed_session")
            .to_string();
        let session_dir = self.sessions_root.join(&session_name);

        let controller = Arc::new(AcquisitionController::new(
            self.bus.clone(),
            self.state.clone(),
            self.tracker.clone(),
            self.current_generator(),
            development_mode,
            camera_fps,
            true,
        ));

        let camera_source = Box::new(SyntheticCameraSource::new(
            camera_width,
            camera_height,
            0,
            (1_000_000.0 / camera_fps) as i64,
        ));

        let (tx, rx) = crossbeam_channel::unbounded();
        let events = self.events.clone();
        std::thread::spawn(move || {
            for evt in rx.iter() {
                forward_event(&events, evt);
            }
        });

        controller.start(params, session_dir, monitor, camera, camera_source, tx)?;
        *self.acquisition.write() = Some(controller);
        Ok(())
    }

    pub fn stop_acquisition(&self) -> Result<(), IpcError> {
        let controller = self
            .acquisition
            .write()
            .take()
            .ok_or_else(|| IpcError::Precondition("no acquisition is running".into()))?;
        controller.stop();
        Ok(())
    }

    pub fn acquisition_status(&self) -> Option<isi_acquisition::ControllerStatus> {
        self.acquisition.read().as_ref().map(|c| c.status())
    }

    pub fn load_session(&self, dir: PathBuf) -> Result<(), IpcError> {
        let session = PlaybackSession::load(dir)?;
        *self.playback.write() = Some(Arc::new(session));
        Ok(())
    }

    pub fn with_playback<T>(&self, f: impl FnOnce(&PlaybackSession) -> Result<T, IpcError>) -> Result<T, IpcError> {
        let guard = self.playback.read();
        let session = guard
            .as_ref()
            .ok_or_else(|| IpcError::Precondition("no session loaded".into()))?;
        f(session)
    }

    /// Starts the automatic timed replay (§4.10) of the currently loaded
    /// session on a background thread: every recorded direction, at
    /// `1/camera_fps`, publishing each frame to the bus and a
    /// `playback_progress` pub-event, then `playback_complete`. Returns as
    /// soon as the thread is spawned; `stop_playback_sequence` cancels it
    /// early.
    pub fn start_playback_sequence(&self) -> Result<(), IpcError> {
        let session = self
            .playback
            .read()
            .clone()
            .ok_or_else(|| IpcError::Precondition("no session loaded".into()))?;
        if self.state.transition_to(Mode::Playback) == isi_bus::TransitionOutcome::Forbidden {
            return Err(IpcError::Precondition("cannot enter playback from current mode".into()));
        }

        self.playback_stop.store(false, Ordering::SeqCst);
        let stop = self.playback_stop.clone();
        let bus = self.bus.clone();
        let state = self.state.clone();
        let events = self.events.clone();
        std::thread::spawn(move || {
            let result = session.replay(|direction, frame_index, frame, timestamp_us| {
                if stop.load(Ordering::SeqCst) {
                    return false;
                }
                bus.publish_camera(&frame, frame_index as u64, frame_index as i32, timestamp_us);
                let event = crate::protocol::PubEvent::PlaybackProgress {
                    direction: direction.as_str().to_string(),
                    frame_index,
                };
                if events.send(event).is_err() {
                    log::warn!("pub-event channel closed, dropping playback progress event");
                }
                true
            });
            if let Err(e) = result {
                log::error!("playback sequence terminated: {e}");
            }
            state.transition_to(Mode::Idle);
            if events.send(crate::protocol::PubEvent::PlaybackComplete).is_err() {
                log::warn!("pub-event channel closed, dropping playback complete event");
            }
        });
        Ok(())
    }

    /// Requests cancellation of an in-flight replay; the background
    /// thread finishes its current frame's sleep, then exits and emits
    /// `playback_complete`.
    pub fn stop_playback_sequence(&self) {
        self.playback_stop.store(true, Ordering::SeqCst);
    }
}

fn emit_library_invalidated(events: &crossbeam_channel::Sender<crate::protocol::PubEvent>, changed_keys: &[String]) {
    let event = crate::protocol::PubEvent::StimulusLibraryInvalidated {
        changed_keys: changed_keys.to_vec(),
    };
    if events.send(event).is_err() {
        log::warn!("pub-event channel closed, dropping stimulus-library-invalidated event");
    }
}

fn forward_event(events: &crossbeam_channel::Sender<crate::protocol::PubEvent>, evt: ControllerEvent) {
    let mapped = match evt {
        ControllerEvent::PhaseChanged { phase, direction, cycle } => crate::protocol::PubEvent::AcquisitionProgress {
            phase: phase.as_str().to_string(),
            direction: direction.map(|d| d.as_str().to_string()),
            cycle,
        },
        ControllerEvent::DirectionComplete { direction, summary } => {
            crate::protocol::PubEvent::AcquisitionDirectionComplete {
                direction: direction.as_str().to_string(),
                generated: summary.generated,
                expected: summary.expected,
                complete: summary.complete,
            }
        }
        ControllerEvent::Stopped | ControllerEvent::Completed => crate::protocol::PubEvent::SystemState {
            state: "idle".to_string(),
            display_text: "Acquisition stopped".to_string(),
            is_ready: true,
            is_error: false,
        },
        ControllerEvent::Failed { message } => crate::protocol::PubEvent::SystemState {
            state: "idle".to_string(),
            display_text: format!("Acquisition failed: {message}"),
            is_ready: true,
            is_error: true,
        },
    };
    if events.send(mapped).is_err() {
        log::warn!("pub-event channel closed, dropping acquisition event");
    }
}
