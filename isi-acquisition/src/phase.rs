use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use isi_bus::{SharedFrameBus, StateCoordinator};
use isi_session::SessionRecorder;
use isi_stim::StimulusGenerator;
use isi_types::{AcquisitionParams, Direction, Mode, Phase};
use parking_lot::RwLock;
use serde_json::{Map, Value};

use crate::capture::RecordingTarget;
use crate::controller::{StimulusController, StopSummary};
use crate::Result;

/// Progress events the phase machine emits for the IPC layer to turn
/// into `acquisition_progress` pub-events, replacing the cyclic
/// references a manager/controller pair would otherwise need.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    PhaseChanged {
        phase: Phase,
        direction: Option<Direction>,
        cycle: Option<u32>,
    },
    DirectionComplete {
        direction: Direction,
        summary: StopSummary,
    },
    Stopped,
    Completed,
    /// A thread terminated on a fatal error (§4.6/§7): the caller has
    /// already driven the stop flags and transitioned state to `Idle` by
    /// the time this is sent.
    Failed { message: String },
}

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Acquisition phase machine (C6). Drives the deterministic
/// baseline/stimulus/between-trials/baseline/complete sequence across
/// all configured directions and cycles, polling the camera-triggered
/// controller for completion rather than generating frames itself — that
/// happens on the independently-running capture loop thread.
pub struct AcquisitionPhaseMachine {
    bus: Arc<SharedFrameBus>,
    state: Arc<StateCoordinator>,
    controller: Arc<StimulusController>,
    generator: Arc<StimulusGenerator>,
    recorder: Arc<SessionRecorder>,
    recording_target: Arc<RwLock<Option<RecordingTarget>>>,
    capture_stop: Arc<AtomicBool>,
    stop: Arc<AtomicBool>,
    events: crossbeam_channel::Sender<ControllerEvent>,
    frame_id: AtomicU64,
}

impl AcquisitionPhaseMachine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        bus: Arc<SharedFrameBus>,
        state: Arc<StateCoordinator>,
        controller: Arc<StimulusController>,
        generator: Arc<StimulusGenerator>,
        recorder: Arc<SessionRecorder>,
        recording_target: Arc<RwLock<Option<RecordingTarget>>>,
        capture_stop: Arc<AtomicBool>,
        stop: Arc<AtomicBool>,
        events: crossbeam_channel::Sender<ControllerEvent>,
    ) -> Self {
        Self {
            bus,
            state,
            controller,
            generator,
            recorder,
            recording_target,
            capture_stop,
            stop,
            events,
            frame_id: AtomicU64::new(0),
        }
    }

    fn emit(&self, event: ControllerEvent) {
        if self.events.try_send(event).is_err() {
            log::warn!("controller event channel full, dropping progress event");
        }
    }

    fn enter_phase(&self, phase: Phase, direction: Option<Direction>, cycle: Option<u32>) {
        if phase != Phase::Stimulus {
            self.bus.clear_last_stimulus_timestamp();
        }
        log::info!("acquisition phase -> {phase} (direction={direction:?}, cycle={cycle:?})");
        self.emit(ControllerEvent::PhaseChanged { phase, direction, cycle });
    }

    fn publish_baseline(&self) {
        let frame = self.generator.background_frame();
        let id = self.frame_id.fetch_add(1, Ordering::SeqCst);
        self.bus.publish_baseline(&frame, id, now_us());
    }

    /// Sleeps up to `seconds`, in <=100ms slices, checking the stop flag
    /// between slices. Returns `true` if it was cancelled early.
    fn sleep_cancelable(&self, seconds: f64) -> bool {
        let total = Duration::from_secs_f64(seconds.max(0.0));
        let start = Instant::now();
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return true;
            }
            let elapsed = start.elapsed();
            if elapsed >= total {
                return false;
            }
            let slice = (total - elapsed).min(Duration::from_millis(100));
            std::thread::sleep(slice);
        }
    }

    fn finish_direction(
        &self,
        direction: Direction,
        monitor: &Map<String, Value>,
        camera: &Map<String, Value>,
    ) -> Result<StopSummary> {
        let summary = self.controller.stop_direction();
        self.recorder.stop_recording(direction, monitor, camera)?;
        *self.recording_target.write() = None;
        self.emit(ControllerEvent::DirectionComplete { direction, summary });
        Ok(summary)
    }

    fn handle_stop(&self) -> Result<()> {
        self.state.transition_to(Mode::Idle);
        self.capture_stop.store(true, Ordering::SeqCst);
        self.enter_phase(Phase::Idle, None, None);
        self.publish_baseline();
        self.emit(ControllerEvent::Stopped);
        Ok(())
    }

    /// Runs the full deterministic sequence for `params`, blocking until
    /// completion, a fatal error, or the shared stop flag is set.
    /// `monitor`/`camera` are parameter snapshots passed straight through
    /// to the session recorder's HDF5 attributes.
    pub fn run(
        &self,
        params: &AcquisitionParams,
        monitor: &Map<String, Value>,
        camera: &Map<String, Value>,
    ) -> Result<()> {
        self.enter_phase(Phase::InitialBaseline, None, None);
        self.publish_baseline();
        if self.sleep_cancelable(params.baseline_sec) {
            return self.handle_stop();
        }

        let n_directions = params.directions.len();
        for (d_idx, &direction) in params.directions.iter().enumerate() {
            let n = self.controller.start_direction(direction, params.camera_fps);
            self.recorder.start_recording(direction);
            *self.recording_target.write() = Some(RecordingTarget {
                direction,
                recorder: self.recorder.clone(),
            });

            for cycle in 0..params.cycles {
                self.enter_phase(Phase::Stimulus, Some(direction), Some(cycle));

                let timeout = Duration::from_secs_f64(2.0 * n as f64 / params.camera_fps.max(0.1));
                let start = Instant::now();
                loop {
                    if self.stop.load(Ordering::SeqCst) {
                        self.finish_direction(direction, monitor, camera)?;
                        return self.handle_stop();
                    }
                    if self.controller.is_direction_complete() {
                        break;
                    }
                    if start.elapsed() > timeout {
                        log::warn!("sweep completion timeout for {direction} cycle {cycle}, proceeding");
                        break;
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }

                if cycle + 1 < params.cycles {
                    self.enter_phase(Phase::BetweenTrials, Some(direction), Some(cycle));
                    self.publish_baseline();
                    if self.sleep_cancelable(params.between_sec) {
                        self.finish_direction(direction, monitor, camera)?;
                        return self.handle_stop();
                    }
                }
            }

            self.finish_direction(direction, monitor, camera)?;

            if d_idx + 1 < n_directions {
                self.enter_phase(Phase::BetweenTrials, None, None);
                self.publish_baseline();
                if self.sleep_cancelable(params.baseline_sec) {
                    return self.handle_stop();
                }
            }
        }

        self.enter_phase(Phase::FinalBaseline, None, None);
        self.publish_baseline();
        self.sleep_cancelable(params.baseline_sec);

        self.enter_phase(Phase::Complete, None, None);
        self.capture_stop.store(true, Ordering::SeqCst);
        self.emit(ControllerEvent::Completed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isi_bus::SharedFrameBus;
    use isi_stim::{MonitorGeometry, StimulusParams};
    use isi_types::AcquisitionParams;
    use std::sync::atomic::AtomicBool;

    struct Harness {
        machine: AcquisitionPhaseMachine,
        controller: Arc<StimulusController>,
        stop: Arc<AtomicBool>,
        events: crossbeam_channel::Receiver<ControllerEvent>,
        _tmp: tempfile::TempDir,
    }

    fn harness() -> Harness {
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
        let controller = Arc::new(StimulusController::new(generator.clone()));
        let tmp = tempfile::tempdir().unwrap();
        let recorder = Arc::new(SessionRecorder::new(tmp.path()).unwrap());
        let stop = Arc::new(AtomicBool::new(false));
        let (tx, rx) = crossbeam_channel::unbounded();
        let machine = AcquisitionPhaseMachine::new(
            Arc::new(SharedFrameBus::default()),
            Arc::new(StateCoordinator::default()),
            controller.clone(),
            generator,
            recorder,
            Arc::new(RwLock::new(None)),
            Arc::new(AtomicBool::new(false)),
            stop.clone(),
            tx,
        );
        Harness {
            machine,
            controller,
            stop,
            events: rx,
            _tmp: tmp,
        }
    }

    /// A background "capture loop" stand-in that keeps calling
    /// `generate_next_frame` on whichever direction is currently active,
    /// driving sweeps to completion the same way the real capture thread
    /// would, just without a camera or the bus in between.
    fn spawn_driver(controller: Arc<StimulusController>, stop: Arc<AtomicBool>) -> std::thread::JoinHandle<()> {
        std::thread::spawn(move || {
            let mut t = 0i64;
            while !stop.load(Ordering::SeqCst) {
                let _ = controller.generate_next_frame(t, true);
                t += 1;
                std::thread::sleep(Duration::from_micros(200));
            }
        })
    }

    #[test]
    fn phase_sequence_follows_baseline_stimulus_baseline_complete_order() {
        let h = harness();
        let params =
            AcquisitionParams::new(0.01, 0.01, 1, vec![Direction::LR, Direction::RL], 2000.0).unwrap();

        let driver_stop = Arc::new(AtomicBool::new(false));
        let driver = spawn_driver(h.controller.clone(), driver_stop.clone());

        h.machine.run(&params, &Map::new(), &Map::new()).unwrap();
        driver_stop.store(true, Ordering::SeqCst);
        driver.join().unwrap();

        let phases: Vec<Phase> = h
            .events
            .try_iter()
            .filter_map(|e| match e {
                ControllerEvent::PhaseChanged { phase, .. } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(phases.first(), Some(&Phase::InitialBaseline));
        assert_eq!(phases.last(), Some(&Phase::Complete));
        assert!(phases.iter().filter(|p| **p == Phase::Stimulus).count() >= 2);
    }

    #[test]
    fn mid_sweep_stop_flushes_partial_recording_and_emits_stopped() {
        let h = harness();
        let params = AcquisitionParams::new(0.05, 0.05, 3, vec![Direction::LR], 2000.0).unwrap();

        let stop = h.stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            stop.store(true, Ordering::SeqCst);
        });

        let driver_stop = Arc::new(AtomicBool::new(false));
        let driver = spawn_driver(h.controller.clone(), driver_stop.clone());

        h.machine.run(&params, &Map::new(), &Map::new()).unwrap();
        driver_stop.store(true, Ordering::SeqCst);
        driver.join().unwrap();

        let saw_stopped = h
            .events
            .try_iter()
            .any(|e| matches!(e, ControllerEvent::Stopped));
        assert!(saw_stopped);
        assert!(!h.machine.controller.get_status().active);
    }
}
