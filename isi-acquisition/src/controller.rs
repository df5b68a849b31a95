use std::sync::Arc;

use isi_stim::StimulusGenerator;
use isi_types::{Direction, StimulusFrame, StimulusMeta};
use parking_lot::Mutex;

/// Outcome of `stop_direction`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopSummary {
    pub generated: u32,
    pub expected: u32,
    pub complete: bool,
}

/// A snapshot of the controller's current state, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerStatus {
    pub active: bool,
    pub direction: Option<Direction>,
    pub generated: u32,
    pub expected: u32,
}

struct State {
    active: bool,
    direction: Option<Direction>,
    i: u32,
    n: u32,
}

/// Camera-triggered stimulus controller (C5). The camera capture loop
/// calls `generate_next_frame` synchronously, once per captured camera
/// frame, so every camera frame in a direction's recording window has
/// exactly one corresponding stimulus frame generated strictly after it.
pub struct StimulusController {
    generator: Arc<StimulusGenerator>,
    state: Mutex<State>,
}

impl StimulusController {
    pub fn new(generator: Arc<StimulusGenerator>) -> Self {
        Self {
            generator,
            state: Mutex::new(State {
                active: false,
                direction: None,
                i: 0,
                n: 0,
            }),
        }
    }

    /// Begins a sweep for `direction`: computes and returns `N`, the
    /// number of frames the sweep will take at `camera_fps`.
    pub fn start_direction(&self, direction: Direction, camera_fps: f64) -> u32 {
        let n = self.generator.sweep_frame_count(direction, camera_fps);
        let mut state = self.state.lock();
        state.active = true;
        state.direction = Some(direction);
        state.i = 0;
        state.n = n;
        log::info!("stimulus controller: starting {direction} sweep, N={n}");
        n
    }

    /// Generates the next frame of the active sweep, if any remain.
    /// `Ok(None)` means the controller is inactive or the sweep has
    /// already produced all `N` frames. A generation failure is returned
    /// verbatim — callers in Recording must treat it as fatal, never
    /// substitute a blank frame.
    pub fn generate_next_frame(
        &self,
        timestamp_us: i64,
        show_mask: bool,
    ) -> Result<Option<(StimulusFrame, StimulusMeta)>, isi_stim::StimulusError> {
        let (direction, i, n) = {
            let state = self.state.lock();
            if !state.active || state.i >= state.n {
                return Ok(None);
            }
            (state.direction.expect("active implies direction set"), state.i, state.n)
        };

        let result = self.generator.generate_frame(direction, i, n, show_mask, timestamp_us);
        if result.is_ok() {
            self.state.lock().i += 1;
        }
        result.map(Some)
    }

    pub fn generator(&self) -> &Arc<StimulusGenerator> {
        &self.generator
    }

    pub fn is_direction_complete(&self) -> bool {
        let state = self.state.lock();
        state.i >= state.n
    }

    /// Ends the current sweep and reports how many frames were actually
    /// generated against how many were expected.
    pub fn stop_direction(&self) -> StopSummary {
        let mut state = self.state.lock();
        let summary = StopSummary {
            generated: state.i,
            expected: state.n,
            complete: state.i >= state.n,
        };
        state.active = false;
        state.direction = None;
        summary
    }

    pub fn get_status(&self) -> ControllerStatus {
        let state = self.state.lock();
        ControllerStatus {
            active: state.active,
            direction: state.direction,
            generated: state.i,
            expected: state.n,
        }
    }

    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.active = false;
        state.direction = None;
        state.i = 0;
        state.n = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isi_stim::{MonitorGeometry, StimulusParams};

    fn generator() -> Arc<StimulusGenerator> {
        let monitor = MonitorGeometry {
            width_px: 16,
            height_px: 12,
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
        Arc::new(StimulusGenerator::new(monitor, stim))
    }

    #[test]
    fn generate_next_frame_returns_none_when_inactive() {
        let controller = StimulusController::new(generator());
        assert_eq!(controller.generate_next_frame(0, true).unwrap(), None);
    }

    #[test]
    fn sweep_runs_exactly_n_frames_then_reports_complete() {
        let controller = StimulusController::new(generator());
        let n = controller.start_direction(Direction::LR, 30.0);
        let mut generated = 0;
        while let Some(_) = controller.generate_next_frame(generated as i64, true).unwrap() {
            generated += 1;
        }
        assert_eq!(generated, n);
        assert!(controller.is_direction_complete());

        let summary = controller.stop_direction();
        assert_eq!(summary.generated, n);
        assert_eq!(summary.expected, n);
        assert!(summary.complete);
    }

    #[test]
    fn stop_mid_sweep_reports_incomplete() {
        let controller = StimulusController::new(generator());
        controller.start_direction(Direction::LR, 30.0);
        controller.generate_next_frame(0, true).unwrap();
        controller.generate_next_frame(1, true).unwrap();
        let summary = controller.stop_direction();
        assert_eq!(summary.generated, 2);
        assert!(!summary.complete);
    }
}
