use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use isi_bus::{SharedFrameBus, StateCoordinator};
use isi_stim::StimulusGenerator;
use isi_types::{Direction, Mode};

use crate::Result;

fn now_us() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

/// Preview mode (C9): renders a single requested stimulus frame on
/// demand and publishes it to the bus. Holds no thread and persists
/// nothing — calling it repeatedly from an IPC handler is the expected
/// usage, and it is safe to interleave with an independently-running
/// camera capture loop, but never with Recording (the state coordinator
/// enforces that at the mode-transition boundary).
pub struct PreviewController {
    bus: Arc<SharedFrameBus>,
    state: Arc<StateCoordinator>,
    generator: Arc<StimulusGenerator>,
    frame_id: AtomicU64,
}

impl PreviewController {
    pub fn new(
        bus: Arc<SharedFrameBus>,
        state: Arc<StateCoordinator>,
        generator: Arc<StimulusGenerator>,
    ) -> Self {
        Self {
            bus,
            state,
            generator,
            frame_id: AtomicU64::new(0),
        }
    }

    /// Moves the shared state into `Preview`, failing if a recording is
    /// currently active.
    pub fn enter(&self) -> Result<()> {
        if self.state.transition_to(Mode::Preview) == isi_bus::TransitionOutcome::Forbidden {
            return Err(crate::AcquisitionError::ModeTransitionForbidden {
                from: self.state.mode(),
                to: Mode::Preview,
            });
        }
        Ok(())
    }

    pub fn exit(&self) {
        self.state.transition_to(Mode::Idle);
    }

    /// Renders and publishes one frame of `direction`'s sweep at
    /// `frame_index` out of `total_frames`, without advancing any
    /// persistent cursor — callers (the IPC `get_stimulus_frame` handler)
    /// drive the index themselves.
    pub fn render_frame(
        &self,
        direction: Direction,
        frame_index: u32,
        total_frames: u32,
        show_mask: bool,
    ) -> Result<()> {
        let (frame, meta) = self
            .generator
            .generate_frame(direction, frame_index, total_frames, show_mask, now_us())
            .map_err(|e| crate::AcquisitionError::StimulusGeneration(e.to_string()))?;

        let monitor = self.generator.monitor();
        let stim = self.generator.stimulus_params();
        let start_angle = isi_stim::frame_angle_deg(&monitor, &stim, direction, 0, total_frames);
        let end_angle =
            isi_stim::frame_angle_deg(&monitor, &stim, direction, total_frames.saturating_sub(1), total_frames);

        let id = self.frame_id.fetch_add(1, Ordering::SeqCst);
        self.bus.publish_stimulus(
            &frame,
            id,
            frame_index as i32,
            total_frames as i32,
            direction,
            meta.angle_degrees,
            start_angle as f32,
            end_angle as f32,
            meta.timestamp_us,
        );
        Ok(())
    }

    /// Publishes the uniform background frame, e.g. for the
    /// `display_black_screen` IPC command.
    pub fn render_background(&self) {
        let frame = self.generator.background_frame();
        let id = self.frame_id.fetch_add(1, Ordering::SeqCst);
        self.bus.publish_baseline(&frame, id, now_us());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isi_stim::{MonitorGeometry, StimulusParams};

    fn controller() -> PreviewController {
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
        PreviewController::new(
            Arc::new(SharedFrameBus::default()),
            Arc::new(StateCoordinator::default()),
            Arc::new(StimulusGenerator::new(monitor, stim)),
        )
    }

    #[test]
    fn render_frame_publishes_to_stimulus_region() {
        let c = controller();
        c.enter().unwrap();
        c.render_frame(Direction::LR, 0, 10, true).unwrap();
        let desc = c.bus.stimulus_metadata_receiver().try_recv().unwrap();
        assert_eq!(desc.direction, "LR");
        assert_eq!(desc.frame_index, 0);
    }

    #[test]
    fn render_background_does_not_touch_last_stimulus_timestamp() {
        let c = controller();
        c.enter().unwrap();
        c.render_background();
        assert_eq!(c.bus.get_last_stimulus_timestamp(), None);
    }

    #[test]
    fn preview_is_forbidden_while_recording() {
        let c = controller();
        c.state.transition_to(Mode::Recording);
        let err = c.enter().unwrap_err();
        assert!(matches!(
            err,
            crate::AcquisitionError::ModeTransitionForbidden { .. }
        ));
    }
}
