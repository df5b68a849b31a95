//! Drifting-bar checkerboard stimulus generator (C4).
//!
//! Renders one frame at a time from a `(direction, frame_index,
//! total_frames)` triple. The spherical coordinate maps and the
//! unflickered base checkerboard are precomputed once per monitor/
//! checkerboard-size configuration and reused across frames; everything
//! else (bar position, flicker phase, contrast) is applied per call.
//! Generation never falls back to a blank frame on error — callers in
//! the recording path must treat a render failure as fatal.

mod geometry;
mod params;

pub use geometry::MonitorGeometry;
pub use params::StimulusParams;

use isi_types::{Direction, StimulusFrame, StimulusMeta};
use parking_lot::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StimulusError {
    #[error("total_frames must be >= 1, got {0}")]
    ZeroTotalFrames(u32),
    #[error("frame_index {frame_index} out of range for total_frames {total_frames}")]
    FrameIndexOutOfRange { frame_index: u32, total_frames: u32 },
}

pub type Result<T> = std::result::Result<T, StimulusError>;

/// The maximum signed sweep extent (degrees) for `direction`: half the
/// relevant field of view plus one full bar width, so the bar fully
/// clears the screen before and after the sweep.
fn max_angle_deg(monitor: &MonitorGeometry, stim: &StimulusParams, direction: Direction) -> f64 {
    let half_fov = if direction.is_horizontal() {
        monitor.field_of_view_horizontal_deg() / 2.0
    } else {
        monitor.field_of_view_vertical_deg() / 2.0
    };
    half_fov + stim.bar_width_deg
}

/// Start/end sweep angle (degrees) for `direction`. `RL`/`BT` are defined
/// with start and end swapped relative to `LR`/`TB`, which makes their
/// frame sequence exactly the time-reverse of their counterpart's (the
/// relationship the acquisition spec calls out by name) rather than a
/// sign-flipped mirror of it.
fn start_end_angle(monitor: &MonitorGeometry, stim: &StimulusParams, direction: Direction) -> (f64, f64) {
    let a = max_angle_deg(monitor, stim, direction);
    match direction {
        Direction::LR => (a, -a),
        Direction::RL => (-a, a),
        Direction::TB => (-a, a),
        Direction::BT => (a, -a),
    }
}

/// Bar angle (degrees) at `frame_index` of `total_frames`, linearly
/// interpolated between the direction's start and end angle. A
/// single-frame sweep holds at the start angle.
pub fn frame_angle_deg(
    monitor: &MonitorGeometry,
    stim: &StimulusParams,
    direction: Direction,
    frame_index: u32,
    total_frames: u32,
) -> f64 {
    let (start, end) = start_end_angle(monitor, stim, direction);
    if total_frames <= 1 {
        return start;
    }
    let progress = frame_index as f64 / (total_frames - 1) as f64;
    start + progress * (end - start)
}

/// Number of frames needed to sweep the bar fully across `direction`'s
/// axis at `camera_fps`, rounded to the nearest frame.
pub fn sweep_frame_count(
    monitor: &MonitorGeometry,
    stim: &StimulusParams,
    direction: Direction,
    camera_fps: f64,
) -> u32 {
    let sweep_degrees = 2.0 * max_angle_deg(monitor, stim, direction);
    let seconds = sweep_degrees / stim.drift_speed_deg_per_sec;
    (seconds * camera_fps).round() as u32
}

struct Invariants {
    monitor: MonitorGeometry,
    checkerboard_size_deg: f64,
    pixel_azimuth: Vec<f32>,
    pixel_altitude: Vec<f32>,
    base_checkerboard: Vec<u8>,
}

fn compute_invariants(monitor: MonitorGeometry, checkerboard_size_deg: f64) -> Invariants {
    let (pixel_azimuth, pixel_altitude) = monitor.spherical_coordinate_maps();
    let base_checkerboard = pixel_azimuth
        .iter()
        .zip(pixel_altitude.iter())
        .map(|(az, alt)| {
            let az_checks = (*az as f64 / checkerboard_size_deg).floor() as i64;
            let alt_checks = (*alt as f64 / checkerboard_size_deg).floor() as i64;
            ((az_checks + alt_checks).rem_euclid(2)) as u8
        })
        .collect();
    Invariants {
        monitor,
        checkerboard_size_deg,
        pixel_azimuth,
        pixel_altitude,
        base_checkerboard,
    }
}

/// Renders drifting-bar checkerboard frames, caching the expensive
/// per-pixel spherical coordinate maps until monitor geometry or
/// checkerboard size actually changes.
pub struct StimulusGenerator {
    stim: RwLock<StimulusParams>,
    invariants: RwLock<Invariants>,
}

impl StimulusGenerator {
    pub fn new(monitor: MonitorGeometry, stim: StimulusParams) -> Self {
        let invariants = compute_invariants(monitor, stim.checkerboard_size_deg);
        Self {
            stim: RwLock::new(stim),
            invariants: RwLock::new(invariants),
        }
    }

    pub fn monitor(&self) -> MonitorGeometry {
        self.invariants.read().monitor
    }

    pub fn stimulus_params(&self) -> StimulusParams {
        *self.stim.read()
    }

    /// Replaces the monitor geometry, recomputing the coordinate maps
    /// only if it actually differs from the cached one. Returns whether
    /// a recompute happened.
    pub fn update_monitor(&self, monitor: MonitorGeometry) -> bool {
        let needs_recompute = self.invariants.read().monitor != monitor;
        if needs_recompute {
            let checkerboard_size_deg = self.stim.read().checkerboard_size_deg;
            *self.invariants.write() = compute_invariants(monitor, checkerboard_size_deg);
        }
        needs_recompute
    }

    /// Replaces the stimulus parameters, recomputing the base
    /// checkerboard only if `checkerboard_size_deg` actually changed.
    /// Returns whether a recompute happened.
    pub fn update_stimulus_params(&self, stim: StimulusParams) -> bool {
        let needs_recompute = self.invariants.read().checkerboard_size_deg != stim.checkerboard_size_deg;
        *self.stim.write() = stim;
        if needs_recompute {
            let monitor = self.invariants.read().monitor;
            *self.invariants.write() = compute_invariants(monitor, stim.checkerboard_size_deg);
        }
        needs_recompute
    }

    pub fn sweep_frame_count(&self, direction: Direction, camera_fps: f64) -> u32 {
        let monitor = self.invariants.read().monitor;
        let stim = *self.stim.read();
        sweep_frame_count(&monitor, &stim, direction, camera_fps)
    }

    /// A flat frame at the current background luminance, direction-
    /// independent. Used for the uniform frame displayed during baseline
    /// and between-trial intervals.
    pub fn background_frame(&self) -> StimulusFrame {
        let monitor = self.invariants.read().monitor;
        let background_luminance = self.stim.read().background_luminance;
        let value = (background_luminance.clamp(0.0, 1.0) * 255.0).round() as u8;
        let data = vec![value; (monitor.width_px * monitor.height_px) as usize];
        StimulusFrame::new(monitor.width_px, monitor.height_px, data)
    }

    /// Renders one frame. `show_mask` intersects the checkerboard with
    /// the bar's current position; without it the checkerboard fills the
    /// whole frame (used for full-field flicker baselines).
    pub fn generate_frame(
        &self,
        direction: Direction,
        frame_index: u32,
        total_frames: u32,
        show_mask: bool,
        timestamp_us: i64,
    ) -> Result<(StimulusFrame, StimulusMeta)> {
        if total_frames == 0 {
            return Err(StimulusError::ZeroTotalFrames(total_frames));
        }
        if frame_index >= total_frames {
            return Err(StimulusError::FrameIndexOutOfRange {
                frame_index,
                total_frames,
            });
        }

        let invariants = self.invariants.read();
        let stim = *self.stim.read();
        let monitor = invariants.monitor;

        let angle = frame_angle_deg(&monitor, &stim, direction, frame_index, total_frames);

        let flip = if stim.flicker_hz > 0.0 {
            let period = (monitor.fps as f64 / stim.flicker_hz).floor().max(1.0) as u32;
            ((frame_index / period) % 2) == 1
        } else {
            false
        };

        let half_bar = stim.bar_width_deg / 2.0;
        let width = monitor.width_px as usize;
        let height = monitor.height_px as usize;
        let mut data = Vec::with_capacity(width * height);

        for idx in 0..width * height {
            let base = invariants.base_checkerboard[idx];
            let lit = if flip { 1 - base } else { base };
            let in_bar = if !show_mask {
                true
            } else {
                let coordinate = if direction.is_horizontal() {
                    invariants.pixel_azimuth[idx] as f64
                } else {
                    invariants.pixel_altitude[idx] as f64
                };
                (coordinate - angle).abs() <= half_bar
            };

            let luminance = if !in_bar {
                stim.background_luminance
            } else if lit == 1 {
                stim.background_luminance + stim.contrast
            } else {
                stim.background_luminance - stim.contrast
            };
            let clamped = luminance.clamp(0.0, 1.0);
            data.push((clamped * 255.0).round() as u8);
        }

        let frame = StimulusFrame::new(monitor.width_px, monitor.height_px, data);
        let meta = StimulusMeta {
            frame_index,
            total_frames,
            direction,
            angle_degrees: angle as f32,
            timestamp_us,
            channels: 1,
        };
        Ok((frame, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> MonitorGeometry {
        MonitorGeometry {
            width_px: 32,
            height_px: 24,
            width_cm: 33.6,
            height_cm: 25.2,
            distance_cm: 10.0,
            fps: 60,
        }
    }

    fn stim() -> StimulusParams {
        StimulusParams {
            bar_width_deg: 20.0,
            drift_speed_deg_per_sec: 15.0,
            checkerboard_size_deg: 25.0,
            flicker_hz: 6.0,
            contrast: 1.0,
            background_luminance: 0.5,
        }
    }

    #[test]
    fn sweep_frame_count_matches_rounded_formula() {
        let m = monitor();
        let s = stim();
        let n = sweep_frame_count(&m, &s, Direction::LR, 30.0);
        let expected = ((2.0 * (m.field_of_view_horizontal_deg() / 2.0 + s.bar_width_deg))
            / s.drift_speed_deg_per_sec
            * 30.0)
            .round() as u32;
        assert_eq!(n, expected);
    }

    #[test]
    fn rl_sequence_is_time_reverse_of_lr() {
        let m = monitor();
        let s = stim();
        let n = 9;
        for i in 0..n {
            let lr = frame_angle_deg(&m, &s, Direction::LR, i, n);
            let rl = frame_angle_deg(&m, &s, Direction::RL, n - 1 - i, n);
            assert!((lr - rl).abs() < 1e-9, "lr={lr} rl={rl} at i={i}");
        }
    }

    #[test]
    fn bt_sequence_is_time_reverse_of_tb() {
        let m = monitor();
        let s = stim();
        let n = 7;
        for i in 0..n {
            let tb = frame_angle_deg(&m, &s, Direction::TB, i, n);
            let bt = frame_angle_deg(&m, &s, Direction::BT, n - 1 - i, n);
            assert!((tb - bt).abs() < 1e-9, "tb={tb} bt={bt} at i={i}");
        }
    }

    #[test]
    fn single_frame_sweep_holds_at_start_angle() {
        let m = monitor();
        let s = stim();
        let (start, _) = start_end_angle(&m, &s, Direction::LR);
        let angle = frame_angle_deg(&m, &s, Direction::LR, 0, 1);
        assert!((angle - start).abs() < 1e-9);
    }

    #[test]
    fn generate_frame_rejects_zero_total_frames() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let err = gen
            .generate_frame(Direction::LR, 0, 0, true, 0)
            .unwrap_err();
        assert!(matches!(err, StimulusError::ZeroTotalFrames(0)));
    }

    #[test]
    fn generate_frame_rejects_out_of_range_index() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let err = gen
            .generate_frame(Direction::LR, 5, 5, true, 0)
            .unwrap_err();
        assert!(matches!(err, StimulusError::FrameIndexOutOfRange { .. }));
    }

    #[test]
    fn generate_frame_produces_expected_dimensions() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let (frame, meta) = gen.generate_frame(Direction::LR, 3, 10, true, 123).unwrap();
        assert_eq!(frame.width, 32);
        assert_eq!(frame.height, 24);
        assert_eq!(frame.data.len(), 32 * 24);
        assert_eq!(meta.frame_index, 3);
        assert_eq!(meta.total_frames, 10);
        assert_eq!(meta.timestamp_us, 123);
        assert_eq!(meta.channels, 1);
    }

    #[test]
    fn update_monitor_recomputes_only_on_real_change() {
        let gen = StimulusGenerator::new(monitor(), stim());
        assert!(!gen.update_monitor(monitor()));
        let mut changed = monitor();
        changed.width_px = 64;
        assert!(gen.update_monitor(changed));
        assert_eq!(gen.monitor().width_px, 64);
    }

    #[test]
    fn update_stimulus_params_recomputes_only_when_checkerboard_size_changes() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let mut same = stim();
        same.contrast = 0.8;
        assert!(!gen.update_stimulus_params(same));

        let mut different = stim();
        different.checkerboard_size_deg = 10.0;
        assert!(gen.update_stimulus_params(different));
    }

    #[test]
    fn background_frame_is_direction_independent_and_flat() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let frame = gen.background_frame();
        assert!(frame.data.iter().all(|&px| px == frame.data[0]));
    }

    #[test]
    fn full_field_mode_ignores_bar_position() {
        let gen = StimulusGenerator::new(monitor(), stim());
        let (masked, _) = gen.generate_frame(Direction::LR, 0, 10, true, 0).unwrap();
        let (full, _) = gen.generate_frame(Direction::LR, 0, 10, false, 0).unwrap();
        // With the mask off every pixel follows the checkerboard; with it
        // on, pixels outside the bar fall back to flat background, so the
        // two renders should differ somewhere for a bar this narrow.
        assert_ne!(masked.data, full.data);
    }
}
