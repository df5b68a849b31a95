/// Stimulus appearance parameters, independent of monitor geometry.
/// Only `checkerboard_size_deg` affects the precomputed invariants; the
/// rest are applied per-frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StimulusParams {
    pub bar_width_deg: f64,
    pub drift_speed_deg_per_sec: f64,
    pub checkerboard_size_deg: f64,
    pub flicker_hz: f64,
    pub contrast: f64,
    pub background_luminance: f64,
}
